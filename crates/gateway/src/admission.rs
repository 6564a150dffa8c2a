//! Admission control: counted semaphores with TTL'd slots.
//!
//! Every session reserves one slot in the global scope and, when it
//! belongs to a campaign, one in that campaign's scope — strictly
//! global-before-campaign on acquire and campaign-before-global on
//! release, so the two scopes can never deadlock against each other.
//! Slots carry a TTL; live sessions re-arm theirs periodically and a
//! sweep task reclaims whatever a crashed supervisor left behind.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use invorto_domain::config::AdmissionConfig;
use invorto_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scopes and tokens
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Campaign,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Global => "global",
            Scope::Campaign => "campaign",
        }
    }

    fn rejection_reason(self) -> &'static str {
        match self {
            Scope::Global => "global_cap_reached",
            Scope::Campaign => "campaign_cap_reached",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SlotKey {
    scope: Scope,
    id: String,
}

/// Proof of a reserved slot. Opaque outside this module.
#[derive(Debug, Clone)]
pub struct SlotToken {
    key: SlotKey,
    token_id: Uuid,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Gate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug)]
pub struct AdmissionGate {
    cfg: AdmissionConfig,
    /// (scope, id) → token → expiry.
    slots: Mutex<HashMap<SlotKey, HashMap<Uuid, DateTime<Utc>>>>,
}

impl AdmissionGate {
    pub fn new(cfg: AdmissionConfig) -> Self {
        Self {
            cfg,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> ChronoDuration {
        ChronoDuration::seconds(self.cfg.slot_ttl_secs as i64)
    }

    /// Refresh cadence: TTL divided by the configured divisor.
    pub fn refresh_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(
            (self.cfg.slot_ttl_secs / self.cfg.refresh_divisor).max(1),
        )
    }

    fn limit_for(&self, scope: Scope) -> u32 {
        match scope {
            Scope::Global => self.cfg.global_max_concurrency,
            Scope::Campaign => self.cfg.campaign_max_concurrency,
        }
    }

    /// Atomically reserve one slot in (scope, id), or reject when the
    /// scope is at its cap. Expired slots are reclaimed inline, so a
    /// crashed holder never blocks admission past one TTL.
    pub fn acquire(&self, scope: Scope, id: &str, now: DateTime<Utc>) -> Result<SlotToken> {
        let key = SlotKey {
            scope,
            id: id.to_string(),
        };
        let mut slots = self.slots.lock();
        let entry = slots.entry(key.clone()).or_default();
        entry.retain(|_, expires| *expires > now);

        if entry.len() as u32 >= self.limit_for(scope) {
            return Err(Error::AdmissionRejected {
                scope: scope.as_str().into(),
                reason: scope.rejection_reason().into(),
            });
        }

        let token_id = Uuid::new_v4();
        entry.insert(token_id, now + self.ttl());
        Ok(SlotToken { key, token_id })
    }

    /// Release a slot. Idempotent; the count never goes below zero.
    pub fn release(&self, token: &SlotToken) {
        let mut slots = self.slots.lock();
        if let Some(entry) = slots.get_mut(&token.key) {
            entry.remove(&token.token_id);
            if entry.is_empty() {
                slots.remove(&token.key);
            }
        }
    }

    /// Re-arm a live slot's TTL.
    pub fn refresh(&self, token: &SlotToken, now: DateTime<Utc>) {
        let mut slots = self.slots.lock();
        if let Some(entry) = slots.get_mut(&token.key) {
            if let Some(expires) = entry.get_mut(&token.token_id) {
                *expires = now + self.ttl();
            }
        }
    }

    /// Reclaim every expired slot. Returns how many were swept.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut slots = self.slots.lock();
        let mut reclaimed = 0;
        slots.retain(|_, entry| {
            let before = entry.len();
            entry.retain(|_, expires| *expires > now);
            reclaimed += before - entry.len();
            !entry.is_empty()
        });
        if reclaimed > 0 {
            tracing::info!(reclaimed, "admission sweep reclaimed expired slots");
        }
        reclaimed
    }

    /// Live count for a scope key (expired slots excluded).
    pub fn count(&self, scope: Scope, id: &str, now: DateTime<Utc>) -> usize {
        let slots = self.slots.lock();
        slots
            .get(&SlotKey {
                scope,
                id: id.to_string(),
            })
            .map(|entry| entry.values().filter(|expires| **expires > now).count())
            .unwrap_or(0)
    }

    /// Occupancy snapshot for the health endpoint.
    pub fn occupancy(&self, now: DateTime<Utc>) -> serde_json::Value {
        let slots = self.slots.lock();
        let mut out = serde_json::Map::new();
        for (key, entry) in slots.iter() {
            let live = entry.values().filter(|expires| **expires > now).count();
            out.insert(format!("{}:{}", key.scope.as_str(), key.id), live.into());
        }
        serde_json::Value::Object(out)
    }

    /// Admit a session: global slot first, then the campaign slot.
    /// If the campaign scope rejects, the global slot is released
    /// before the error propagates.
    pub fn admit(
        gate: &Arc<AdmissionGate>,
        campaign_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<AdmissionGuard> {
        let global = gate.acquire(Scope::Global, "global", now)?;
        let campaign = match campaign_id {
            Some(id) => match gate.acquire(Scope::Campaign, id, now) {
                Ok(token) => Some(token),
                Err(e) => {
                    gate.release(&global);
                    return Err(e);
                }
            },
            None => None,
        };
        Ok(AdmissionGuard {
            gate: gate.clone(),
            global: Some(global),
            campaign,
        })
    }

    /// Background task reclaiming leaked slots.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let interval = std::time::Duration::from_secs(self.cfg.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        self.sweep(Utc::now());
                    }
                }
            }
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Guard
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// RAII admission: dropping the guard releases the campaign slot and
/// then the global slot, exactly once.
#[derive(Debug)]
pub struct AdmissionGuard {
    gate: Arc<AdmissionGate>,
    global: Option<SlotToken>,
    campaign: Option<SlotToken>,
}

impl AdmissionGuard {
    /// Re-arm both slots' TTLs.
    pub fn refresh(&self, now: DateTime<Utc>) {
        if let Some(token) = &self.campaign {
            self.gate.refresh(token, now);
        }
        if let Some(token) = &self.global {
            self.gate.refresh(token, now);
        }
    }

    /// Periodic refresh task, keeping live sessions' slots from
    /// expiring. Runs until the session cancellation fires.
    pub fn spawn_refresh(&self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let gate = self.gate.clone();
        let tokens: Vec<SlotToken> = self
            .campaign
            .iter()
            .chain(self.global.iter())
            .cloned()
            .collect();
        let interval = self.gate.refresh_interval();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        let now = Utc::now();
                        for token in &tokens {
                            gate.refresh(token, now);
                        }
                    }
                }
            }
        })
    }
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        // Campaign before global — the reverse of acquisition order.
        if let Some(token) = self.campaign.take() {
            self.gate.release(&token);
        }
        if let Some(token) = self.global.take() {
            self.gate.release(&token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(global: u32, campaign: u32, ttl_secs: u64) -> Arc<AdmissionGate> {
        Arc::new(AdmissionGate::new(AdmissionConfig {
            global_max_concurrency: global,
            campaign_max_concurrency: campaign,
            slot_ttl_secs: ttl_secs,
            refresh_divisor: 3,
            sweep_interval_secs: 5,
        }))
    }

    #[test]
    fn nth_acquire_succeeds_nplus1_rejected() {
        let g = gate(2, 10, 30);
        let now = Utc::now();
        let _a = g.acquire(Scope::Global, "global", now).unwrap();
        let _b = g.acquire(Scope::Global, "global", now).unwrap();

        let err = g.acquire(Scope::Global, "global", now).unwrap_err();
        match err {
            Error::AdmissionRejected { scope, reason } => {
                assert_eq!(scope, "global");
                assert_eq!(reason, "global_cap_reached");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn campaign_rejection_releases_global_slot() {
        let g = gate(10, 1, 30);
        let now = Utc::now();
        let _held = AdmissionGate::admit(&g, Some("camp-1"), now).unwrap();

        // Second admit to the same campaign must fail on the campaign
        // scope and roll the global slot back.
        let err = AdmissionGate::admit(&g, Some("camp-1"), now).unwrap_err();
        match err {
            Error::AdmissionRejected { reason, .. } => {
                assert_eq!(reason, "campaign_cap_reached");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(g.count(Scope::Global, "global", now), 1);
    }

    #[test]
    fn release_restores_capacity_and_is_idempotent() {
        let g = gate(1, 1, 30);
        let now = Utc::now();
        let token = g.acquire(Scope::Global, "global", now).unwrap();
        g.release(&token);
        g.release(&token); // second release must not underflow

        assert_eq!(g.count(Scope::Global, "global", now), 0);
        assert!(g.acquire(Scope::Global, "global", now).is_ok());
    }

    #[test]
    fn ttl_reclamation_after_crash() {
        let g = gate(2, 10, 30);
        let now = Utc::now();
        // A "crashed" supervisor holds two slots and never releases.
        let _t1 = g.acquire(Scope::Global, "global", now).unwrap();
        let _t2 = g.acquire(Scope::Global, "global", now).unwrap();
        assert!(g.acquire(Scope::Global, "global", now).is_err());

        // One TTL later the sweep returns both slots.
        let later = now + ChronoDuration::seconds(31);
        assert_eq!(g.sweep(later), 2);
        assert!(g.acquire(Scope::Global, "global", later).is_ok());
        assert!(g.acquire(Scope::Global, "global", later).is_ok());
    }

    #[test]
    fn refresh_keeps_slot_alive_past_ttl() {
        let g = gate(1, 10, 30);
        let now = Utc::now();
        let token = g.acquire(Scope::Global, "global", now).unwrap();

        let mid = now + ChronoDuration::seconds(20);
        g.refresh(&token, mid);

        // 31 s after acquire but only 11 s after refresh: still live.
        let later = now + ChronoDuration::seconds(31);
        assert_eq!(g.sweep(later), 0);
        assert!(g.acquire(Scope::Global, "global", later).is_err());
    }

    #[test]
    fn guard_drop_releases_both_scopes() {
        let g = gate(1, 1, 30);
        let now = Utc::now();
        let guard = AdmissionGate::admit(&g, Some("camp-1"), now).unwrap();
        assert_eq!(g.count(Scope::Global, "global", now), 1);
        assert_eq!(g.count(Scope::Campaign, "camp-1", now), 1);

        drop(guard);
        assert_eq!(g.count(Scope::Global, "global", now), 0);
        assert_eq!(g.count(Scope::Campaign, "camp-1", now), 0);
        assert!(AdmissionGate::admit(&g, Some("camp-1"), now).is_ok());
    }

    #[test]
    fn expired_slot_reclaimed_inline_on_acquire() {
        let g = gate(1, 10, 30);
        let now = Utc::now();
        let _leaked = g.acquire(Scope::Global, "global", now).unwrap();

        // No sweep ran, but the acquire itself purges the expired slot.
        let later = now + ChronoDuration::seconds(31);
        assert!(g.acquire(Scope::Global, "global", later).is_ok());
    }

    #[test]
    fn occupancy_snapshot() {
        let g = gate(5, 5, 30);
        let now = Utc::now();
        let _guard = AdmissionGate::admit(&g, Some("camp-9"), now).unwrap();
        let occ = g.occupancy(now);
        assert_eq!(occ["global:global"], 1);
        assert_eq!(occ["campaign:camp-9"], 1);
    }
}
