//! AppState construction and background-task wiring.
//!
//! Everything process-wide — adapter factories, the timeline store and
//! its mirror, the admission gate, the tool registry — is built here
//! once and injected into session supervisors. Nothing reaches for
//! module-level globals.

use std::sync::Arc;

use anyhow::Context;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use invorto_adapters::asr::AsrWsClient;
use invorto_adapters::llm::OpenAiCompatLlm;
use invorto_adapters::tts::{TtsWsClient, UtteranceCache};
use invorto_domain::config::{Config, ConfigSeverity};
use invorto_timeline::worker::DeliveryWorkerPool;
use invorto_timeline::{TimelineStore, WebhookMirror, WebhookQueue};
use invorto_tools::builtin::register_builtins;
use invorto_tools::{ToolExecutor, ToolRegistry};

use crate::admission::AdmissionGate;
use crate::state::{AppState, SessionIndex};

/// Retained events per call before the log stops growing.
const TIMELINE_PER_CALL_MAX: usize = 10_000;

/// Handles to the background machinery, joined at shutdown.
pub struct BackgroundTasks {
    pub worker_pool: DeliveryWorkerPool,
    pub mirror_pump: tokio::task::JoinHandle<()>,
    pub sweeper: tokio::task::JoinHandle<()>,
}

impl BackgroundTasks {
    /// Wait for everything to observe the shutdown token.
    pub async fn join(self) {
        self.worker_pool.join().await;
        let _ = self.mirror_pump.await;
        let _ = self.sweeper.await;
    }
}

/// Validate the config and wire up the full runtime.
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<(AppState, BackgroundTasks)> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    let shutdown = CancellationToken::new();

    // ── Admission gate ───────────────────────────────────────────────
    let admission = Arc::new(AdmissionGate::new(config.admission.clone()));
    let sweeper = admission.clone().spawn_sweeper(shutdown.clone());
    tracing::info!(
        global = config.admission.global_max_concurrency,
        campaign = config.admission.campaign_max_concurrency,
        ttl_secs = config.admission.slot_ttl_secs,
        "admission gate ready"
    );

    // ── Timeline + webhook mirror ────────────────────────────────────
    let timeline = Arc::new(TimelineStore::new(TIMELINE_PER_CALL_MAX));
    let webhook_queue = Arc::new(WebhookQueue::new(&config.webhooks));
    let mirror = Arc::new(WebhookMirror::from_config(
        &config.webhooks,
        webhook_queue.clone(),
    ));
    let mirror_pump = mirror.spawn_pump(&timeline, shutdown.clone());
    let worker_pool =
        DeliveryWorkerPool::spawn(webhook_queue.clone(), &config.webhooks, shutdown.clone());
    tracing::info!(
        endpoints = config.webhooks.endpoints.len(),
        workers = config.webhooks.workers,
        "webhook mirror ready"
    );

    // ── Adapters ─────────────────────────────────────────────────────
    let recognizer = Arc::new(AsrWsClient::new(config.adapters.asr.clone()));
    let synthesizer = Arc::new(TtsWsClient::new(config.adapters.tts.clone()));
    let llm = Arc::new(
        OpenAiCompatLlm::from_config(&config.adapters.llm)
            .context("initializing LLM adapter")?,
    );
    let tts_cache = Arc::new(UtteranceCache::new(&config.adapters.tts.cache));
    tracing::info!(
        asr = %config.adapters.asr.url,
        tts = %config.adapters.tts.url,
        llm = %config.adapters.llm.base_url,
        model = %config.adapters.llm.model,
        "adapters ready"
    );

    // ── Tools ────────────────────────────────────────────────────────
    let mut registry = ToolRegistry::new();
    register_builtins(&mut registry, &config.tools);
    let tools = Arc::new(ToolExecutor::new(Arc::new(registry), config.tools.clone()));

    // ── Security ─────────────────────────────────────────────────────
    let api_token_hash = std::env::var(&config.server.token_env)
        .ok()
        .filter(|t| !t.is_empty())
        .map(|t| Sha256::digest(t.as_bytes()).to_vec());
    if api_token_hash.is_none() {
        tracing::warn!(
            env = %config.server.token_env,
            "API token env unset — running in open dev mode"
        );
    }

    let state = AppState {
        config,
        admission,
        sessions: Arc::new(SessionIndex::new()),
        recognizer,
        synthesizer,
        llm,
        tts_cache,
        timeline,
        webhook_queue,
        tools,
        api_token_hash,
        shutdown,
    };

    Ok((
        state,
        BackgroundTasks {
            worker_pool,
            mirror_pump,
            sweeper,
        },
    ))
}
