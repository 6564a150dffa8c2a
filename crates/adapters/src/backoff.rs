//! Reconnect policy with jittered exponential back-off.

use std::time::Duration;

use invorto_domain::config::RetryConfig;

/// Controls how an adapter reconnects after a transient failure.
#[derive(Debug, Clone)]
pub struct Backoff {
    /// Initial delay before the first reconnect attempt.
    pub base: Duration,
    /// Maximum delay between attempts (cap).
    pub cap: Duration,
    /// Jitter applied to each delay, ± this fraction.
    pub jitter: f64,
    /// Maximum number of consecutive failures before giving up.
    /// `0` means unlimited retries.
    pub max_attempts: u32,
}

impl Backoff {
    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            base: Duration::from_millis(cfg.base_ms),
            cap: Duration::from_millis(cfg.cap_ms),
            jitter: cfg.jitter_pct as f64 / 100.0,
            max_attempts: cfg.max_attempts,
        }
    }

    /// Compute the delay for the given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis() as f64;
        let delay_ms = base_ms * 2f64.powi(attempt.min(20) as i32);
        let capped_ms = delay_ms.min(self.cap.as_millis() as f64);

        // Spread ± jitter to prevent reconnect storms.
        let spread = capped_ms * self.jitter * (2.0 * pseudo_random_fraction(attempt) - 1.0);
        Duration::from_millis((capped_ms + spread).max(0.0) as u64)
    }

    /// Whether the given attempt number exceeds the max.
    pub fn should_give_up(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt >= self.max_attempts
    }
}

/// Cheap deterministic "random" fraction [0, 1) based on attempt number.
/// Not cryptographically secure — just enough to spread reconnects.
fn pseudo_random_fraction(attempt: u32) -> f64 {
    let hash = attempt.wrapping_mul(2654435761); // Knuth multiplicative hash
    (hash as f64) / (u32::MAX as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asr_policy() -> Backoff {
        Backoff::from_config(&RetryConfig::default())
    }

    #[test]
    fn default_asr_profile() {
        let p = asr_policy();
        assert_eq!(p.base, Duration::from_millis(250));
        assert_eq!(p.cap, Duration::from_secs(5));
        assert!((p.jitter - 0.20).abs() < f64::EPSILON);
        assert_eq!(p.max_attempts, 5);
    }

    #[test]
    fn delay_grows_and_caps() {
        let p = asr_policy();
        let d0 = p.delay_for_attempt(0);
        let d3 = p.delay_for_attempt(3);
        assert!(d3 > d0);
        // Cap 5 s + 20% jitter.
        for attempt in 0..32 {
            assert!(p.delay_for_attempt(attempt) <= Duration::from_millis(6_000));
        }
    }

    #[test]
    fn jitter_stays_within_band() {
        let p = asr_policy();
        // Attempt 0: base 250 ms ± 20% → [200, 300].
        let d = p.delay_for_attempt(0).as_millis() as i64;
        assert!((200..=300).contains(&d), "delay {d}ms outside jitter band");
    }

    #[test]
    fn give_up_accounting() {
        let p = asr_policy();
        assert!(!p.should_give_up(4));
        assert!(p.should_give_up(5));

        let unlimited = Backoff {
            max_attempts: 0,
            ..asr_policy()
        };
        assert!(!unlimited.should_give_up(1_000_000));
    }
}
