use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// RetryConfig
// ---------------------------------------------------------------------------

/// Configuration for per-task retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts per task.
    pub max_attempts: u32,
    /// Initial backoff in milliseconds.
    pub initial_delay_ms: u64,
    /// Backoff cap in milliseconds.
    pub max_delay_ms: u64,
    /// Whether to add jitter to backoff.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Backoff duration for a given attempt: `min(initial * 2^attempt, cap)`,
    /// optionally scaled by jitter into the 50-100% range.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let base = (self.initial_delay_ms as f64) * 2f64.powi(attempt.min(32) as i32);
        let capped = base.min(self.max_delay_ms as f64);

        let ms = if self.jitter {
            let jitter_factor = 0.5 + (rand_simple() * 0.5);
            capped * jitter_factor
        } else {
            capped
        };

        Duration::from_millis(ms as u64)
    }
}

/// Simple pseudo-random f64 in [0, 1) using the clock's sub-second noise.
fn rand_simple() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 10000) as f64 / 10000.0
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Parameters of the execution engine loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Iteration budget; 0 means unbounded.
    pub max_iterations: u32,
    /// Delay between iterations in milliseconds.
    pub iteration_delay_ms: u64,
    /// Per-invocation agent timeout.
    pub agent_timeout_secs: u64,
    /// Grace window between signalling a cancelled agent and killing it.
    pub cancel_grace_ms: u64,
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 0,
            iteration_delay_ms: 0,
            agent_timeout_secs: 30 * 60,
            cancel_grace_ms: 5_000,
            retry: RetryConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

// ---------------------------------------------------------------------------
// InterruptConfig
// ---------------------------------------------------------------------------

/// Configuration of the two-phase interrupt coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptConfig {
    /// Window within which a second interrupt escalates to force-quit.
    pub double_press_window_ms: u64,
    /// Headless mode: no dialog, first interrupt commits to graceful
    /// shutdown.
    pub headless: bool,
}

impl Default for InterruptConfig {
    fn default() -> Self {
        Self {
            double_press_window_ms: 1_000,
            headless: false,
        }
    }
}

impl InterruptConfig {
    pub fn double_press_window(&self) -> Duration {
        Duration::from_millis(self.double_press_window_ms)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_cap() {
        let retry = RetryConfig {
            max_attempts: 5,
            initial_delay_ms: 100,
            max_delay_ms: 350,
            jitter: false,
        };

        assert_eq!(retry.backoff_for(0), Duration::from_millis(100));
        assert_eq!(retry.backoff_for(1), Duration::from_millis(200));
        assert_eq!(retry.backoff_for(2), Duration::from_millis(350));
        assert_eq!(retry.backoff_for(10), Duration::from_millis(350));
    }

    #[test]
    fn jitter_stays_within_half_to_full_backoff() {
        let retry = RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            jitter: true,
        };

        for attempt in 0..4 {
            let full = 1_000u64 * 2u64.pow(attempt);
            let delay = retry.backoff_for(attempt).as_millis() as u64;
            assert!(delay >= full / 2, "attempt {attempt}: {delay} < {}", full / 2);
            assert!(delay <= full, "attempt {attempt}: {delay} > {full}");
        }
    }

    #[test]
    fn huge_attempt_does_not_overflow() {
        let retry = RetryConfig {
            jitter: false,
            ..RetryConfig::default()
        };
        assert_eq!(
            retry.backoff_for(u32::MAX),
            Duration::from_millis(retry.max_delay_ms)
        );
    }

    #[test]
    fn engine_config_defaults_unbounded() {
        let config = EngineConfig::default();
        assert_eq!(config.max_iterations, 0);
        assert_eq!(config.agent_timeout(), Duration::from_secs(1800));
    }
}
