//! Engine configuration.
//!
//! Plain data with serde support; defaults mirror the original deployment
//! (one-hour result expiry, one-hour per-attempt time limit).

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Queue used when the route table has no entry for a task name.
    pub default_queue: String,

    /// Worker concurrency per process.
    pub workers: usize,

    /// Seconds before an unacknowledged claimed submission is redelivered.
    pub visibility_timeout_secs: u64,

    /// Seconds a terminal result is retained before the store may evict it.
    pub result_expiry_secs: u64,

    /// How long a dispatcher's claim call blocks when no work is available.
    pub dequeue_timeout_ms: u64,

    /// Polling interval for `Engine::wait`.
    pub wait_interval_ms: u64,

    /// Base delay for exponential retry backoff.
    pub retry_base_delay_ms: u64,

    /// Jitter fraction applied to retry backoff.
    pub retry_jitter: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_queue: "default".to_string(),
            workers: 4,
            visibility_timeout_secs: 30,
            result_expiry_secs: 3600,
            dequeue_timeout_ms: 500,
            wait_interval_ms: 50,
            retry_base_delay_ms: 2_000,
            retry_jitter: 0.1,
        }
    }
}

impl EngineConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn result_expiry(&self) -> Duration {
        Duration::from_secs(self.result_expiry_secs)
    }

    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    pub fn wait_interval(&self) -> Duration {
        Duration::from_millis(self.wait_interval_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            multiplier: 2.0,
            jitter: self.retry_jitter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_deployment_values() {
        let config = EngineConfig::default();
        assert_eq!(config.result_expiry(), Duration::from_secs(3600));
        assert_eq!(config.default_queue, "default");
        assert_eq!(config.workers, 4);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"workers": 8}"#).unwrap();
        assert_eq!(config.workers, 8);
        assert_eq!(config.default_queue, "default");
    }

    #[test]
    fn retry_policy_uses_configured_base_delay() {
        let config = EngineConfig {
            retry_base_delay_ms: 100,
            retry_jitter: 0.0,
            ..EngineConfig::default()
        };
        let policy = config.retry_policy();
        assert_eq!(policy.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(400));
    }
}
