use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Semaphore;

use crate::retry::RetryPolicy;

/// Upper bound applied to every configured timeout and TTL.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Tuning for a [`Dispatcher`](crate::Dispatcher).
///
/// Deserializable so embedding applications can load it from their own
/// configuration; missing fields take the defaults below.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Admission bound for one dispatch call. Not shared across calls.
    pub max_concurrent_deliveries: usize,

    /// Deadline for a whole dispatch tree, detached from the caller.
    pub dispatch_timeout_ms: u64,

    /// Bound on one HTTP attempt, body included.
    pub attempt_timeout_ms: u64,

    /// Bound on one TCP dial.
    pub connect_timeout_ms: u64,

    /// Deadline for the manual test delivery.
    pub test_timeout_ms: u64,

    /// Total attempts per target, first attempt included.
    pub max_attempts: u32,

    /// Backoff before the first retry; doubles for each later retry.
    pub retry_base_ms: u64,

    /// Product token for `User-Agent: <platform_name>/1.0`.
    pub platform_name: String,

    /// Safety-net TTL for directory cache entries.
    pub cache_ttl_secs: u64,

    /// Skip the connect-time address check. Local development and tests only.
    pub allow_private_networks: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent_deliveries: 10,
            dispatch_timeout_ms: 120_000,
            attempt_timeout_ms: 10_000,
            connect_timeout_ms: 10_000,
            test_timeout_ms: 15_000,
            max_attempts: 3,
            retry_base_ms: 1_000,
            platform_name: "Webhook-Fanout".to_string(),
            cache_ttl_secs: 6 * 60 * 60,
            allow_private_networks: false,
        }
    }
}

fn clamp_ms(ms: u64) -> Duration {
    Duration::from_millis(ms).min(MAX_TIMEOUT)
}

impl DispatcherConfig {
    /// Admission bound, kept within what a semaphore can hold.
    pub fn max_concurrent_deliveries(&self) -> usize {
        self.max_concurrent_deliveries.clamp(1, Semaphore::MAX_PERMITS)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        clamp_ms(self.dispatch_timeout_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        clamp_ms(self.attempt_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        clamp_ms(self.connect_timeout_ms)
    }

    pub fn test_timeout(&self) -> Duration {
        clamp_ms(self.test_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs).min(MAX_TIMEOUT)
    }

    pub fn user_agent(&self) -> String {
        format!("{}/1.0", self.platform_name)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_backoff: clamp_ms(self.retry_base_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config: DispatcherConfig =
            serde_json::from_str(r#"{"platform_name": "Acme", "retry_base_ms": 10}"#).unwrap();

        assert_eq!(config.user_agent(), "Acme/1.0");
        assert_eq!(config.retry_policy().base_backoff, Duration::from_millis(10));
        assert_eq!(config.max_concurrent_deliveries, 10);
        assert_eq!(config.dispatch_timeout(), Duration::from_secs(120));
        assert!(!config.allow_private_networks);
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let config = DispatcherConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert_eq!(config.retry_policy().max_attempts, 1);
    }

    #[test]
    fn extreme_values_are_clamped() {
        let config: DispatcherConfig = serde_json::from_str(&format!(
            r#"{{"dispatch_timeout_ms": {max}, "cache_ttl_secs": {max}, "max_concurrent_deliveries": {max}}}"#,
            max = u64::MAX
        ))
        .unwrap();

        assert_eq!(config.dispatch_timeout(), MAX_TIMEOUT);
        assert_eq!(config.cache_ttl(), MAX_TIMEOUT);
        assert_eq!(config.max_concurrent_deliveries(), Semaphore::MAX_PERMITS);

        let zero = DispatcherConfig {
            max_concurrent_deliveries: 0,
            ..Default::default()
        };
        assert_eq!(zero.max_concurrent_deliveries(), 1);
    }

    #[tokio::test]
    async fn huge_dispatch_timeout_builds_a_deadline() {
        let config = DispatcherConfig {
            dispatch_timeout_ms: u64::MAX,
            ..Default::default()
        };
        let deadline = crate::retry::Deadline::after(config.dispatch_timeout());
        assert!(!deadline.expired());
    }
}
