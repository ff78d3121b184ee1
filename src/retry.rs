use std::time::Duration;

use bytes::Bytes;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, error, warn};

use crate::delivery::DeliveryClient;
use crate::error::DeliveryError;
use crate::telemetry::metric_inc;
use crate::types::{AttemptOutcome, DeliveryAttempt, Webhook};

/// Fixed retry budget with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first attempt included.
    pub max_attempts: u32,

    /// Wait before the first retry; doubled for each later one.
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Wait before attempt `attempt` (zero-based). `None` for the first one.
    pub fn backoff_before(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        Some(self.base_backoff.saturating_mul(factor))
    }
}

/// Shared expiry instant of one dispatch tree.
///
/// Only checked between requests; an in-flight request is never cut short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Instant);

impl Deadline {
    /// Saturates at [`MAX_TIMEOUT`](crate::config::MAX_TIMEOUT) from now.
    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now() + timeout.min(crate::config::MAX_TIMEOUT))
    }

    pub fn at(instant: Instant) -> Self {
        Self(instant)
    }

    pub fn instant(&self) -> Instant {
        self.0
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.0
    }

    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    /// Wait for `duration` unless the deadline comes first.
    ///
    /// Returns `false` when the deadline won.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = sleep(duration) => !self.expired(),
            _ = sleep_until(self.0) => false,
        }
    }
}

/// Terminal state of one webhook's retry sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// Every attempt in the budget failed.
    Exhausted,
    /// The dispatch deadline passed before the budget was used up.
    Abandoned,
}

/// What happened to one webhook within one dispatch.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub outcome: DeliveryOutcome,
    pub attempts: Vec<DeliveryAttempt>,
}

/// Deliver with retries until success, budget exhaustion or the deadline.
///
/// Never fails: the outcome is logged and reported, and one webhook's
/// failure has no effect on any other.
pub async fn deliver_with_retry(
    client: &DeliveryClient,
    webhook: &Webhook,
    event: &str,
    payload: &Bytes,
    deadline: Deadline,
    policy: RetryPolicy,
) -> DeliveryReport {
    let mut attempts = Vec::new();

    for index in 0..policy.max_attempts {
        if let Some(backoff) = policy.backoff_before(index) {
            if !deadline.sleep(backoff).await {
                return abandoned(webhook, event, attempts);
            }
        }
        if deadline.expired() {
            return abandoned(webhook, event, attempts);
        }

        match client.deliver(webhook, payload).await {
            Ok(()) => {
                attempts.push(DeliveryAttempt {
                    index,
                    outcome: AttemptOutcome::Success,
                });
                metric_inc("webhook.delivery.success");
                debug!(
                    webhook_id = %webhook.id,
                    event,
                    attempt = index,
                    "webhook delivered"
                );
                return DeliveryReport {
                    outcome: DeliveryOutcome::Delivered,
                    attempts,
                };
            }
            Err(err) => {
                metric_inc("webhook.delivery.failure");
                warn!(
                    webhook_id = %webhook.id,
                    event,
                    url = %webhook.url,
                    attempt = index,
                    error = %err,
                    "webhook delivery attempt failed"
                );
                attempts.push(DeliveryAttempt {
                    index,
                    outcome: attempt_outcome(&err),
                });
            }
        }
    }

    metric_inc("webhook.delivery.exhausted");
    error!(
        webhook_id = %webhook.id,
        event,
        url = %webhook.url,
        attempts = attempts.len(),
        "webhook delivery failed after all attempts"
    );
    DeliveryReport {
        outcome: DeliveryOutcome::Exhausted,
        attempts,
    }
}

fn abandoned(webhook: &Webhook, event: &str, attempts: Vec<DeliveryAttempt>) -> DeliveryReport {
    metric_inc("webhook.delivery.abandoned");
    warn!(
        webhook_id = %webhook.id,
        event,
        url = %webhook.url,
        attempts = attempts.len(),
        "webhook delivery abandoned at dispatch deadline"
    );
    DeliveryReport {
        outcome: DeliveryOutcome::Abandoned,
        attempts,
    }
}

fn attempt_outcome(err: &DeliveryError) -> AttemptOutcome {
    match err.status() {
        Some(code) => AttemptOutcome::Status(code),
        None => AttemptOutcome::Transport(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_before(0), None);
        assert_eq!(policy.backoff_before(1), Some(Duration::from_secs(1)));
        assert_eq!(policy.backoff_before(2), Some(Duration::from_secs(2)));
        assert_eq!(policy.backoff_before(3), Some(Duration::from_secs(4)));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_completes_before_deadline() {
        let deadline = Deadline::after(Duration::from_secs(10));
        assert!(deadline.sleep(Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_interrupts_sleep() {
        let deadline = Deadline::after(Duration::from_secs(1));
        let start = Instant::now();

        assert!(!deadline.sleep(Duration::from_secs(60)).await);
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(deadline.expired());
    }
}
