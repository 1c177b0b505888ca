//! Notification dispatch with per-notifier retry and the notification log.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};
use vigil_model::Alert;

use crate::config::Receiver;
use crate::error::EngineError;
use crate::notify::{DeliveryOutcome, RenderedNotification};
use crate::store::GroupKey;

/// Exponential backoff parameters for transient delivery failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub multiplier: f64,
    /// Total attempts, the initial delivery included.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Returns the delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay = self.initial_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    /// Returns true if another attempt is allowed after `attempts` tries.
    #[must_use]
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

/// The outcome of dispatching one notification to one receiver.
#[derive(Debug)]
pub struct DeliveryReport {
    /// The receiver the notification was addressed to.
    pub receiver: String,
    /// How many notifiers accepted the notification.
    pub delivered: usize,
    /// Failures, one per notifier that never succeeded.
    pub failures: Vec<EngineError>,
}

impl DeliveryReport {
    /// Returns true if at least one notifier accepted the notification.
    #[must_use]
    pub fn any_delivered(&self) -> bool {
        self.delivered > 0
    }
}

/// Fans a notification out to a receiver's notifiers, retrying transient
/// failures per notifier.
///
/// A failing notifier never blocks its siblings: each one runs its own
/// attempt loop and reports independently.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    retry: RetryPolicy,
}

impl Dispatcher {
    /// Creates a dispatcher with the given retry policy.
    #[must_use]
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    /// Delivers a notification to every enabled notifier of the receiver.
    pub async fn send(
        &self,
        receiver: &Receiver,
        notification: &RenderedNotification,
    ) -> DeliveryReport {
        let mut report = DeliveryReport {
            receiver: receiver.name().to_string(),
            delivered: 0,
            failures: Vec::new(),
        };

        for notifier in receiver.notifiers() {
            if !notifier.is_enabled() {
                debug!(notifier = notifier.name(), "skipping disabled notifier");
                continue;
            }

            let mut attempts = 0;
            loop {
                attempts += 1;
                match notifier.deliver(notification) {
                    DeliveryOutcome::Success => {
                        report.delivered += 1;
                        break;
                    }
                    DeliveryOutcome::Permanent { reason } => {
                        warn!(
                            notifier = notifier.name(),
                            receiver = receiver.name(),
                            %reason,
                            "permanent delivery failure"
                        );
                        report.failures.push(EngineError::DeliveryFailed {
                            receiver: receiver.name().to_string(),
                            reason,
                        });
                        break;
                    }
                    DeliveryOutcome::Transient { reason } => {
                        if !self.retry.should_retry(attempts) {
                            warn!(
                                notifier = notifier.name(),
                                receiver = receiver.name(),
                                attempts,
                                %reason,
                                "delivery retries exhausted"
                            );
                            report.failures.push(EngineError::DeliveryFailed {
                                receiver: receiver.name().to_string(),
                                reason: format!("retries exhausted after {attempts} attempts: {reason}"),
                            });
                            break;
                        }
                        let delay = self.retry.delay_for_attempt(attempts);
                        debug!(
                            notifier = notifier.name(),
                            attempts,
                            delay_ms = delay.as_millis() as u64,
                            %reason,
                            "transient delivery failure, backing off"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        report
    }
}

/// Hashes the identity-relevant content of a group's member alerts.
///
/// Covers fingerprints and statuses in fingerprint order, so a repeat flush
/// of an unchanged group hashes identically regardless of member order.
#[must_use]
pub fn alert_set_hash(alerts: &[Alert]) -> u64 {
    let mut entries: Vec<_> = alerts
        .iter()
        .map(|a| (a.fingerprint(), a.status))
        .collect();
    entries.sort_unstable_by_key(|(fp, _)| *fp);

    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    for (fp, status) in entries {
        fp.hash(&mut hasher);
        status.hash(&mut hasher);
    }
    hasher.finish()
}

/// What was last sent for one `(group, receiver)` pair.
#[derive(Debug, Clone, Default)]
pub struct NotificationRecord {
    /// When the last firing notification went out.
    pub last_sent_at: Option<DateTime<Utc>>,
    /// When the last resolution notice went out.
    pub last_resolved_sent_at: Option<DateTime<Utc>>,
    /// Content hash of the last sent member set.
    pub last_sent_hash: Option<u64>,
}

/// Tracks the last successful notification per `(group, receiver)` pair.
///
/// The log is what makes repeat suppression and change detection work; only
/// successful deliveries are recorded, so a failed flush stays eligible for
/// the next timer.
#[derive(Debug, Default)]
pub struct NotificationLog {
    inner: Mutex<HashMap<(GroupKey, String), NotificationRecord>>,
}

impl NotificationLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a successful firing notification.
    pub fn record(&self, group: &GroupKey, receiver: &str, hash: u64, at: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        let record = inner
            .entry((group.clone(), receiver.to_string()))
            .or_default();
        record.last_sent_at = Some(at);
        record.last_sent_hash = Some(hash);
    }

    /// Records a successful resolution notice.
    pub fn record_resolved(&self, group: &GroupKey, receiver: &str, at: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        let record = inner
            .entry((group.clone(), receiver.to_string()))
            .or_default();
        record.last_resolved_sent_at = Some(at);
    }

    /// Returns the record for a `(group, receiver)` pair.
    #[must_use]
    pub fn get(&self, group: &GroupKey, receiver: &str) -> Option<NotificationRecord> {
        self.inner
            .lock()
            .get(&(group.clone(), receiver.to_string()))
            .cloned()
    }

    /// Drops the record for a `(group, receiver)` pair.
    pub fn forget(&self, group: &GroupKey, receiver: &str) {
        self.inner
            .lock()
            .remove(&(group.clone(), receiver.to_string()));
    }
}
