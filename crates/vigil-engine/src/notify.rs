//! Notification rendering and notifier implementations.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use vigil_model::{Alert, AlertStatus};

use crate::error::{EngineError, Result};
use crate::store::GroupKey;

/// The aggregate state of the notification: firing while any member fires,
/// resolved once all members have resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    /// At least one member alert is firing.
    Firing,
    /// Every member alert has resolved.
    Resolved,
}

impl NotificationStatus {
    /// Returns the status as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Firing => "firing",
            Self::Resolved => "resolved",
        }
    }
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a notifier reports back after a delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The notification was accepted downstream.
    Success,
    /// A retryable failure, e.g. a timeout or a 5xx response.
    Transient {
        /// What went wrong.
        reason: String,
    },
    /// A non-retryable failure, e.g. a malformed destination.
    Permanent {
        /// What went wrong.
        reason: String,
    },
}

/// A notification delivery channel.
///
/// Implementations must be cheap to call concurrently; the dispatcher fans
/// out across a receiver's notifiers without ordering guarantees between
/// them.
pub trait Notifier: Send + Sync + fmt::Debug {
    /// A short name identifying the channel in logs.
    fn name(&self) -> &str;

    /// Attempts one delivery.
    fn deliver(&self, notification: &RenderedNotification) -> DeliveryOutcome;

    /// Whether this notifier should receive traffic.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// A flushed group rendered for delivery.
#[derive(Debug, Clone)]
pub struct RenderedNotification {
    /// Unique id of this notification.
    pub id: Uuid,
    /// The group this notification describes.
    pub group_key: String,
    /// The receiver it is addressed to.
    pub receiver: String,
    /// Aggregate status across the member alerts.
    pub status: NotificationStatus,
    /// The member alerts, resolved members included on resolution notices.
    pub alerts: Vec<Alert>,
    /// Labels shared by every member alert.
    pub common_labels: HashMap<String, String>,
    /// Annotations shared by every member alert.
    pub common_annotations: HashMap<String, String>,
}

impl RenderedNotification {
    /// Renders a notification from a group's member alerts.
    #[must_use]
    pub fn new(
        group_key: &GroupKey,
        receiver: impl Into<String>,
        status: NotificationStatus,
        alerts: Vec<Alert>,
    ) -> Self {
        let common_labels = common_entries(&alerts, |a| a.labels().iter());
        let common_annotations = common_entries(&alerts, |a| {
            a.annotations.iter().map(|(k, v)| (k.as_str(), v.as_str()))
        });
        Self {
            id: Uuid::new_v4(),
            group_key: group_key.as_str().to_string(),
            receiver: receiver.into(),
            status,
            alerts,
            common_labels,
            common_annotations,
        }
    }

    /// Returns the member alerts that are still firing.
    #[must_use]
    pub fn firing_alerts(&self) -> Vec<&Alert> {
        self.alerts.iter().filter(|a| a.is_firing()).collect()
    }
}

fn common_entries<'a, F, I>(alerts: &'a [Alert], project: F) -> HashMap<String, String>
where
    F: Fn(&'a Alert) -> I,
    I: Iterator<Item = (&'a str, &'a str)>,
{
    let mut iter = alerts.iter();
    let Some(first) = iter.next() else {
        return HashMap::new();
    };
    let mut common: HashMap<&str, &str> = project(first).collect();
    for alert in iter {
        let entries: HashMap<&str, &str> = project(alert).collect();
        common.retain(|k, v| entries.get(k) == Some(v));
    }
    common
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// One alert in the webhook payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAlert {
    /// Lifecycle state of the alert.
    pub status: AlertStatus,
    /// Identifying labels.
    pub labels: HashMap<String, String>,
    /// Informational annotations.
    pub annotations: HashMap<String, String>,
    /// When the condition started.
    pub starts_at: DateTime<Utc>,
    /// When the condition ended, if resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
    /// Hex fingerprint of the label set.
    pub fingerprint: String,
}

impl From<&Alert> for WebhookAlert {
    fn from(alert: &Alert) -> Self {
        Self {
            status: alert.status,
            labels: alert
                .labels()
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            annotations: alert.annotations.clone(),
            starts_at: alert.starts_at,
            ends_at: alert.ends_at,
            fingerprint: alert.fingerprint().to_string(),
        }
    }
}

/// The JSON document posted to webhook destinations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    /// Payload schema version.
    pub version: String,
    /// The group key this payload describes.
    pub group_key: String,
    /// The receiver name.
    pub receiver: String,
    /// Aggregate status.
    pub status: NotificationStatus,
    /// Member alerts.
    pub alerts: Vec<WebhookAlert>,
    /// Labels shared by every member.
    pub common_labels: HashMap<String, String>,
    /// Annotations shared by every member.
    pub common_annotations: HashMap<String, String>,
}

impl WebhookPayload {
    /// Payload schema version emitted by this crate.
    pub const VERSION: &'static str = "4";

    /// Builds the payload for a rendered notification.
    #[must_use]
    pub fn from_notification(notification: &RenderedNotification) -> Self {
        Self {
            version: Self::VERSION.to_string(),
            group_key: notification.group_key.clone(),
            receiver: notification.receiver.clone(),
            status: notification.status,
            alerts: notification.alerts.iter().map(WebhookAlert::from).collect(),
            common_labels: notification.common_labels.clone(),
            common_annotations: notification.common_annotations.clone(),
        }
    }
}

/// Webhook destination configuration.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Destination URL.
    pub url: String,
    /// Whether the notifier accepts traffic.
    pub enabled: bool,
}

impl WebhookConfig {
    /// Creates a webhook configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] if the URL is empty.
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(EngineError::InvalidConfig {
                reason: "webhook URL must not be empty".to_string(),
            });
        }
        Ok(Self { url, enabled: true })
    }
}

/// Posts webhook payloads to an HTTP endpoint.
///
/// The transport is not wired up yet; delivery currently serializes the
/// payload and logs it. TODO: post via an HTTP client once the transport
/// layer lands.
#[derive(Debug)]
pub struct WebhookNotifier {
    config: WebhookConfig,
}

impl WebhookNotifier {
    /// Creates a webhook notifier.
    #[must_use]
    pub fn new(config: WebhookConfig) -> Self {
        Self { config }
    }
}

impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    fn deliver(&self, notification: &RenderedNotification) -> DeliveryOutcome {
        let payload = WebhookPayload::from_notification(notification);
        match serde_json::to_string(&payload) {
            Ok(body) => {
                info!(
                    url = %self.config.url,
                    group_key = %notification.group_key,
                    bytes = body.len(),
                    "would send webhook notification"
                );
                DeliveryOutcome::Success
            }
            Err(e) => DeliveryOutcome::Permanent {
                reason: format!("payload serialization failed: {e}"),
            },
        }
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}

/// Writes notifications to the log. Useful as a default receiver and in
/// tests.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    fn deliver(&self, notification: &RenderedNotification) -> DeliveryOutcome {
        info!(
            group_key = %notification.group_key,
            receiver = %notification.receiver,
            status = %notification.status,
            alerts = notification.alerts.len(),
            "notification"
        );
        DeliveryOutcome::Success
    }
}
