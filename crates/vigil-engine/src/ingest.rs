//! Alert ingestion events and batch validation.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vigil_model::{Alert, AlertStatus, LabelSet};

use crate::error::{EngineError, Result};

/// One alert report as submitted by a producer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEvent {
    /// Identifying labels.
    pub labels: LabelSet,
    /// Informational annotations.
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    /// When the condition started.
    pub starts_at: DateTime<Utc>,
    /// For firing events an optional validity horizon; required on
    /// resolved events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
    /// The reported state.
    pub status: AlertStatus,
}

impl AlertEvent {
    /// Converts the event into a stored alert.
    #[must_use]
    pub fn into_alert(self) -> Alert {
        Alert::new(
            self.labels,
            self.annotations,
            self.starts_at,
            self.ends_at,
            self.status,
        )
    }
}

/// Validates a batch before any event is applied.
///
/// Batches apply atomically: one malformed event rejects the whole batch so
/// producers never see partial application.
///
/// # Errors
///
/// Returns [`EngineError::InvalidBatch`] naming the first offending event.
pub fn validate_batch(events: &[AlertEvent]) -> Result<()> {
    for (i, event) in events.iter().enumerate() {
        if event.labels.is_empty() {
            return Err(EngineError::InvalidBatch {
                reason: format!("event {i}: empty label set"),
            });
        }
        if event.labels.iter().any(|(name, _)| name.is_empty()) {
            return Err(EngineError::InvalidBatch {
                reason: format!("event {i}: empty label name"),
            });
        }
        if let Some(ends_at) = event.ends_at {
            if ends_at < event.starts_at {
                return Err(EngineError::InvalidBatch {
                    reason: format!("event {i}: endsAt precedes startsAt"),
                });
            }
        }
        if event.status == AlertStatus::Resolved && event.ends_at.is_none() {
            return Err(EngineError::InvalidBatch {
                reason: format!("event {i}: resolved event requires endsAt"),
            });
        }
    }
    Ok(())
}

/// What happened to an accepted batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Events accepted into the store.
    pub accepted: usize,
    /// Events that reported a firing condition.
    pub fired: usize,
    /// Events that reported a resolution.
    pub resolved: usize,
    /// Events whose labels matched no route.
    pub routing_misses: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn firing_event(pairs: &[(&str, &str)]) -> AlertEvent {
        AlertEvent {
            labels: pairs.iter().copied().collect(),
            annotations: HashMap::new(),
            starts_at: Utc::now(),
            ends_at: None,
            status: AlertStatus::Firing,
        }
    }

    #[test]
    fn valid_batch_passes() {
        let events = vec![
            firing_event(&[("alertname", "HighCPU")]),
            firing_event(&[("alertname", "HighMemory")]),
        ];
        assert!(validate_batch(&events).is_ok());
    }

    #[test]
    fn empty_batch_passes() {
        assert!(validate_batch(&[]).is_ok());
    }

    #[test]
    fn empty_label_set_rejects_batch() {
        let events = vec![firing_event(&[("alertname", "HighCPU")]), firing_event(&[])];
        let err = validate_batch(&events);
        assert!(matches!(
            err,
            Err(EngineError::InvalidBatch { reason }) if reason.contains("event 1")
        ));
    }

    #[test]
    fn empty_label_name_rejects_batch() {
        let events = vec![firing_event(&[("", "value")])];
        assert!(matches!(
            validate_batch(&events),
            Err(EngineError::InvalidBatch { .. })
        ));
    }

    #[test]
    fn inverted_interval_rejects_batch() {
        let mut event = firing_event(&[("alertname", "HighCPU")]);
        event.ends_at = Some(event.starts_at - Duration::minutes(1));
        assert!(matches!(
            validate_batch(&[event]),
            Err(EngineError::InvalidBatch { .. })
        ));
    }

    #[test]
    fn resolved_without_ends_at_rejects_batch() {
        let mut event = firing_event(&[("alertname", "HighCPU")]);
        event.status = AlertStatus::Resolved;
        assert!(matches!(
            validate_batch(&[event]),
            Err(EngineError::InvalidBatch { .. })
        ));
    }

    #[test]
    fn event_deserializes_with_defaults() {
        let json = r#"{
            "labels": {"alertname": "HighCPU"},
            "startsAt": "2026-01-01T00:00:00Z",
            "status": "firing"
        }"#;
        let event: AlertEvent = serde_json::from_str(json).unwrap();
        assert!(event.annotations.is_empty());
        assert!(event.ends_at.is_none());
        assert_eq!(event.status, AlertStatus::Firing);
    }

    #[test]
    fn into_alert_preserves_fields() {
        let mut event = firing_event(&[("alertname", "HighCPU")]);
        event
            .annotations
            .insert("summary".to_string(), "hot".to_string());
        let starts = event.starts_at;

        let alert = event.into_alert();
        assert!(alert.is_firing());
        assert_eq!(alert.starts_at, starts);
        assert_eq!(alert.annotations.get("summary").map(String::as_str), Some("hot"));
    }
}
