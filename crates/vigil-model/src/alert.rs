//! Alert events and their lifecycle states.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::labels::{Fingerprint, LabelSet};

/// The reported state of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    /// The underlying condition is active.
    Firing,
    /// The underlying condition has cleared.
    Resolved,
}

impl AlertStatus {
    /// Returns the status as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Firing => "firing",
            Self::Resolved => "resolved",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The severity level of an alert, parsed from its `severity` label.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    /// Informational alert, no action required.
    Info,
    /// Warning alert, should be investigated.
    #[default]
    Warning,
    /// Critical alert, requires immediate attention.
    Critical,
}

impl AlertSeverity {
    /// The label name severity is read from.
    pub const LABEL: &'static str = "severity";

    /// Returns the severity as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }

    /// Returns the priority of this severity (higher = more urgent).
    #[must_use]
    pub const fn priority(&self) -> u8 {
        match self {
            Self::Info => 1,
            Self::Warning => 2,
            Self::Critical => 3,
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AlertSeverity {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "critical" => Ok(Self::Critical),
            other => Err(ModelError::UnknownSeverity {
                value: other.to_string(),
            }),
        }
    }
}

/// A single alert, identified by the fingerprint of its label set.
///
/// Repeated reports with the same labels describe the same alert; the store
/// mutates the existing record in place rather than creating a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Identifying labels.
    labels: LabelSet,
    /// Informational annotations; never part of identity.
    pub annotations: HashMap<String, String>,
    /// When the underlying condition started.
    pub starts_at: DateTime<Utc>,
    /// When the condition ended, or for firing alerts the validity horizon
    /// after which the alert is considered stale.
    pub ends_at: Option<DateTime<Utc>>,
    /// The reported state.
    pub status: AlertStatus,
    /// Cached fingerprint of `labels`.
    fingerprint: Fingerprint,
}

impl Alert {
    /// Creates a firing alert starting now.
    #[must_use]
    pub fn firing(labels: LabelSet, annotations: HashMap<String, String>) -> Self {
        Self::new(labels, annotations, Utc::now(), None, AlertStatus::Firing)
    }

    /// Creates an alert with explicit timestamps and status.
    #[must_use]
    pub fn new(
        labels: LabelSet,
        annotations: HashMap<String, String>,
        starts_at: DateTime<Utc>,
        ends_at: Option<DateTime<Utc>>,
        status: AlertStatus,
    ) -> Self {
        let fingerprint = labels.fingerprint();
        Self {
            labels,
            annotations,
            starts_at,
            ends_at,
            status,
            fingerprint,
        }
    }

    /// Returns the identifying labels.
    #[must_use]
    pub const fn labels(&self) -> &LabelSet {
        &self.labels
    }

    /// Returns the cached fingerprint.
    #[must_use]
    pub const fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Returns true if the alert is firing.
    #[must_use]
    pub fn is_firing(&self) -> bool {
        self.status == AlertStatus::Firing
    }

    /// Marks the alert resolved at the given instant.
    pub fn resolve(&mut self, at: DateTime<Utc>) {
        if self.status != AlertStatus::Resolved {
            self.status = AlertStatus::Resolved;
            self.ends_at = Some(at);
        }
    }

    /// Returns true if a firing alert's validity horizon has passed.
    ///
    /// Producers that stop re-sending a firing alert instead of sending an
    /// explicit resolved event terminate through this check.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_firing() && self.ends_at.is_some_and(|end| end <= now)
    }

    /// Returns the severity parsed from the `severity` label.
    ///
    /// Missing or unrecognized values default to [`AlertSeverity::Warning`].
    #[must_use]
    pub fn severity(&self) -> AlertSeverity {
        self.labels
            .get(AlertSeverity::LABEL)
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }
}
