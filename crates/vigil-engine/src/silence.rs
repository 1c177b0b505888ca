//! Silences: operator-created windows muting matching alerts.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::info;
use uuid::Uuid;
use vigil_model::{LabelSet, Matcher};

use crate::error::{EngineError, Result};

/// A time-bounded mute over alerts matching a set of matchers.
///
/// Silenced alerts keep flowing through storage and grouping; they are only
/// excluded at notification time, so lifting a silence needs no replay.
#[derive(Debug, Clone)]
pub struct Silence {
    id: Uuid,
    /// Predicates an alert must satisfy to be muted.
    pub matchers: Vec<Matcher>,
    /// When the mute begins.
    pub starts_at: DateTime<Utc>,
    /// When the mute ends.
    pub ends_at: DateTime<Utc>,
    /// Who created the silence.
    pub created_by: String,
    /// Free-form operator comment.
    pub comment: String,
}

impl Silence {
    /// Creates a silence.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidSilence`] if the window is empty or
    /// inverted, or if no matchers are given (a matcher-less silence would
    /// mute everything).
    pub fn new(
        matchers: Vec<Matcher>,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
        created_by: impl Into<String>,
        comment: impl Into<String>,
    ) -> Result<Self> {
        if matchers.is_empty() {
            return Err(EngineError::InvalidSilence {
                reason: "silence must have at least one matcher".to_string(),
            });
        }
        if ends_at <= starts_at {
            return Err(EngineError::InvalidSilence {
                reason: format!("silence window is empty: {starts_at} >= {ends_at}"),
            });
        }
        Ok(Self {
            id: Uuid::new_v4(),
            matchers,
            starts_at,
            ends_at,
            created_by: created_by.into(),
            comment: comment.into(),
        })
    }

    /// Returns the silence id.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Returns true if the silence window covers `now`.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.starts_at <= now && now < self.ends_at
    }

    /// Returns true if the silence is active and every matcher passes.
    #[must_use]
    pub fn matches(&self, labels: &LabelSet, now: DateTime<Utc>) -> bool {
        self.is_active(now) && self.matchers.iter().all(|m| m.matches(labels))
    }
}

/// The live set of silences.
#[derive(Debug, Default)]
pub struct SilenceSet {
    inner: RwLock<Vec<Silence>>,
}

impl SilenceSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a silence, returning its id.
    pub fn add(&self, silence: Silence) -> Uuid {
        let id = silence.id();
        info!(silence_id = %id, created_by = %silence.created_by, "silence added");
        self.inner.write().push(silence);
        id
    }

    /// Removes a silence by id. Returns true if it existed.
    pub fn remove(&self, id: Uuid) -> bool {
        let mut inner = self.inner.write();
        let before = inner.len();
        inner.retain(|s| s.id() != id);
        let removed = inner.len() < before;
        if removed {
            info!(silence_id = %id, "silence removed");
        }
        removed
    }

    /// Returns a copy of every silence, active or not.
    #[must_use]
    pub fn list(&self) -> Vec<Silence> {
        self.inner.read().clone()
    }

    /// Returns true if any active silence matches the labels.
    #[must_use]
    pub fn is_silenced(&self, labels: &LabelSet, now: DateTime<Utc>) -> bool {
        self.inner.read().iter().any(|s| s.matches(labels, now))
    }

    /// Drops silences whose window has fully passed.
    pub fn prune(&self, now: DateTime<Utc>) {
        self.inner.write().retain(|s| s.ends_at > now);
    }
}
