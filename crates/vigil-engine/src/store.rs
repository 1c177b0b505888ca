//! In-memory alert store with group indexing and retention.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;
use vigil_model::{Alert, AlertStatus, Fingerprint, LabelSet};

/// Identity of an alert group: the rendered projection of an alert's labels
/// onto a route's `group_by` names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey(String);

impl GroupKey {
    /// Derives the group key for an alert under the given grouping labels.
    ///
    /// Names are sorted so the key is independent of `group_by` order.
    /// Labels absent from the alert render as empty values; an empty
    /// `group_by` puts every alert of the route into one group.
    #[must_use]
    pub fn derive(group_by: &[String], labels: &LabelSet) -> Self {
        let mut names: Vec<&str> = group_by.iter().map(String::as_str).collect();
        names.sort_unstable();
        names.dedup();

        let mut out = String::from("{");
        for (i, name) in names.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            let value = labels.get(name).unwrap_or("");
            out.push_str(name);
            out.push_str("=\"");
            out.push_str(value);
            out.push('"');
        }
        out.push('}');
        Self(out)
    }

    /// Returns the rendered key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    alerts: HashMap<Fingerprint, Alert>,
    groups: HashMap<GroupKey, BTreeSet<Fingerprint>>,
}

/// Thread-safe store of all known alerts, indexed by fingerprint, plus the
/// group membership index maintained by ingestion.
///
/// A single lock covers both maps, so group membership and alert state are
/// always observed consistently.
#[derive(Debug)]
pub struct AlertStore {
    retention: Duration,
    inner: RwLock<StoreInner>,
}

impl AlertStore {
    /// Creates a store that keeps resolved alerts for `retention` before
    /// garbage collection drops them.
    #[must_use]
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            inner: RwLock::new(StoreInner::default()),
        }
    }

    /// Inserts or merges an alert, returning the prior status if the
    /// fingerprint was already known.
    ///
    /// A firing report over a resolved record re-fires the alert with the
    /// new `starts_at`. A firing report over a firing record only extends
    /// the validity horizon. A resolved report resolves in place.
    pub fn upsert(&self, alert: Alert) -> Option<AlertStatus> {
        let mut inner = self.inner.write();
        match inner.alerts.get_mut(&alert.fingerprint()) {
            Some(existing) => {
                let prior = existing.status;
                match alert.status {
                    AlertStatus::Firing => {
                        if prior == AlertStatus::Resolved {
                            existing.status = AlertStatus::Firing;
                            existing.starts_at = alert.starts_at;
                        }
                        existing.ends_at = alert.ends_at;
                    }
                    AlertStatus::Resolved => {
                        let at = alert.ends_at.unwrap_or_else(Utc::now);
                        existing.resolve(at);
                    }
                }
                existing.annotations = alert.annotations;
                Some(prior)
            }
            None => {
                debug!(fingerprint = %alert.fingerprint(), status = %alert.status, "new alert");
                inner.alerts.insert(alert.fingerprint(), alert);
                None
            }
        }
    }

    /// Returns a copy of the alert with this fingerprint.
    #[must_use]
    pub fn get(&self, fingerprint: Fingerprint) -> Option<Alert> {
        self.inner.read().alerts.get(&fingerprint).cloned()
    }

    /// Records that an alert belongs to a group.
    pub fn assign_group(&self, group: &GroupKey, fingerprint: Fingerprint) {
        self.inner
            .write()
            .groups
            .entry(group.clone())
            .or_default()
            .insert(fingerprint);
    }

    /// Returns the current members of a group, in fingerprint order.
    #[must_use]
    pub fn group_members(&self, group: &GroupKey) -> Vec<Alert> {
        let inner = self.inner.read();
        inner
            .groups
            .get(group)
            .map(|members| {
                members
                    .iter()
                    .filter_map(|fp| inner.alerts.get(fp).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drops a group's membership index. The alerts themselves stay until
    /// garbage collection.
    pub fn clear_group(&self, group: &GroupKey) {
        self.inner.write().groups.remove(group);
    }

    /// Returns a snapshot of every currently firing alert.
    #[must_use]
    pub fn firing_snapshot(&self) -> Vec<Alert> {
        self.inner
            .read()
            .alerts
            .values()
            .filter(|a| a.is_firing())
            .cloned()
            .collect()
    }

    /// Resolves firing alerts whose validity horizon has passed, returning
    /// the fingerprints that flipped.
    pub fn expire_stale(&self, now: DateTime<Utc>) -> Vec<Fingerprint> {
        let mut inner = self.inner.write();
        let mut expired = Vec::new();
        for alert in inner.alerts.values_mut() {
            if alert.is_expired(now) {
                alert.resolve(now);
                expired.push(alert.fingerprint());
            }
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "expired stale firing alerts");
        }
        expired
    }

    /// Returns the groups that contain any of the given fingerprints.
    #[must_use]
    pub fn groups_containing(&self, fingerprints: &[Fingerprint]) -> Vec<GroupKey> {
        let inner = self.inner.read();
        inner
            .groups
            .iter()
            .filter(|(_, members)| fingerprints.iter().any(|fp| members.contains(fp)))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Drops resolved alerts past the retention window, pruning them from
    /// group indexes and removing groups that become empty.
    pub fn gc(&self, now: DateTime<Utc>) {
        let horizon =
            now - chrono::Duration::milliseconds(self.retention.as_millis().min(i64::MAX as u128) as i64);
        let mut inner = self.inner.write();

        let stale: Vec<Fingerprint> = inner
            .alerts
            .values()
            .filter(|a| {
                a.status == AlertStatus::Resolved && a.ends_at.is_some_and(|end| end <= horizon)
            })
            .map(Alert::fingerprint)
            .collect();

        if stale.is_empty() {
            return;
        }

        for fp in &stale {
            inner.alerts.remove(fp);
        }
        for members in inner.groups.values_mut() {
            for fp in &stale {
                members.remove(fp);
            }
        }
        inner.groups.retain(|_, members| !members.is_empty());
        debug!(count = stale.len(), "garbage collected resolved alerts");
    }

    /// Returns the number of alerts currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().alerts.len()
    }

    /// Returns true if no alerts are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().alerts.is_empty()
    }
}
