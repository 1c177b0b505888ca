//! Label sets and fingerprints.
//!
//! A [`LabelSet`] is an ordered mapping of label names to values. The
//! [`Fingerprint`] derived from it is the identity of an alert: it covers
//! the label pairs only, so annotations and timestamps never change which
//! alert a report belongs to.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A stable 64-bit hash of a label set, used as alert identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Returns the raw hash value.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// An ordered mapping of label names to values.
///
/// Iteration order is the lexicographic order of label names, which makes
/// fingerprinting and group-key derivation deterministic without an extra
/// sorting step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSet(BTreeMap<String, String>);

impl LabelSet {
    /// Creates an empty label set.
    #[must_use]
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Inserts a label, replacing any previous value for the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    /// Returns the value for a label name, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Returns true if the label name is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Returns the number of labels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the set has no labels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over `(name, value)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Computes the fingerprint of this label set.
    ///
    /// The hash covers every `(name, value)` pair in name order and nothing
    /// else, so label sets that compare equal always fingerprint equal.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        for (name, value) in &self.0 {
            name.hash(&mut hasher);
            value.hash(&mut hasher);
        }
        Fingerprint(hasher.finish())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for LabelSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{name}=\"{value}\"")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn labels(pairs: &[(&str, &str)]) -> LabelSet {
        pairs.iter().copied().collect()
    }

    #[test]
    fn insert_and_get() {
        let mut set = LabelSet::new();
        set.insert("alertname", "HighCPU");
        set.insert("node", "node-1");

        assert_eq!(set.get("alertname"), Some("HighCPU"));
        assert_eq!(set.get("node"), Some("node-1"));
        assert_eq!(set.get("missing"), None);
        assert_eq!(set.len(), 2);
        assert!(!set.is_empty());
    }

    #[test]
    fn insert_replaces_value() {
        let mut set = labels(&[("env", "staging")]);
        set.insert("env", "prod");

        assert_eq!(set.get("env"), Some("prod"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn display_is_sorted() {
        let set = labels(&[("zone", "us-west"), ("alertname", "HighCPU")]);
        assert_eq!(set.to_string(), "{alertname=\"HighCPU\",zone=\"us-west\"}");
    }

    #[test]
    fn fingerprint_ignores_insertion_order() {
        let mut a = LabelSet::new();
        a.insert("alertname", "HighCPU");
        a.insert("node", "node-1");

        let mut b = LabelSet::new();
        b.insert("node", "node-1");
        b.insert("alertname", "HighCPU");

        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_differs_on_value_change() {
        let a = labels(&[("alertname", "HighCPU"), ("node", "node-1")]);
        let b = labels(&[("alertname", "HighCPU"), ("node", "node-2")]);

        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_differs_on_extra_label() {
        let a = labels(&[("alertname", "HighCPU")]);
        let b = labels(&[("alertname", "HighCPU"), ("node", "node-1")]);

        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_display_is_hex() {
        let fp = labels(&[("a", "b")]).fingerprint();
        let rendered = fp.to_string();
        assert_eq!(rendered.len(), 16);
        assert!(rendered.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn serialization_roundtrip() {
        let set = labels(&[("alertname", "HighCPU"), ("node", "node-1")]);
        let json = serde_json::to_string(&set).unwrap();
        let parsed: LabelSet = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, set);
        assert_eq!(parsed.fingerprint(), set.fingerprint());
    }

    proptest! {
        #[test]
        fn equal_sets_fingerprint_equal(pairs in proptest::collection::btree_map("[a-z]{1,8}", "[a-z0-9]{0,8}", 0..6)) {
            let a: LabelSet = pairs.clone().into_iter().collect();
            let b: LabelSet = pairs.into_iter().collect();
            prop_assert_eq!(a.fingerprint(), b.fingerprint());
        }

        #[test]
        fn changed_value_fingerprint_differs(
            pairs in proptest::collection::btree_map("[a-z]{1,8}", "[a-z0-9]{1,8}", 1..6),
            suffix in "[a-z0-9]{1,4}",
        ) {
            let a: LabelSet = pairs.clone().into_iter().collect();
            let mut mutated = pairs;
            // Append to the first value so the sets are guaranteed to differ.
            if let Some((name, value)) = mutated.iter().next().map(|(k, v)| (k.clone(), v.clone())) {
                mutated.insert(name, format!("{value}{suffix}"));
            }
            let b: LabelSet = mutated.into_iter().collect();
            prop_assert_ne!(a.fingerprint(), b.fingerprint());
        }
    }
}
