//! Inhibition: suppressing alerts while a related source alert fires.

use vigil_model::Alert;

use crate::config::InhibitRule;

/// Evaluates inhibition rules against a snapshot of firing alerts.
///
/// Inhibition does not chain: a source that is itself inhibited by another
/// firing alert loses its power to inhibit. The check is one hop deep, which
/// keeps evaluation terminating without a fixpoint computation.
#[derive(Debug)]
pub struct InhibitionEngine<'a> {
    rules: &'a [InhibitRule],
}

impl<'a> InhibitionEngine<'a> {
    /// Creates an engine over the given rules.
    #[must_use]
    pub fn new(rules: &'a [InhibitRule]) -> Self {
        Self { rules }
    }

    /// Returns true if `candidate` is inhibited by any firing alert in
    /// `active`.
    #[must_use]
    pub fn is_inhibited(&self, candidate: &Alert, active: &[Alert]) -> bool {
        self.inhibited_raw(candidate, active, true)
    }

    fn inhibited_raw(&self, candidate: &Alert, active: &[Alert], check_sources: bool) -> bool {
        for rule in self.rules {
            if !rule.matches_target(candidate.labels()) {
                continue;
            }
            for source in active {
                if !source.is_firing() {
                    continue;
                }
                // An alert never inhibits itself.
                if source.fingerprint() == candidate.fingerprint() {
                    continue;
                }
                if !rule.matches_source(source.labels()) {
                    continue;
                }
                if !equal_labels_agree(rule, source, candidate) {
                    continue;
                }
                // One-hop check: an inhibited source cannot inhibit.
                if check_sources && self.inhibited_raw(source, active, false) {
                    continue;
                }
                return true;
            }
        }
        false
    }
}

fn equal_labels_agree(rule: &InhibitRule, source: &Alert, target: &Alert) -> bool {
    rule.equal_labels
        .iter()
        .all(|name| source.labels().get(name) == target.labels().get(name))
}
