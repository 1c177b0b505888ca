//! Routing, inhibition, and receiver configuration.
//!
//! The engine never parses raw configuration text; an external loader hands
//! it a ready-made [`RuleSet`]. Validation here is the last gate before
//! startup or reload: a [`RuleSet`] that fails [`RuleSet::validate`] must
//! never drive the engine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use vigil_model::{AlertSeverity, LabelSet, Matcher};

use crate::error::{EngineError, Result};
use crate::notify::Notifier;

/// Default initial wait before a new group's first notification.
pub const DEFAULT_GROUP_WAIT: Duration = Duration::from_secs(30);
/// Default spacing between update notifications for a changed group.
pub const DEFAULT_GROUP_INTERVAL: Duration = Duration::from_secs(300);
/// Default spacing between repeat notifications for an unchanged group.
pub const DEFAULT_REPEAT_INTERVAL: Duration = Duration::from_secs(4 * 3600);

/// Timing parameters attached to a route.
#[derive(Debug, Clone)]
pub struct RouteTimings {
    /// Initial wait after a group first materializes.
    pub group_wait: Duration,
    /// Wait applied to subsequent changes, collapsing bursts into one update.
    pub group_interval: Duration,
    /// Minimum spacing between notifications for an unchanged firing group.
    pub repeat_interval: Duration,
    /// Per-severity overrides for `repeat_interval`.
    pub repeat_overrides: HashMap<AlertSeverity, Duration>,
}

impl Default for RouteTimings {
    fn default() -> Self {
        Self {
            group_wait: DEFAULT_GROUP_WAIT,
            group_interval: DEFAULT_GROUP_INTERVAL,
            repeat_interval: DEFAULT_REPEAT_INTERVAL,
            repeat_overrides: HashMap::new(),
        }
    }
}

impl RouteTimings {
    /// Returns the repeat interval for a severity, preferring the override.
    #[must_use]
    pub fn repeat_for(&self, severity: AlertSeverity) -> Duration {
        self.repeat_overrides
            .get(&severity)
            .copied()
            .unwrap_or(self.repeat_interval)
    }
}

/// A node in the routing tree.
///
/// A route matches an alert when every matcher passes. Children are only
/// evaluated when the parent matches, in document order. A matched node with
/// `continue_matching == false` ends matching at that node.
#[derive(Debug, Clone)]
pub struct Route {
    /// Predicates that must all pass for this node to match.
    pub matchers: Vec<Matcher>,
    /// Receiver notified for groups routed here, if any.
    pub receiver: Option<String>,
    /// Label names whose projection defines the group key.
    pub group_by: Vec<String>,
    /// Timing parameters for groups routed here.
    pub timings: RouteTimings,
    /// Whether matching proceeds past this node once it matches.
    pub continue_matching: bool,
    /// Child routes, in document order.
    pub routes: Vec<Route>,
}

impl Route {
    /// Creates a new route builder.
    #[must_use]
    pub fn builder() -> RouteBuilder {
        RouteBuilder::default()
    }

    /// Returns true if every matcher passes against the labels.
    #[must_use]
    pub fn matches(&self, labels: &LabelSet) -> bool {
        self.matchers.iter().all(|m| m.matches(labels))
    }
}

/// Builder for [`Route`] instances.
#[derive(Debug, Default)]
pub struct RouteBuilder {
    matchers: Vec<Matcher>,
    receiver: Option<String>,
    group_by: Vec<String>,
    timings: Option<RouteTimings>,
    continue_matching: bool,
    routes: Vec<Route>,
}

impl RouteBuilder {
    /// Adds a matcher to the route.
    #[must_use]
    pub fn matcher(mut self, matcher: Matcher) -> Self {
        self.matchers.push(matcher);
        self
    }

    /// Sets the receiver name.
    #[must_use]
    pub fn receiver(mut self, name: impl Into<String>) -> Self {
        self.receiver = Some(name.into());
        self
    }

    /// Sets the grouping labels.
    #[must_use]
    pub fn group_by<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_by = names.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the initial group wait.
    #[must_use]
    pub fn group_wait(mut self, wait: Duration) -> Self {
        self.timings_mut().group_wait = wait;
        self
    }

    /// Sets the update interval.
    #[must_use]
    pub fn group_interval(mut self, interval: Duration) -> Self {
        self.timings_mut().group_interval = interval;
        self
    }

    /// Sets the default repeat interval.
    #[must_use]
    pub fn repeat_interval(mut self, interval: Duration) -> Self {
        self.timings_mut().repeat_interval = interval;
        self
    }

    /// Adds a severity-specific repeat interval override.
    #[must_use]
    pub fn repeat_override(mut self, severity: AlertSeverity, interval: Duration) -> Self {
        self.timings_mut().repeat_overrides.insert(severity, interval);
        self
    }

    /// Sets whether matching continues past this node.
    #[must_use]
    pub fn continue_matching(mut self, cont: bool) -> Self {
        self.continue_matching = cont;
        self
    }

    /// Appends a child route (document order).
    #[must_use]
    pub fn route(mut self, child: Route) -> Self {
        self.routes.push(child);
        self
    }

    fn timings_mut(&mut self) -> &mut RouteTimings {
        self.timings.get_or_insert_with(RouteTimings::default)
    }

    /// Builds the [`Route`]. Structural validation happens in
    /// [`RuleSet::validate`], not here.
    #[must_use]
    pub fn build(self) -> Route {
        Route {
            matchers: self.matchers,
            receiver: self.receiver,
            group_by: self.group_by,
            timings: self.timings.unwrap_or_default(),
            continue_matching: self.continue_matching,
            routes: self.routes,
        }
    }
}

/// A rule suppressing target alerts while a matching source alert fires.
#[derive(Debug, Clone)]
pub struct InhibitRule {
    /// Matchers selecting alerts that can act as inhibition sources.
    pub source_match: Vec<Matcher>,
    /// Matchers selecting alerts that may be suppressed.
    pub target_match: Vec<Matcher>,
    /// Label names whose values must agree between source and target.
    pub equal_labels: Vec<String>,
}

impl InhibitRule {
    /// Creates a new inhibition rule.
    #[must_use]
    pub fn new(
        source_match: Vec<Matcher>,
        target_match: Vec<Matcher>,
        equal_labels: Vec<String>,
    ) -> Self {
        Self {
            source_match,
            target_match,
            equal_labels,
        }
    }

    /// Returns true if the labels satisfy every source matcher.
    #[must_use]
    pub fn matches_source(&self, labels: &LabelSet) -> bool {
        self.source_match.iter().all(|m| m.matches(labels))
    }

    /// Returns true if the labels satisfy every target matcher.
    #[must_use]
    pub fn matches_target(&self, labels: &LabelSet) -> bool {
        self.target_match.iter().all(|m| m.matches(labels))
    }

    /// Returns true if source and target select the identical alert set.
    ///
    /// With equal source and target matcher sets, every `equal_labels`
    /// constraint is trivially satisfied by an alert against itself, so the
    /// rule could only ever self-inhibit.
    #[must_use]
    pub fn is_self_inhibiting(&self) -> bool {
        !self.source_match.is_empty()
            && self.source_match.len() == self.target_match.len()
            && self
                .source_match
                .iter()
                .all(|m| self.target_match.contains(m))
    }
}

/// A named notification destination with its ordered notifiers.
#[derive(Debug)]
pub struct Receiver {
    name: String,
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl Receiver {
    /// Creates a receiver with no notifiers.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            notifiers: Vec::new(),
        }
    }

    /// Appends a notifier.
    #[must_use]
    pub fn with_notifier(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifiers.push(Arc::new(notifier));
        self
    }

    /// Returns the receiver name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the notifiers in configuration order.
    #[must_use]
    pub fn notifiers(&self) -> &[Arc<dyn Notifier>] {
        &self.notifiers
    }
}

/// The full, immutable routing configuration: routing tree, inhibition
/// rules, and receiver registry. Swapped atomically on reload.
#[derive(Debug)]
pub struct RuleSet {
    /// The root of the routing tree.
    pub route: Route,
    /// Inhibition rules, evaluated over a snapshot of firing alerts.
    pub inhibit_rules: Vec<InhibitRule>,
    receivers: HashMap<String, Receiver>,
}

impl RuleSet {
    /// Creates a rule set from a routing tree, inhibition rules, and
    /// receivers.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] if two receivers share a name.
    pub fn new(
        route: Route,
        inhibit_rules: Vec<InhibitRule>,
        receivers: Vec<Receiver>,
    ) -> Result<Self> {
        let mut map = HashMap::with_capacity(receivers.len());
        for receiver in receivers {
            if map.contains_key(receiver.name()) {
                return Err(EngineError::InvalidConfig {
                    reason: format!("duplicate receiver name '{}'", receiver.name()),
                });
            }
            map.insert(receiver.name().to_string(), receiver);
        }
        Ok(Self {
            route,
            inhibit_rules,
            receivers: map,
        })
    }

    /// Looks up a receiver by name.
    #[must_use]
    pub fn receiver(&self, name: &str) -> Option<&Receiver> {
        self.receivers.get(name)
    }

    /// Returns the registered receiver names.
    pub fn receiver_names(&self) -> impl Iterator<Item = &str> {
        self.receivers.keys().map(String::as_str)
    }

    /// Validates the configuration. Must pass before the rule set is
    /// installed; failure here prevents startup.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidConfig`] if the root route names no default
    ///   receiver, a subtree can match alerts but route them nowhere, or an
    ///   inhibition rule is degenerate or self-inhibiting.
    /// - [`EngineError::UnknownReceiver`] if a route references a receiver
    ///   that is not registered.
    pub fn validate(&self) -> Result<()> {
        if self.route.receiver.is_none() {
            return Err(EngineError::InvalidConfig {
                reason: "root route must name a default receiver".to_string(),
            });
        }

        self.validate_route(&self.route, true)?;

        for (i, rule) in self.inhibit_rules.iter().enumerate() {
            if rule.source_match.is_empty() || rule.target_match.is_empty() {
                return Err(EngineError::InvalidConfig {
                    reason: format!("inhibition rule {i} must have source and target matchers"),
                });
            }
            if rule.is_self_inhibiting() {
                return Err(EngineError::InvalidConfig {
                    reason: format!(
                        "inhibition rule {i} is self-inhibiting: source and target select the same alerts"
                    ),
                });
            }
        }

        Ok(())
    }

    fn validate_route(&self, route: &Route, is_root: bool) -> Result<()> {
        if let Some(name) = &route.receiver {
            if !self.receivers.contains_key(name) {
                return Err(EngineError::UnknownReceiver { name: name.clone() });
            }
        }

        if !is_root && route.matchers.is_empty() && route.receiver.is_none() && route.routes.is_empty()
        {
            return Err(EngineError::InvalidConfig {
                reason: "route matches every alert but has no receiver and no children".to_string(),
            });
        }

        for child in &route.routes {
            self.validate_route(child, false)?;
        }

        Ok(())
    }
}
