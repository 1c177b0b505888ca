//! Routing tree evaluation.

use std::collections::HashSet;

use vigil_model::LabelSet;

use crate::config::{Route, RouteTimings};

/// The outcome of routing an alert to one receiver.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    /// The receiver to notify.
    pub receiver: String,
    /// The grouping labels of the matched node.
    pub group_by: Vec<String>,
    /// The timing parameters of the matched node.
    pub timings: RouteTimings,
}

enum Walk {
    /// This node did not match; siblings continue.
    NoMatch,
    /// This node (and possibly its subtree) matched and allows matching to
    /// proceed.
    Continue,
    /// A matched node with `continue_matching == false` ends the walk.
    Stop,
}

impl Route {
    /// Routes an alert through the tree, returning every receiver it
    /// reaches.
    ///
    /// The walk is depth-first in document order. A matched node records its
    /// receiver; unless it sets `continue_matching`, the walk stops there.
    /// When several matched nodes name the same receiver, the first match
    /// wins and supplies the grouping and timing parameters.
    #[must_use]
    pub fn match_alert(&self, labels: &LabelSet) -> Vec<RouteMatch> {
        let mut matches = Vec::new();
        let mut seen = HashSet::new();
        let _ = walk(self, labels, &mut matches, &mut seen);
        matches
    }
}

fn walk(
    route: &Route,
    labels: &LabelSet,
    matches: &mut Vec<RouteMatch>,
    seen: &mut HashSet<String>,
) -> Walk {
    if !route.matches(labels) {
        return Walk::NoMatch;
    }

    if let Some(receiver) = &route.receiver {
        if seen.insert(receiver.clone()) {
            matches.push(RouteMatch {
                receiver: receiver.clone(),
                group_by: route.group_by.clone(),
                timings: route.timings.clone(),
            });
        }
    }

    for child in &route.routes {
        if let Walk::Stop = walk(child, labels, matches, seen) {
            return Walk::Stop;
        }
    }

    if route.continue_matching {
        Walk::Continue
    } else {
        Walk::Stop
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vigil_model::Matcher;

    fn labels(pairs: &[(&str, &str)]) -> LabelSet {
        pairs.iter().copied().collect()
    }

    fn receivers(matches: &[RouteMatch]) -> Vec<&str> {
        matches.iter().map(|m| m.receiver.as_str()).collect()
    }

    #[test]
    fn root_catches_everything() {
        let route = Route::builder().receiver("ops").build();
        let matches = route.match_alert(&labels(&[("alertname", "HighCPU")]));
        assert_eq!(receivers(&matches), ["ops"]);
    }

    #[test]
    fn child_match_stops_at_child() {
        let route = Route::builder()
            .receiver("ops")
            .route(
                Route::builder()
                    .matcher(Matcher::equals("team", "db"))
                    .receiver("db-pager")
                    .build(),
            )
            .build();

        let matches = route.match_alert(&labels(&[("team", "db")]));
        assert_eq!(receivers(&matches), ["ops", "db-pager"]);

        let fallback = route.match_alert(&labels(&[("team", "web")]));
        assert_eq!(receivers(&fallback), ["ops"]);
    }

    #[test]
    fn first_matching_sibling_wins_without_continue() {
        let route = Route::builder()
            .receiver("ops")
            .route(
                Route::builder()
                    .matcher(Matcher::exists("severity"))
                    .receiver("first")
                    .build(),
            )
            .route(
                Route::builder()
                    .matcher(Matcher::exists("severity"))
                    .receiver("second")
                    .build(),
            )
            .build();

        let matches = route.match_alert(&labels(&[("severity", "critical")]));
        assert_eq!(receivers(&matches), ["ops", "first"]);
    }

    #[test]
    fn continue_matching_reaches_later_siblings() {
        let route = Route::builder()
            .receiver("ops")
            .route(
                Route::builder()
                    .matcher(Matcher::exists("severity"))
                    .receiver("first")
                    .continue_matching(true)
                    .build(),
            )
            .route(
                Route::builder()
                    .matcher(Matcher::exists("severity"))
                    .receiver("second")
                    .build(),
            )
            .build();

        let matches = route.match_alert(&labels(&[("severity", "critical")]));
        assert_eq!(receivers(&matches), ["ops", "first", "second"]);
    }

    #[test]
    fn stop_in_grandchild_propagates() {
        let route = Route::builder()
            .receiver("ops")
            .route(
                Route::builder()
                    .matcher(Matcher::equals("env", "prod"))
                    .receiver("prod")
                    .continue_matching(true)
                    .route(
                        Route::builder()
                            .matcher(Matcher::equals("severity", "critical"))
                            .receiver("pager")
                            .build(),
                    )
                    .build(),
            )
            .route(
                Route::builder()
                    .matcher(Matcher::exists("env"))
                    .receiver("audit")
                    .build(),
            )
            .build();

        // The grandchild matches and does not continue, so the walk never
        // reaches the audit sibling.
        let critical = route.match_alert(&labels(&[("env", "prod"), ("severity", "critical")]));
        assert_eq!(receivers(&critical), ["ops", "prod", "pager"]);

        // Without the grandchild match, continue_matching on the prod node
        // lets the audit sibling match too.
        let warning = route.match_alert(&labels(&[("env", "prod"), ("severity", "warning")]));
        assert_eq!(receivers(&warning), ["ops", "prod", "audit"]);
    }

    #[test]
    fn duplicate_receiver_first_match_supplies_parameters() {
        let route = Route::builder()
            .receiver("ops")
            .group_by(["alertname"])
            .group_wait(Duration::from_secs(10))
            .continue_matching(true)
            .route(
                Route::builder()
                    .matcher(Matcher::exists("severity"))
                    .receiver("ops")
                    .group_by(["node"])
                    .group_wait(Duration::from_secs(99))
                    .build(),
            )
            .build();

        let matches = route.match_alert(&labels(&[("severity", "critical")]));
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].receiver, "ops");
        assert_eq!(matches[0].group_by, ["alertname"]);
        assert_eq!(matches[0].timings.group_wait, Duration::from_secs(10));
    }

    #[test]
    fn matching_is_deterministic() {
        let route = Route::builder()
            .receiver("ops")
            .route(
                Route::builder()
                    .matcher(Matcher::equals("team", "db"))
                    .receiver("db-pager")
                    .build(),
            )
            .build();
        let set = labels(&[("team", "db"), ("alertname", "HighCPU")]);

        let first = receivers(&route.match_alert(&set))
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        let second = receivers(&route.match_alert(&set))
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        assert_eq!(first, second);
    }

    #[test]
    fn non_matching_tree_returns_empty() {
        let route = Route::builder()
            .matcher(Matcher::equals("env", "prod"))
            .receiver("ops")
            .build();
        assert!(route.match_alert(&labels(&[("env", "dev")])).is_empty());
    }
}
