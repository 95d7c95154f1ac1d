//! The static routing tree: matches alerts to receivers and grouping
//! policy (spec §3 "Route", §4.2 aggregation grouping).

use crate::matcher::Matchers;
use crate::types::LabelSet;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which labels an aggregation group is keyed by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GroupBy {
    /// Group by the named labels only.
    Labels(Vec<String>),
    /// Group by every label present on the alert (spec §9 Open Question (b):
    /// the group key then includes whatever labels happen to be present,
    /// so alerts with different label sets never share a group even if
    /// their named labels match).
    AllLabels,
}

impl Default for GroupBy {
    fn default() -> Self {
        GroupBy::Labels(Vec::new())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub receiver: String,
    pub group_by: GroupBy,
    pub group_wait: Option<Duration>,
    pub group_interval: Option<Duration>,
    pub repeat_interval: Option<Duration>,
}

/// A node in the route tree. Matchers gate whether this node (and its
/// children) apply to a given alert; `continue_matching` controls whether
/// sibling/parent routes still get a chance after this one matches (spec
/// §4.2 "route matching").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub matchers: Matchers,
    pub config: RouteConfig,
    pub continue_matching: bool,
    pub children: Vec<Route>,
}

/// The fully-resolved grouping/receiver policy for one alert, after walking
/// the route tree (spec §4.2).
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRoute {
    pub receiver: String,
    pub group_wait: Duration,
    pub group_interval: Duration,
    pub repeat_interval: Duration,
    pub group_key: Vec<(String, String)>,
}

pub struct RouteTree {
    root: Route,
    defaults: crate::config::Settings,
}

impl RouteTree {
    pub fn new(root: Route, defaults: crate::config::Settings) -> Self {
        Self { root, defaults }
    }

    /// Returns every route that should receive this alert (spec §4.2 "route
    /// matching", step 1): a route that matches but whose matching children
    /// cover it entirely contributes nothing itself; a route contributes
    /// itself only when it matches and none of its children did. Among
    /// siblings, a non-continuing match stops the walk at that level so
    /// later siblings are skipped; a continuing match lets the walk keep
    /// trying them.
    pub fn matching_routes<'a>(&'a self, labels: &LabelSet) -> Vec<&'a Route> {
        let mut out = Vec::new();
        Self::walk(&self.root, labels, &mut out);
        out
    }

    fn walk<'a>(route: &'a Route, labels: &LabelSet, out: &mut Vec<&'a Route>) -> bool {
        if !route.matchers.matches(labels) {
            return false;
        }
        let mut any_child_matched = false;
        for child in &route.children {
            let matched = Self::walk(child, labels, out);
            if matched {
                any_child_matched = true;
                if !child.continue_matching {
                    break;
                }
            }
        }
        if !any_child_matched {
            out.push(route);
        }
        true
    }

    fn resolve_one(&self, route: &Route, labels: &LabelSet) -> ResolvedRoute {
        let group_key = match &route.config.group_by {
            GroupBy::Labels(names) => names
                .iter()
                .map(|n| (n.clone(), labels.get(n).cloned().unwrap_or_default()))
                .collect(),
            GroupBy::AllLabels => {
                let mut pairs: Vec<(String, String)> =
                    labels.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                pairs.sort();
                pairs
            }
        };

        ResolvedRoute {
            receiver: route.config.receiver.clone(),
            group_wait: route.config.group_wait.unwrap_or(self.defaults.default_group_wait),
            group_interval: route.config.group_interval.unwrap_or(self.defaults.default_group_interval),
            repeat_interval: route.config.repeat_interval.unwrap_or(self.defaults.default_repeat_interval),
            group_key,
        }
    }

    /// Resolves every route this alert fans out to (spec §4.2 step 1: emit
    /// `(route, groupKey, alert)` to every matching route's group).
    pub fn resolve_all(&self, labels: &LabelSet) -> Vec<ResolvedRoute> {
        self.matching_routes(labels).into_iter().map(|route| self.resolve_one(route, labels)).collect()
    }

    /// Convenience for callers that only want the single most specific
    /// match (the last one produced by [`RouteTree::matching_routes`]).
    pub fn resolve(&self, labels: &LabelSet) -> Option<ResolvedRoute> {
        let route = self.matching_routes(labels).pop()?;
        Some(self.resolve_one(route, labels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::matcher::{Matcher, Op};

    fn labels(pairs: &[(&str, &str)]) -> LabelSet {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn leaf(receiver: &str, matchers: Vec<Matcher>) -> Route {
        Route {
            matchers: Matchers::new(matchers),
            config: RouteConfig {
                receiver: receiver.to_string(),
                group_by: GroupBy::Labels(vec!["alertname".to_string()]),
                group_wait: None,
                group_interval: None,
                repeat_interval: None,
            },
            continue_matching: false,
            children: Vec::new(),
        }
    }

    #[test]
    fn most_specific_child_wins() {
        let child = leaf("team-db", vec![Matcher::new("team", Op::Equal, "db").unwrap()]);
        let root = Route {
            matchers: Matchers::default(),
            config: RouteConfig {
                receiver: "default".to_string(),
                group_by: GroupBy::default(),
                group_wait: None,
                group_interval: None,
                repeat_interval: None,
            },
            continue_matching: false,
            children: vec![child],
        };
        let tree = RouteTree::new(root, Settings::default());
        let resolved = tree.resolve(&labels(&[("team", "db"), ("alertname", "Foo")])).unwrap();
        assert_eq!(resolved.receiver, "team-db");
        assert_eq!(resolved.group_key, vec![("alertname".to_string(), "Foo".to_string())]);
    }

    #[test]
    fn falls_back_to_root_defaults() {
        let root = Route {
            matchers: Matchers::default(),
            config: RouteConfig {
                receiver: "default".to_string(),
                group_by: GroupBy::default(),
                group_wait: None,
                group_interval: None,
                repeat_interval: None,
            },
            continue_matching: false,
            children: Vec::new(),
        };
        let tree = RouteTree::new(root, Settings::default());
        let resolved = tree.resolve(&labels(&[("alertname", "Foo")])).unwrap();
        assert_eq!(resolved.receiver, "default");
        assert_eq!(resolved.group_wait, Settings::default().default_group_wait);
    }

    #[test]
    fn continue_matching_fans_out_to_multiple_receivers() {
        let mut page = leaf("page", vec![Matcher::new("severity", Op::Equal, "critical").unwrap()]);
        page.continue_matching = true;
        let ticket = leaf("ticket", vec![Matcher::new("team", Op::Equal, "db").unwrap()]);
        let root = Route {
            matchers: Matchers::default(),
            config: RouteConfig {
                receiver: "default".to_string(),
                group_by: GroupBy::default(),
                group_wait: None,
                group_interval: None,
                repeat_interval: None,
            },
            continue_matching: false,
            children: vec![page, ticket],
        };
        let tree = RouteTree::new(root, Settings::default());
        let resolved = tree.resolve_all(&labels(&[("severity", "critical"), ("team", "db"), ("alertname", "Foo")]));
        let receivers: Vec<&str> = resolved.iter().map(|r| r.receiver.as_str()).collect();
        assert_eq!(receivers, vec!["page", "ticket"]);
    }

    #[test]
    fn non_continuing_match_stops_later_siblings() {
        let page = leaf("page", vec![Matcher::new("severity", Op::Equal, "critical").unwrap()]);
        let ticket = leaf("ticket", vec![Matcher::new("team", Op::Equal, "db").unwrap()]);
        let root = Route {
            matchers: Matchers::default(),
            config: RouteConfig {
                receiver: "default".to_string(),
                group_by: GroupBy::default(),
                group_wait: None,
                group_interval: None,
                repeat_interval: None,
            },
            continue_matching: false,
            children: vec![page, ticket],
        };
        let tree = RouteTree::new(root, Settings::default());
        let resolved = tree.resolve_all(&labels(&[("severity", "critical"), ("team", "db"), ("alertname", "Foo")]));
        let receivers: Vec<&str> = resolved.iter().map(|r| r.receiver.as_str()).collect();
        assert_eq!(receivers, vec!["page"]);
    }
}
