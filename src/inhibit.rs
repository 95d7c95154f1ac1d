//! Inhibition: suppress target alerts while a matching source alert is
//! firing (spec §3 "Inhibit rule", §4.4).

use crate::alert::Alert;
use crate::matcher::Matchers;
use crate::provider::ProviderCallback;
use crate::types::LabelSet;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone)]
pub struct InhibitRule {
    pub source_matchers: Matchers,
    pub target_matchers: Matchers,
    /// Labels that must carry equal values on both the source and target
    /// alert for the rule to apply (spec §4.4 "equal").
    pub equal_labels: Vec<String>,
}

impl InhibitRule {
    fn equal_key(&self, labels: &LabelSet) -> Vec<Option<String>> {
        self.equal_labels.iter().map(|name| labels.get(name).cloned()).collect()
    }
}

/// Caches, per rule, the set of `equal`-label value tuples currently firing
/// on a matching source alert, so `is_inhibited` is a cheap lookup instead
/// of a scan over every alert for every candidate target (spec §4.4
/// "inhibition lookup cost").
pub struct Inhibitor {
    rules: Vec<InhibitRule>,
    cache: RwLock<Vec<HashMap<Vec<Option<String>>, u32>>>,
}

impl Inhibitor {
    pub fn new(rules: Vec<InhibitRule>) -> Self {
        let cache = rules.iter().map(|_| HashMap::new()).collect();
        Self { rules, cache: RwLock::new(cache) }
    }

    /// Registers `alert` as a source if it matches a rule's source matchers,
    /// incrementing the refcount for its `equal` key. Call on every `Put`.
    pub fn observe(&self, alert: &Alert) {
        if alert.is_resolved() {
            return;
        }
        let mut cache = self.cache.write().expect("lock poisoned");
        for (i, rule) in self.rules.iter().enumerate() {
            if rule.source_matchers.matches(&alert.labels) {
                *cache[i].entry(rule.equal_key(&alert.labels)).or_insert(0) += 1;
            }
        }
    }

    /// Called from the provider's `post_delete`/resolve path, mirroring
    /// [`Inhibitor::observe`], so the cache never outlives the alerts that
    /// populated it.
    pub fn forget(&self, alert: &Alert) {
        let mut cache = self.cache.write().expect("lock poisoned");
        for (i, rule) in self.rules.iter().enumerate() {
            if rule.source_matchers.matches(&alert.labels) {
                let key = rule.equal_key(&alert.labels);
                if let Some(count) = cache[i].get_mut(&key) {
                    *count -= 1;
                    if *count == 0 {
                        cache[i].remove(&key);
                    }
                }
            }
        }
    }

    /// True if some currently-firing source alert matches `labels` as a
    /// target, with equal `equal_labels` values (spec §4.4).
    pub fn is_inhibited(&self, labels: &LabelSet) -> bool {
        let cache = self.cache.read().expect("lock poisoned");
        self.rules.iter().enumerate().any(|(i, rule)| {
            rule.target_matchers.matches(labels) && cache[i].contains_key(&rule.equal_key(labels))
        })
    }
}

/// Rides the provider's admission/lifecycle hooks so the cache tracks
/// exactly the alerts the store currently holds: a resolving `Put` forgets
/// the source immediately, and GC eviction catches the rest (spec §4.4).
impl ProviderCallback for Inhibitor {
    fn post_store(&self, alert: &Alert) {
        if alert.is_resolved() {
            self.forget(alert);
        } else {
            self.observe(alert);
        }
    }

    fn post_delete(&self, alert: &Alert) {
        self.forget(alert);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::{Matcher, Op};
    use crate::types::now_millis;

    fn labels(pairs: &[(&str, &str)]) -> LabelSet {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn alert(labels_in: LabelSet) -> Alert {
        Alert {
            labels: labels_in,
            annotations: LabelSet::default(),
            starts_at: now_millis(),
            ends_at: 0,
            generator_url: String::new(),
            updated_at: now_millis(),
            timeout: false,
        }
    }

    fn rule() -> InhibitRule {
        InhibitRule {
            source_matchers: Matchers::new(vec![Matcher::new("severity", Op::Equal, "critical").unwrap()]),
            target_matchers: Matchers::new(vec![Matcher::new("severity", Op::Equal, "warning").unwrap()]),
            equal_labels: vec!["cluster".to_string()],
        }
    }

    #[test]
    fn target_inhibited_while_source_firing() {
        let inhibitor = Inhibitor::new(vec![rule()]);
        inhibitor.observe(&alert(labels(&[("severity", "critical"), ("cluster", "a")])));
        assert!(inhibitor.is_inhibited(&labels(&[("severity", "warning"), ("cluster", "a")])));
    }

    #[test]
    fn target_not_inhibited_when_equal_labels_differ() {
        let inhibitor = Inhibitor::new(vec![rule()]);
        inhibitor.observe(&alert(labels(&[("severity", "critical"), ("cluster", "a")])));
        assert!(!inhibitor.is_inhibited(&labels(&[("severity", "warning"), ("cluster", "b")])));
    }

    #[test]
    fn forget_releases_inhibition_once_refcount_hits_zero() {
        let inhibitor = Inhibitor::new(vec![rule()]);
        let source = alert(labels(&[("severity", "critical"), ("cluster", "a")]));
        inhibitor.observe(&source);
        inhibitor.forget(&source);
        assert!(!inhibitor.is_inhibited(&labels(&[("severity", "warning"), ("cluster", "a")])));
    }

    #[test]
    fn post_store_forgets_once_the_source_resolves() {
        let inhibitor = Inhibitor::new(vec![rule()]);
        let target = labels(&[("severity", "warning"), ("cluster", "a")]);

        let mut source = alert(labels(&[("severity", "critical"), ("cluster", "a")]));
        inhibitor.post_store(&source);
        assert!(inhibitor.is_inhibited(&target));

        source.ends_at = 1;
        inhibitor.post_store(&source);
        assert!(!inhibitor.is_inhibited(&target));
    }

    #[test]
    fn post_delete_forgets_an_evicted_source() {
        let inhibitor = Inhibitor::new(vec![rule()]);
        let target = labels(&[("severity", "warning"), ("cluster", "a")]);
        let source = alert(labels(&[("severity", "critical"), ("cluster", "a")]));

        inhibitor.post_store(&source);
        assert!(inhibitor.is_inhibited(&target));

        inhibitor.post_delete(&source);
        assert!(!inhibitor.is_inhibited(&target));
    }
}
