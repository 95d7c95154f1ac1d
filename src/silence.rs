//! Silences: time-bounded matcher predicates that mute matching alerts
//! (spec §3 "Silence", §4.3).

use crate::matcher::Matchers;
use crate::types::{now_millis, LabelSet, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Silence {
    pub id: Uuid,
    pub matchers: Matchers,
    pub starts_at: Timestamp,
    pub ends_at: Timestamp,
    pub created_by: String,
    pub comment: String,
}

impl Silence {
    pub fn new(matchers: Matchers, starts_at: Timestamp, ends_at: Timestamp, created_by: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            matchers,
            starts_at,
            ends_at,
            created_by: created_by.into(),
            comment: comment.into(),
        }
    }

    pub fn is_active_at(&self, now: Timestamp) -> bool {
        now >= self.starts_at && now < self.ends_at
    }

    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        now >= self.ends_at
    }
}

/// Holds the current set of silences and answers "is this label set muted"
/// (spec §4.3). Expired silences are retained until explicitly purged so
/// that `GetSilence` can still return their final state for a while (spec
/// §9 "Silence retention").
pub struct Silencer {
    silences: RwLock<HashMap<Uuid, Silence>>,
}

impl Silencer {
    pub fn new() -> Self {
        Self { silences: RwLock::new(HashMap::new()) }
    }

    pub fn set(&self, silence: Silence) -> Uuid {
        let id = silence.id;
        self.silences.write().expect("lock poisoned").insert(id, silence);
        id
    }

    pub fn get(&self, id: Uuid) -> Option<Silence> {
        self.silences.read().expect("lock poisoned").get(&id).cloned()
    }

    pub fn expire(&self, id: Uuid, now: Timestamp) -> bool {
        let mut silences = self.silences.write().expect("lock poisoned");
        match silences.get_mut(&id) {
            Some(s) if !s.is_expired_at(now) => {
                s.ends_at = now;
                true
            }
            _ => false,
        }
    }

    /// Returns the ids of every currently-active silence matching `labels`,
    /// or an empty vec if none match (spec §4.3 "mute evaluation").
    pub fn matching(&self, labels: &LabelSet, now: Timestamp) -> Vec<Uuid> {
        self.silences
            .read()
            .expect("lock poisoned")
            .values()
            .filter(|s| s.is_active_at(now) && s.matchers.matches(labels))
            .map(|s| s.id)
            .collect()
    }

    pub fn is_muted(&self, labels: &LabelSet) -> bool {
        !self.matching(labels, now_millis()).is_empty()
    }

    /// Drops silences that expired more than `retention` ago.
    pub fn gc(&self, retention_ms: i64, now: Timestamp) {
        self.silences
            .write()
            .expect("lock poisoned")
            .retain(|_, s| now - s.ends_at < retention_ms);
    }
}

impl Default for Silencer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::{Matcher, Op};

    fn labels(pairs: &[(&str, &str)]) -> LabelSet {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn silence_for(name: &str, starts_at: Timestamp, ends_at: Timestamp) -> Silence {
        let m = Matcher::new("alertname", Op::Equal, name).unwrap();
        Silence::new(Matchers::new(vec![m]), starts_at, ends_at, "tester", "")
    }

    #[test]
    fn muted_while_active() {
        let silencer = Silencer::new();
        silencer.set(silence_for("Foo", 0, 1000));
        assert!(silencer.is_muted(&labels(&[("alertname", "Foo")])));
    }

    #[test]
    fn not_muted_after_expiry() {
        let silencer = Silencer::new();
        silencer.set(silence_for("Foo", 0, 10));
        assert!(silencer.matching(&labels(&[("alertname", "Foo")]), 20).is_empty());
    }

    #[test]
    fn expire_sets_ends_at_to_now() {
        let silencer = Silencer::new();
        let s = silence_for("Foo", 0, 1000);
        let id = s.id;
        silencer.set(s);
        assert!(silencer.expire(id, 5));
        assert_eq!(silencer.get(id).unwrap().ends_at, 5);
    }

    #[test]
    fn gc_drops_long_expired_silences() {
        let silencer = Silencer::new();
        silencer.set(silence_for("Foo", 0, 10));
        silencer.gc(5, 100);
        assert!(silencer.silences.read().unwrap().is_empty());
    }
}
