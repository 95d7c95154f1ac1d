//! Alerts and their fingerprint identity (spec §3 "Alert", §4.1).

use crate::types::{now_millis, LabelSet, Timestamp};
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::Xxh3;
use std::hash::Hasher;

/// A 64-bit identity derived from a label set. Two alerts with the same
/// labels always collide onto the same fingerprint; annotations and
/// timestamps never affect it (spec §3 "Alert").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(pub u64);

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Hashes a label set into a [`Fingerprint`], sorting pairs first so that
/// map iteration order never affects the result.
pub fn fingerprint(labels: &LabelSet) -> Fingerprint {
    let mut pairs: Vec<(&str, &str)> =
        labels.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    pairs.sort_unstable();

    let mut hasher = Xxh3::new();
    for (k, v) in pairs {
        hasher.write(k.as_bytes());
        hasher.write_u8(0xff);
        hasher.write(v.as_bytes());
        hasher.write_u8(0xff);
    }
    Fingerprint(hasher.finish())
}

/// The triggered alert as stored and routed within the service (spec §3
/// "Alert", §4.1 "merge rule").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub labels: LabelSet,
    pub annotations: LabelSet,
    pub starts_at: Timestamp,
    /// Zero means "still firing". Any positive value is a resolve time,
    /// either client-supplied or `updated_at + resolve_timeout` from GC.
    pub ends_at: Timestamp,
    pub generator_url: String,
    pub updated_at: Timestamp,
    /// Client-declared timeout; zero defers to the provider's
    /// `resolve_timeout` default.
    pub timeout: bool,
}

impl Alert {
    pub fn fingerprint(&self) -> Fingerprint {
        fingerprint(&self.labels)
    }

    /// An alert is resolved once `endsAt` is set and has passed (spec §3).
    pub fn is_resolved(&self) -> bool {
        self.ends_at != 0 && self.ends_at <= now_millis()
    }

    pub fn name(&self) -> &str {
        self.labels.get("alertname").map(String::as_str).unwrap_or("")
    }

    /// Merges an incoming alert into this stored one per the spec §4.1
    /// merge rule:
    ///
    /// - Overlapping time ranges (`new.startsAt <= self.endsAt` when
    ///   `self.endsAt` is set, or `self` is still firing): take
    ///   `min(startsAt)` / `max(endsAt)`.
    /// - Non-overlapping ranges: the incoming alert replaces the stored one
    ///   only if it strictly supersedes it in time (`new.startsAt >=
    ///   self.endsAt`); an incoming alert that resolves *before* the
    ///   stored one started is kept as a distinct, non-overlapping
    ///   interval by refusing the merge (spec §9 Open Question (a)) —
    ///   callers are expected to treat that case as a new alert instance
    ///   rather than call `merge`.
    /// - Annotations always take the incoming value wholesale (no
    ///   per-key merge).
    /// - `updatedAt` is always the current time.
    pub fn merge(&mut self, incoming: &Alert) {
        let still_firing = self.ends_at == 0;
        let overlaps = still_firing
            || (incoming.starts_at <= self.ends_at
                && (incoming.ends_at == 0 || incoming.ends_at > self.starts_at));

        if overlaps {
            self.starts_at = self.starts_at.min(incoming.starts_at);
            self.ends_at = if incoming.ends_at == 0 {
                0
            } else if still_firing {
                incoming.ends_at
            } else {
                self.ends_at.max(incoming.ends_at)
            };
        } else if incoming.starts_at >= self.ends_at {
            self.starts_at = incoming.starts_at;
            self.ends_at = incoming.ends_at;
        }
        // else: incoming resolves before self started; leave self's interval
        // untouched (Open Question (a)).

        self.annotations = incoming.annotations.clone();
        self.generator_url = incoming.generator_url.clone();
        self.updated_at = now_millis();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> LabelSet {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn alert(starts_at: Timestamp, ends_at: Timestamp) -> Alert {
        Alert {
            labels: labels(&[("alertname", "HighLatency")]),
            annotations: labels(&[("summary", "a")]),
            starts_at,
            ends_at,
            generator_url: String::new(),
            updated_at: 0,
            timeout: false,
        }
    }

    #[test]
    fn fingerprint_is_order_independent() {
        let a = labels(&[("b", "2"), ("a", "1")]);
        let b = labels(&[("a", "1"), ("b", "2")]);
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn fingerprint_ignores_annotations() {
        let mut a1 = alert(1, 0);
        a1.annotations = labels(&[("x", "1")]);
        let mut a2 = alert(1, 0);
        a2.annotations = labels(&[("x", "2")]);
        assert_eq!(a1.fingerprint(), a2.fingerprint());
    }

    #[test]
    fn merge_extends_overlapping_firing_alert() {
        let mut stored = alert(100, 0);
        let incoming = alert(50, 200);
        stored.merge(&incoming);
        assert_eq!(stored.starts_at, 50);
        assert_eq!(stored.ends_at, 200);
    }

    #[test]
    fn merge_takes_min_start_max_end_when_both_resolved_and_overlapping() {
        let mut stored = alert(100, 300);
        let incoming = alert(200, 400);
        stored.merge(&incoming);
        assert_eq!(stored.starts_at, 100);
        assert_eq!(stored.ends_at, 400);
    }

    #[test]
    fn merge_replaces_when_incoming_strictly_supersedes() {
        let mut stored = alert(100, 200);
        let incoming = alert(250, 0);
        stored.merge(&incoming);
        assert_eq!(stored.starts_at, 250);
        assert_eq!(stored.ends_at, 0);
    }

    #[test]
    fn merge_ignores_incoming_that_resolves_before_stored_started() {
        let mut stored = alert(300, 400);
        let incoming = alert(10, 20);
        stored.merge(&incoming);
        assert_eq!(stored.starts_at, 300);
        assert_eq!(stored.ends_at, 400);
    }

    #[test]
    fn is_resolved_reflects_ends_at() {
        let past = alert(1, 1);
        assert!(past.is_resolved());
        let firing = alert(1, 0);
        assert!(!firing.is_resolved());
    }
}
