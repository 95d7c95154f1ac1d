//! The notification log: tracks which `(group, receiver)` pairs have
//! already been notified about a given content hash, merged CRDT-style
//! across replicas (spec §3 "Notification log entry", §4.7).

use crate::error::{NflogError, NflogResult};
use crate::types::Timestamp;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Key identifying one notification pipeline's log entry: receiver plus the
/// group key it was flushed for.
pub type EntryKey = (String, Vec<(String, String)>);

/// One log entry: the content hash last sent and when, used by the Dedup
/// stage to decide whether a flush is a true repeat (spec §4.6 step 5, §4.7).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub group_key: Vec<(String, String)>,
    pub receiver: String,
    /// Hash of the fingerprints of the firing (unresolved) alerts last sent
    /// for this group/receiver (spec §4.6 step 5 "Dedup").
    pub firing_hash: u64,
    /// Hash of the fingerprints of the resolved alerts last sent. Kept apart
    /// from `firing_hash` so Dedup can tell "nothing changed" from "an alert
    /// newly resolved" and notify promptly on the latter even within
    /// `repeat_interval`.
    pub resolved_hash: u64,
    pub sent_at: Timestamp,
    pub expires_at: Timestamp,
}

/// Outbound gossip transport. The real cluster transport is out of scope
/// (spec Non-goals); implementations plug in whatever broadcast mechanism
/// the deployment uses. [`InMemoryGossip`] is the in-process test double.
#[async_trait]
pub trait GossipSink: Send + Sync {
    async fn broadcast(&self, entry: Entry);
}

pub struct InMemoryGossip {
    pub sent: Mutex<Vec<Entry>>,
}

impl InMemoryGossip {
    pub fn new() -> Self {
        Self { sent: Mutex::new(Vec::new()) }
    }
}

impl Default for InMemoryGossip {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GossipSink for InMemoryGossip {
    async fn broadcast(&self, entry: Entry) {
        self.sent.lock().expect("lock poisoned").push(entry);
    }
}

/// The local replica of the notification log. Entries merge by picking the
/// greater `sent_at`, breaking ties by the longer `expires_at` (spec §4.7
/// "merge rule").
pub struct Log {
    entries: Mutex<HashMap<EntryKey, Entry>>,
}

impl Log {
    pub fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }

    fn key_of(entry: &Entry) -> EntryKey {
        (entry.receiver.clone(), entry.group_key.clone())
    }

    pub fn query(&self, receiver: &str, group_key: &[(String, String)]) -> Option<Entry> {
        let key = (receiver.to_string(), group_key.to_vec());
        self.entries.lock().expect("lock poisoned").get(&key).cloned()
    }

    pub fn log(&self, entry: Entry) {
        let key = Self::key_of(&entry);
        self.entries.lock().expect("lock poisoned").insert(key, entry);
    }

    /// Merges a remote entry into the local log, keeping whichever of the
    /// two wins under the §4.7 merge rule.
    pub fn merge(&self, incoming: Entry) -> NflogResult<()> {
        let key = Self::key_of(&incoming);
        let mut entries = self.entries.lock().expect("lock poisoned");
        match entries.get(&key) {
            Some(existing) if !Self::incoming_wins(existing, &incoming) => {}
            _ => {
                entries.insert(key, incoming);
            }
        }
        Ok(())
    }

    fn incoming_wins(existing: &Entry, incoming: &Entry) -> bool {
        match incoming.sent_at.cmp(&existing.sent_at) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => incoming.expires_at > existing.expires_at,
        }
    }

    /// Drops entries past `expires_at` (spec §4.7 "GC").
    pub fn gc(&self, now: Timestamp) -> usize {
        let mut entries = self.entries.lock().expect("lock poisoned");
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }

    pub fn decode(bytes: &[u8]) -> NflogResult<Entry> {
        serde_json::from_slice(bytes).map_err(|e| NflogError::CannotDecode(e.to_string()))
    }

    pub fn encode(entry: &Entry) -> NflogResult<Vec<u8>> {
        serde_json::to_vec(entry).map_err(|e| NflogError::CannotSerialize(e.to_string()))
    }
}

impl Default for Log {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(sent_at: Timestamp, expires_at: Timestamp) -> Entry {
        Entry {
            group_key: vec![("alertname".to_string(), "Foo".to_string())],
            receiver: "default".to_string(),
            firing_hash: 42,
            resolved_hash: 0,
            sent_at,
            expires_at,
        }
    }

    #[test]
    fn merge_keeps_greater_sent_at() {
        let log = Log::new();
        log.log(entry(10, 100));
        log.merge(entry(20, 90)).unwrap();
        let e = log.query("default", &[("alertname".to_string(), "Foo".to_string())]).unwrap();
        assert_eq!(e.sent_at, 20);
    }

    #[test]
    fn merge_breaks_ties_by_longer_expiry() {
        let log = Log::new();
        log.log(entry(10, 100));
        log.merge(entry(10, 200)).unwrap();
        let e = log.query("default", &[("alertname".to_string(), "Foo".to_string())]).unwrap();
        assert_eq!(e.expires_at, 200);
    }

    #[test]
    fn merge_rejects_stale_entry() {
        let log = Log::new();
        log.log(entry(20, 100));
        log.merge(entry(10, 500)).unwrap();
        let e = log.query("default", &[("alertname".to_string(), "Foo".to_string())]).unwrap();
        assert_eq!(e.sent_at, 20);
    }

    #[test]
    fn gc_drops_expired_entries() {
        let log = Log::new();
        log.log(entry(10, 50));
        assert_eq!(log.gc(100), 1);
        assert!(log.query("default", &[("alertname".to_string(), "Foo".to_string())]).is_none());
    }

    #[tokio::test]
    async fn in_memory_gossip_records_broadcasts() {
        let gossip = InMemoryGossip::new();
        gossip.broadcast(entry(1, 2)).await;
        assert_eq!(gossip.sent.lock().unwrap().len(), 1);
    }
}
