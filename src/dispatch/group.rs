//! A single aggregation group: the alerts sharing one receiver and group
//! key, plus the `group_wait`/`group_interval` timer driving when they are
//! handed to the notification pipeline (spec §3 "Aggregation group", §4.2).

use crate::alert::{Alert, Fingerprint};
use crate::error::PipelineResult;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::GroupKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    /// No alerts; the group is a placeholder about to be reaped.
    Idle,
    /// First alert arrived; waiting out `group_wait` before the initial
    /// flush.
    Waiting,
    /// A flush is in flight.
    Flushing,
    /// Pending is empty after a flush; one more idle `group_interval` tick
    /// before the group removes itself.
    Draining,
}

/// A batch of alerts handed from the dispatcher to the notification
/// pipeline for one `(receiver, group_key)` (spec §4.2 -> §4.6 handoff).
pub struct GroupFlush {
    pub receiver: String,
    pub group_key: Vec<(String, String)>,
    pub repeat_interval: Duration,
    /// The group's flush cadence; the Retry stage's overall deadline is
    /// derived from this (spec §4.6 step 6).
    pub group_interval: Duration,
    pub alerts: Vec<Alert>,
    /// Reports the pipeline's outcome for this flush back to the
    /// aggregation group, so resolved alerts that were successfully handed
    /// off can be purged from `pending` (spec §4.5.c/d). `None` in tests
    /// that construct a flush directly.
    pub ack: Option<oneshot::Sender<PipelineResult<()>>>,
}

pub struct AggregationGroup {
    pub receiver: String,
    pub group_key: Vec<(String, String)>,
    group_wait: Duration,
    group_interval: Duration,
    repeat_interval: Duration,
    pending: Mutex<HashMap<Fingerprint, Alert>>,
    state: Mutex<GroupState>,
    cancel: CancellationToken,
}

impl AggregationGroup {
    pub fn new(
        receiver: String,
        group_key: Vec<(String, String)>,
        group_wait: Duration,
        group_interval: Duration,
        repeat_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            receiver,
            group_key,
            group_wait,
            group_interval,
            repeat_interval,
            pending: Mutex::new(HashMap::new()),
            state: Mutex::new(GroupState::Idle),
            cancel: CancellationToken::new(),
        })
    }

    pub fn state(&self) -> GroupState {
        *self.state.lock().expect("lock poisoned")
    }

    fn set_state(&self, s: GroupState) {
        *self.state.lock().expect("lock poisoned") = s;
    }

    /// Adds or updates an alert in the group, returning `true` if this was
    /// the group's first member (the caller should spawn the timer task in
    /// that case).
    pub fn insert(&self, alert: Alert) -> bool {
        let fp = alert.fingerprint();
        let mut pending = self.pending.lock().expect("lock poisoned");
        let was_empty = pending.is_empty();
        pending.insert(fp, alert);
        if was_empty {
            self.set_state(GroupState::Waiting);
        }
        was_empty
    }

    pub fn snapshot(&self) -> Vec<Alert> {
        self.pending.lock().expect("lock poisoned").values().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().expect("lock poisoned").is_empty()
    }

    /// Drops the given fingerprints from `pending`. Called once the
    /// pipeline confirms it handled a flush that included them, so resolved
    /// alerts are not resent on every subsequent tick (spec §4.5.c).
    fn purge(&self, fingerprints: &[Fingerprint]) {
        let mut pending = self.pending.lock().expect("lock poisoned");
        for fp in fingerprints {
            pending.remove(fp);
        }
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Drives this group's `group_wait` -> first flush -> repeated
    /// `group_interval` flushes, self-removing from `groups` once it has
    /// gone a full interval with nothing pending (spec §4.2 "group
    /// lifetime").
    pub fn run(
        self: Arc<Self>,
        key: GroupKey,
        groups: Arc<Mutex<HashMap<GroupKey, Arc<AggregationGroup>>>>,
        flush_tx: mpsc::Sender<GroupFlush>,
    ) {
        tokio::spawn(async move {
            tokio::select! {
                _ = sleep(self.group_wait) => {}
                _ = self.cancel.cancelled() => return,
            }

            loop {
                self.set_state(GroupState::Flushing);
                let alerts = self.snapshot();
                if !alerts.is_empty() {
                    let resolved: Vec<Fingerprint> =
                        alerts.iter().filter(|a| a.is_resolved()).map(|a| a.fingerprint()).collect();
                    let (ack_tx, ack_rx) = oneshot::channel();
                    let flush = GroupFlush {
                        receiver: self.receiver.clone(),
                        group_key: self.group_key.clone(),
                        repeat_interval: self.repeat_interval,
                        group_interval: self.group_interval,
                        alerts,
                        ack: Some(ack_tx),
                    };
                    if flush_tx.send(flush).await.is_err() {
                        debug!("flush receiver dropped, stopping group");
                        return;
                    }
                    if !resolved.is_empty() {
                        let group = Arc::clone(&self);
                        tokio::spawn(async move {
                            if let Ok(Ok(())) = ack_rx.await {
                                group.purge(&resolved);
                            }
                        });
                    }
                }

                if self.is_empty() {
                    self.set_state(GroupState::Draining);
                } else {
                    self.set_state(GroupState::Waiting);
                }

                tokio::select! {
                    _ = sleep(self.group_interval) => {}
                    _ = self.cancel.cancelled() => return,
                }

                if self.state() == GroupState::Draining && self.is_empty() {
                    groups.lock().expect("lock poisoned").remove(&key);
                    self.set_state(GroupState::Idle);
                    return;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::now_millis;

    fn alert(name: &str) -> Alert {
        Alert {
            labels: [("alertname".to_string(), name.to_string())].into_iter().collect(),
            annotations: Default::default(),
            starts_at: now_millis(),
            ends_at: 0,
            generator_url: String::new(),
            updated_at: now_millis(),
            timeout: false,
        }
    }

    #[test]
    fn first_insert_reports_was_empty() {
        let g = AggregationGroup::new("default".to_string(), vec![], Duration::from_secs(1), Duration::from_secs(1), Duration::from_secs(60));
        assert!(g.insert(alert("Foo")));
        assert!(!g.insert(alert("Bar")));
        assert_eq!(g.snapshot().len(), 2);
    }

    #[test]
    fn starts_idle() {
        let g = AggregationGroup::new("default".to_string(), vec![], Duration::from_secs(1), Duration::from_secs(1), Duration::from_secs(60));
        assert_eq!(g.state(), GroupState::Idle);
    }

    #[test]
    fn purge_drops_only_named_fingerprints_and_empties_once_all_gone() {
        let g = AggregationGroup::new("default".to_string(), vec![], Duration::from_secs(1), Duration::from_secs(1), Duration::from_secs(60));
        let foo = alert("Foo");
        let bar = alert("Bar");
        let foo_fp = foo.fingerprint();
        g.insert(foo);
        g.insert(bar);

        g.purge(&[foo_fp]);
        assert_eq!(g.snapshot().len(), 1);
        assert!(!g.is_empty());

        let bar_fp = g.snapshot()[0].fingerprint();
        g.purge(&[bar_fp]);
        assert!(g.is_empty());
    }
}
