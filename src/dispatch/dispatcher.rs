//! Routes alerts from the provider into per-`(receiver, group_key)`
//! aggregation groups (spec §4.2).

use crate::alert::Alert;
use crate::route::RouteTree;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace};

use super::group::{AggregationGroup, GroupFlush};
use super::GroupKey;

pub struct Dispatcher {
    route_tree: Arc<RouteTree>,
    groups: Arc<Mutex<HashMap<GroupKey, Arc<AggregationGroup>>>>,
    flush_tx: mpsc::Sender<GroupFlush>,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(route_tree: Arc<RouteTree>, flush_tx: mpsc::Sender<GroupFlush>) -> Arc<Self> {
        Arc::new(Self {
            route_tree,
            groups: Arc::new(Mutex::new(HashMap::new())),
            flush_tx,
            cancel: CancellationToken::new(),
        })
    }

    /// Consumes alerts from `alert_rx` (typically [`crate::provider::Provider::subscribe`])
    /// until the channel closes or [`Dispatcher::close`] is called.
    pub fn run(self: &Arc<Self>, mut alert_rx: mpsc::Receiver<Alert>) {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    alert = alert_rx.recv() => {
                        match alert {
                            Some(alert) => dispatcher.route(alert),
                            None => {
                                info!("alert channel closed, dispatcher stopping");
                                break;
                            }
                        }
                    }
                    _ = dispatcher.cancel.cancelled() => break,
                }
            }
        });
    }

    /// Fans `alert` out to every route it matches (spec §4.2 step 1), each
    /// into its own `(receiver, group_key)` aggregation group.
    fn route(self: &Arc<Self>, alert: Alert) {
        let resolved = self.route_tree.resolve_all(&alert.labels);
        if resolved.is_empty() {
            trace!("alert matched no route, dropping");
            return;
        }

        for resolved in resolved {
            let key: GroupKey = (resolved.receiver.clone(), resolved.group_key.clone());
            let mut groups = self.groups.lock().expect("lock poisoned");
            let group = groups
                .entry(key.clone())
                .or_insert_with(|| {
                    AggregationGroup::new(
                        resolved.receiver.clone(),
                        resolved.group_key.clone(),
                        resolved.group_wait,
                        resolved.group_interval,
                        resolved.repeat_interval,
                    )
                })
                .clone();
            drop(groups);

            let first = group.insert(alert.clone());
            if first {
                group.clone().run(key, Arc::clone(&self.groups), self.flush_tx.clone());
            }
        }
    }

    pub fn group_count(&self) -> usize {
        self.groups.lock().expect("lock poisoned").len()
    }

    pub fn close(&self) {
        self.cancel.cancel();
        for group in self.groups.lock().expect("lock poisoned").values() {
            group.close();
        }
    }
}
