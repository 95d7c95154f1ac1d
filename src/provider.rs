//! The concurrent alert store (spec §4.1).
//!
//! All mutating and reading operations serialize under a single mutex; the
//! store is small enough (bounded by admission limits) that lock contention
//! is not a concern, and a single mutex keeps the merge/notify/GC sequencing
//! trivially correct (spec §4.1 "all operations serialize").

use crate::alert::{fingerprint, Alert, Fingerprint};
use crate::config::Settings;
use crate::error::{ProviderError, ProviderResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Admission and lifecycle hooks around the provider's store. Implementations
/// run under the provider's lock, so they must not block or re-enter the
/// provider (spec §4.1 "admission control").
pub trait ProviderCallback: Send + Sync {
    /// Called before a new (not-yet-seen) fingerprint is admitted. Returning
    /// `Err` rejects the `Put` for that alert only; other alerts in the same
    /// batch are unaffected.
    fn pre_store(&self, _alert: &Alert, _existing: bool) -> ProviderResult<()> {
        Ok(())
    }

    /// Called after a `Put` has been applied to the store.
    fn post_store(&self, _alert: &Alert) {}

    /// Called after an alert has been evicted (GC or explicit resolution).
    fn post_delete(&self, _alert: &Alert) {}

    /// Called after a GC sweep completes, with the number of alerts evicted
    /// and the alerts still in the store.
    fn post_gc(&self, _evicted: usize, _remaining: &HashMap<Fingerprint, Alert>) {}
}

/// A `ProviderCallback` that caps the number of concurrently-firing alerts
/// sharing an `alertname`, the most common runaway-cardinality guard (spec
/// §4.1 "admission control", §9 "Size limits").
pub struct PerNameLimiter {
    max_per_name: usize,
    counts: Mutex<HashMap<String, usize>>,
}

impl PerNameLimiter {
    pub fn new(max_per_name: usize) -> Self {
        Self { max_per_name, counts: Mutex::new(HashMap::new()) }
    }
}

impl ProviderCallback for PerNameLimiter {
    fn pre_store(&self, alert: &Alert, existing: bool) -> ProviderResult<()> {
        if existing {
            return Ok(());
        }
        let mut counts = self.counts.lock().expect("lock poisoned");
        let count = counts.entry(alert.name().to_string()).or_insert(0);
        if *count >= self.max_per_name {
            return Err(ProviderError::TooManyAlerts(alert.name().to_string()));
        }
        *count += 1;
        Ok(())
    }

    fn post_gc(&self, _evicted: usize, remaining: &HashMap<Fingerprint, Alert>) {
        self.reconcile(remaining);
    }
}

impl PerNameLimiter {
    /// Recomputes per-name counts from the current store contents. Called by
    /// the provider after every GC sweep so that resolved/evicted alerts
    /// free up admission headroom.
    pub fn reconcile(&self, alerts: &HashMap<Fingerprint, Alert>) {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for alert in alerts.values() {
            *counts.entry(alert.name().to_string()).or_insert(0) += 1;
        }
        *self.counts.lock().expect("lock poisoned") = counts;
    }
}

struct Subscriber {
    tx: mpsc::Sender<Alert>,
}

struct State {
    alerts: HashMap<Fingerprint, Alert>,
    subscribers: Vec<Subscriber>,
}

/// The concurrent, fingerprint-keyed alert store (spec §3 "Provider", §4.1).
pub struct Provider {
    state: Mutex<State>,
    settings: Arc<Settings>,
    callback: Arc<dyn ProviderCallback>,
    cancel: CancellationToken,
}

struct NoopCallback;
impl ProviderCallback for NoopCallback {}

impl Provider {
    pub fn new(settings: Arc<Settings>) -> Arc<Self> {
        Self::with_callback(settings, Arc::new(NoopCallback))
    }

    pub fn with_callback(settings: Arc<Settings>, callback: Arc<dyn ProviderCallback>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State { alerts: HashMap::new(), subscribers: Vec::new() }),
            settings,
            callback,
            cancel: CancellationToken::new(),
        })
    }

    /// Inserts or merges an alert into the store and fans it out to
    /// subscribers (spec §4.1 "Put").
    pub fn put(&self, mut alert: Alert) -> ProviderResult<Fingerprint> {
        let fp = fingerprint(&alert.labels);
        let mut state = self.state.lock().expect("lock poisoned");

        let existing = state.alerts.get(&fp).cloned();
        self.callback.pre_store(&alert, existing.is_some())?;

        if let Some(mut stored) = existing {
            stored.merge(&alert);
            alert = stored;
        }
        state.alerts.insert(fp, alert.clone());
        self.fan_out(&mut state, alert.clone());
        drop(state);

        self.callback.post_store(&alert);
        Ok(fp)
    }

    pub fn get(&self, fp: Fingerprint) -> ProviderResult<Alert> {
        self.state
            .lock()
            .expect("lock poisoned")
            .alerts
            .get(&fp)
            .cloned()
            .ok_or(ProviderError::NotFound)
    }

    /// Returns a snapshot of every alert not yet resolved (spec §4.1
    /// "GetPending").
    pub fn get_pending(&self) -> Vec<Alert> {
        self.state
            .lock()
            .expect("lock poisoned")
            .alerts
            .values()
            .filter(|a| !a.is_resolved())
            .cloned()
            .collect()
    }

    /// Subscribes to future `Put`s, first replaying the current pending
    /// snapshot so the subscriber never misses alerts created concurrently
    /// with the subscribe call (spec §4.1 "Subscribe"). The channel buffer
    /// is `max(snapshot_size, subscriber_buffer_floor)` so a burst at
    /// subscribe time never blocks the provider's lock.
    pub fn subscribe(&self) -> mpsc::Receiver<Alert> {
        let mut state = self.state.lock().expect("lock poisoned");
        let pending: Vec<Alert> = state.alerts.values().filter(|a| !a.is_resolved()).cloned().collect();
        let capacity = pending.len().max(self.settings.subscriber_buffer_floor);
        let (tx, rx) = mpsc::channel(capacity);
        for alert in pending {
            // Buffer sized above the snapshot, so this cannot block.
            let _ = tx.try_send(alert);
        }
        state.subscribers.push(Subscriber { tx });
        rx
    }

    fn fan_out(&self, state: &mut State, alert: Alert) {
        state.subscribers.retain(|sub| match sub.tx.try_send(alert.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("subscriber buffer full, dropping slow subscriber");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Evicts alerts resolved for longer than `resolve_timeout`, or still
    /// firing but unrefreshed for longer than `resolve_timeout` (auto-resolve,
    /// spec §4.1 "GC").
    fn gc_once(&self) {
        let now = crate::types::now_millis();
        let timeout_ms = self.settings.resolve_timeout.as_millis() as i64;
        let mut state = self.state.lock().expect("lock poisoned");

        let mut evicted = Vec::new();
        state.alerts.retain(|_, alert| {
            let auto_resolve_at = alert.updated_at + timeout_ms;
            let stale = if alert.ends_at == 0 {
                now >= auto_resolve_at
            } else {
                now >= alert.ends_at + timeout_ms
            };
            if stale {
                evicted.push(alert.clone());
                false
            } else {
                true
            }
        });
        let count = evicted.len();
        let remaining = state.alerts.clone();
        drop(state);

        for alert in &evicted {
            self.callback.post_delete(alert);
        }
        if count > 0 {
            debug!(count, "gc evicted alerts");
        }
        self.callback.post_gc(count, &remaining);
    }

    /// Spawns the periodic GC task. The returned handle is cancelled by
    /// calling [`Provider::close`].
    pub fn spawn_gc(self: &Arc<Self>) {
        let provider = Arc::clone(self);
        let mut ticker = interval(self.settings.gc_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = ticker.tick() => provider.gc_once(),
                    _ = cancel.cancelled() => {
                        info!("provider gc task shutting down");
                        break;
                    }
                }
            }
        });
    }

    /// Stops the GC task and drops all subscriber channels (spec §4.1
    /// "Close").
    pub fn close(&self) {
        self.cancel.cancel();
        self.state.lock().expect("lock poisoned").subscribers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LabelSet;
    use std::time::Duration;

    fn labels(pairs: &[(&str, &str)]) -> LabelSet {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn alert(name: &str) -> Alert {
        Alert {
            labels: labels(&[("alertname", name)]),
            annotations: LabelSet::default(),
            starts_at: crate::types::now_millis(),
            ends_at: 0,
            generator_url: String::new(),
            updated_at: crate::types::now_millis(),
            timeout: false,
        }
    }

    #[test]
    fn put_then_get_round_trips() {
        let provider = Provider::new(Arc::new(Settings::default()));
        let fp = provider.put(alert("Foo")).unwrap();
        let got = provider.get(fp).unwrap();
        assert_eq!(got.name(), "Foo");
    }

    #[test]
    fn put_merges_into_existing_fingerprint() {
        let provider = Provider::new(Arc::new(Settings::default()));
        let first = alert("Foo");
        let fp = provider.put(first.clone()).unwrap();

        let mut second = first.clone();
        second.starts_at -= 1000;
        provider.put(second).unwrap();

        let merged = provider.get(fp).unwrap();
        assert_eq!(merged.starts_at, first.starts_at - 1000);
    }

    #[test]
    fn get_pending_excludes_resolved() {
        let provider = Provider::new(Arc::new(Settings::default()));
        let mut resolved = alert("Resolved");
        resolved.ends_at = 1;
        provider.put(resolved).unwrap();
        provider.put(alert("Firing")).unwrap();

        let pending = provider.get_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].name(), "Firing");
    }

    #[test]
    fn subscribe_replays_current_snapshot() {
        let provider = Provider::new(Arc::new(Settings::default()));
        provider.put(alert("Foo")).unwrap();
        let mut rx = provider.subscribe();
        let received = rx.try_recv().unwrap();
        assert_eq!(received.name(), "Foo");
    }

    #[test]
    fn per_name_limiter_rejects_over_cap() {
        let limiter = Arc::new(PerNameLimiter::new(1));
        let provider = Provider::with_callback(Arc::new(Settings::default()), limiter);
        provider.put(alert("Foo")).unwrap();
        let mut second = alert("Foo");
        second.labels.insert("extra".to_string(), "1".to_string());
        assert!(provider.put(second).is_err());
    }

    #[test]
    fn gc_reconciles_per_name_limiter_counts() {
        let mut settings = Settings::default();
        settings.resolve_timeout = Duration::from_millis(1);
        let limiter = Arc::new(PerNameLimiter::new(1));
        let provider = Provider::with_callback(Arc::new(settings), limiter);

        provider.put(alert("Foo")).unwrap();
        let mut second = alert("Foo");
        second.labels.insert("extra".to_string(), "1".to_string());
        assert!(provider.put(second.clone()).is_err());

        std::thread::sleep(Duration::from_millis(5));
        provider.gc_once();

        assert!(provider.put(second).is_ok());
    }
}
