//! The per-flush notification pipeline: GossipSettle -> Mute -> Wait ->
//! Dedup -> Retry -> Send -> SetNotified (spec §4.6).

use crate::alert::Alert;
use crate::config::Settings;
use crate::dispatch::GroupFlush;
use crate::error::PipelineResult;
use crate::mute::Muter;
use crate::nflog::{Entry, GossipSink, Log};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use xxhash_rust::xxh3::Xxh3;
use std::hash::Hasher;

use super::notifier::Notifier;
use super::retrier::{send_with_retry, RetryPolicy};

/// Bounds a single wait to `settings.gossip_settle_timeout`, applied once
/// per process so later flushes don't pay the delay again (spec §4.6 step 1).
pub struct GossipSettle {
    start: Instant,
    settled: AtomicBool,
    timeout: Duration,
}

impl GossipSettle {
    pub fn new(timeout: Duration) -> Self {
        Self { start: Instant::now(), settled: AtomicBool::new(timeout.is_zero()), timeout }
    }

    pub async fn wait(&self) {
        if self.settled.load(Ordering::Acquire) {
            return;
        }
        let elapsed = self.start.elapsed();
        if elapsed < self.timeout {
            tokio::time::sleep(self.timeout - elapsed).await;
        }
        self.settled.store(true, Ordering::Release);
    }
}

/// Hashes the fingerprints of `alerts`, order-independent. Used separately
/// over the firing and resolved subsets of a flush so Dedup can tell them
/// apart (spec §4.6 step 5).
fn fingerprint_hash<'a>(alerts: impl Iterator<Item = &'a Alert>) -> u64 {
    let mut fps: Vec<u64> = alerts.map(|a| a.fingerprint().0).collect();
    fps.sort_unstable();
    let mut hasher = Xxh3::new();
    for fp in fps {
        hasher.write_u64(fp);
    }
    hasher.finish()
}

/// Everything one run of the pipeline needs; constructed once per receiver
/// by the service wiring in `src/bin/notifyd.rs`.
pub struct NotifyPipeline {
    pub settings: Arc<Settings>,
    pub muter: Arc<Muter>,
    pub nflog: Arc<Log>,
    pub gossip: Arc<dyn GossipSink>,
    pub notifier: Arc<dyn Notifier>,
    pub gossip_settle: Arc<GossipSettle>,
    pub cancel: CancellationToken,
}

impl NotifyPipeline {
    /// Runs one flush through the full stage chain, then reports the
    /// outcome back to the aggregation group via `flush.ack` so it can
    /// purge resolved alerts that were handed off (spec §4.5.c). Returns
    /// `Ok(())` both when a notification was sent and when an earlier stage
    /// determined none was needed (all alerts muted, or a duplicate within
    /// `repeat_interval`) -- those are not errors.
    pub async fn run(&self, mut flush: GroupFlush) -> PipelineResult<()> {
        let ack = flush.ack.take();
        let result = self.run_stages(flush).await;
        if let Some(ack) = ack {
            let _ = ack.send(result.clone());
        }
        result
    }

    async fn run_stages(&self, flush: GroupFlush) -> PipelineResult<()> {
        self.gossip_settle.wait().await;

        let unmuted: Vec<Alert> = flush
            .alerts
            .into_iter()
            .filter(|a| !self.muter.is_muted(&a.labels))
            .collect();
        if unmuted.is_empty() {
            debug!(receiver = %flush.receiver, "all alerts muted, skipping notification");
            return Ok(());
        }

        let stagger = self.settings.peer_timeout * self.settings.peer_position as u32;
        if !stagger.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(stagger) => {}
                _ = self.cancel.cancelled() => return Ok(()),
            }
        }

        let firing_hash = fingerprint_hash(unmuted.iter().filter(|a| !a.is_resolved()));
        let resolved_hash = fingerprint_hash(unmuted.iter().filter(|a| a.is_resolved()));
        let now = crate::types::now_millis();
        if let Some(existing) = self.nflog.query(&flush.receiver, &flush.group_key) {
            let repeat_interval_ms = flush.repeat_interval.as_millis() as i64;
            let unchanged = existing.firing_hash == firing_hash && existing.resolved_hash == resolved_hash;
            if unchanged && now - existing.sent_at < repeat_interval_ms {
                debug!(receiver = %flush.receiver, "duplicate within repeat_interval, skipping");
                return Ok(());
            }
        }

        let policy = RetryPolicy {
            initial_backoff: self.settings.retry_initial_backoff,
            factor: self.settings.retry_backoff_factor,
            cap: self.settings.retry_backoff_cap,
        };
        let deadline = Instant::now() + flush.group_interval;
        send_with_retry(self.notifier.as_ref(), &unmuted, &policy, deadline, &self.cancel).await?;

        let entry = Entry {
            group_key: flush.group_key.clone(),
            receiver: flush.receiver.clone(),
            firing_hash,
            resolved_hash,
            sent_at: now,
            expires_at: now + self.settings.nflog_retention.as_millis() as i64,
        };
        self.nflog.log(entry.clone());
        self.gossip.broadcast(entry).await;
        info!(receiver = %flush.receiver, count = unmuted.len(), "notification sent");
        Ok(())
    }
}
