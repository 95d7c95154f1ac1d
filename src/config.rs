use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Process-wide tunables for the alert pipeline. Constructed once at startup
/// (normally from CLI flags, see `src/bin/notifyd.rs`) and handed to
/// components as an `Arc<Settings>` constructor argument rather than read
/// from a global (spec §9 "Global state").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// How long an unresolved alert may go without a `Put` before GC treats it
    /// as auto-expired (`endsAt = updatedAt + resolve_timeout`, spec §3).
    pub resolve_timeout: Duration,

    /// Interval between alert-provider GC sweeps (spec §4.1).
    pub gc_interval: Duration,

    /// Subscriber channel buffer floor; actual buffer is
    /// `max(snapshot_size, subscriber_buffer_floor)` (spec §4.1).
    pub subscriber_buffer_floor: usize,

    /// Default `groupWait` for routes that don't override it.
    pub default_group_wait: Duration,

    /// Default `groupInterval` for routes that don't override it.
    pub default_group_interval: Duration,

    /// Default `repeatInterval` for routes that don't override it.
    pub default_repeat_interval: Duration,

    /// Per-peer stagger delay used by the Wait stage (spec §4.6 step 4).
    pub peer_timeout: Duration,

    /// This replica's position among peers (0-indexed); multiplied by
    /// `peer_timeout` for the Wait stage's stagger delay.
    pub peer_position: usize,

    /// Total number of replicas participating in gossip dedup.
    pub peer_count: usize,

    /// Notification-log entry retention; must be `>=` the largest
    /// `repeatInterval` in use.
    pub nflog_retention: Duration,

    /// Initial backoff for the Retry stage (spec §4.6 step 6).
    pub retry_initial_backoff: Duration,
    /// Multiplicative backoff factor.
    pub retry_backoff_factor: f64,
    /// Backoff cap.
    pub retry_backoff_cap: Duration,

    /// Bounded wait for cluster settle at process start (spec §4.6 step 1).
    /// Zero means single-node mode (no-op).
    pub gossip_settle_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            resolve_timeout: Duration::from_secs(5 * 60),
            gc_interval: Duration::from_secs(30 * 60),
            subscriber_buffer_floor: 200,
            default_group_wait: Duration::from_secs(30),
            default_group_interval: Duration::from_secs(5 * 60),
            default_repeat_interval: Duration::from_secs(4 * 3600),
            peer_timeout: Duration::from_secs(15),
            peer_position: 0,
            peer_count: 1,
            nflog_retention: Duration::from_secs(5 * 24 * 3600),
            retry_initial_backoff: Duration::from_secs(1),
            retry_backoff_factor: 1.5,
            retry_backoff_cap: Duration::from_secs(10),
            gossip_settle_timeout: Duration::from_secs(15),
        }
    }
}

impl Settings {
    /// Validates cross-field invariants a bad CLI invocation could otherwise
    /// violate silently (spec §3 Lifecycle: nflog retention must be at least
    /// the largest repeat interval in use).
    pub fn validate(&self) -> Result<(), String> {
        if self.nflog_retention < self.default_repeat_interval {
            return Err(format!(
                "nflog_retention ({:?}) must be >= default_repeat_interval ({:?})",
                self.nflog_retention, self.default_repeat_interval
            ));
        }
        if self.retry_backoff_factor <= 1.0 {
            return Err("retry_backoff_factor must be > 1.0".to_string());
        }
        if self.peer_count == 0 {
            return Err("peer_count must be >= 1".to_string());
        }
        if self.peer_position >= self.peer_count {
            return Err("peer_position must be < peer_count".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn rejects_retention_shorter_than_repeat_interval() {
        let mut s = Settings::default();
        s.nflog_retention = Duration::from_secs(1);
        assert!(s.validate().is_err());
    }
}
