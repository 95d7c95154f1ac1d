use ahash::AHashMap;

/// Milliseconds since the Unix epoch. Zero is the sentinel for "unset"/"still firing"
/// used throughout the alert lifecycle (see [`crate::alert::Alert::ends_at`]).
pub type Timestamp = i64;

/// A label name/value map. Order is never significant; equality is element-wise.
pub type LabelSet = AHashMap<String, String>;

/// Returns the current wall-clock time as milliseconds since the Unix epoch.
pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}
