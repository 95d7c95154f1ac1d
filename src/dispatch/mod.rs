//! Aggregation grouping: buckets alerts by route and group key, and times
//! their handoff to the notification pipeline (spec §4.2).

pub mod dispatcher;
pub mod group;

pub use dispatcher::Dispatcher;
pub use group::{AggregationGroup, GroupFlush, GroupState};

/// `(receiver, sorted group-key label pairs)`.
pub type GroupKey = (String, Vec<(String, String)>);
