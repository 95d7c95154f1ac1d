//! Composite muting: an alert is muted if silenced or inhibited (spec §4.5).

use crate::inhibit::Inhibitor;
use crate::silence::Silencer;
use crate::types::LabelSet;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuteReason {
    Silenced,
    Inhibited,
}

/// Chains the silence and inhibition muting predicates, preferring to report
/// `Silenced` when both apply since it is the operator-initiated one (spec
/// §4.5 "mute reason").
pub struct Muter {
    silencer: Arc<Silencer>,
    inhibitor: Arc<Inhibitor>,
}

impl Muter {
    pub fn new(silencer: Arc<Silencer>, inhibitor: Arc<Inhibitor>) -> Self {
        Self { silencer, inhibitor }
    }

    pub fn mute_reason(&self, labels: &LabelSet) -> Option<MuteReason> {
        if self.silencer.is_muted(labels) {
            return Some(MuteReason::Silenced);
        }
        if self.inhibitor.is_inhibited(labels) {
            return Some(MuteReason::Inhibited);
        }
        None
    }

    pub fn is_muted(&self, labels: &LabelSet) -> bool {
        self.mute_reason(labels).is_some()
    }
}
