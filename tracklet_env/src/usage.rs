//! Cluster ownership arbitration.
//!
//! The global track fit decides which clusters are claimed by which
//! tracklet. The estimator only reports its claims through a
//! `UsageArbiter`; it never flips flags on a measurement directly.

use crate::types::{ClusterKey, ModuleId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Ownership state of one cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UsageState {
    #[default]
    Free,
    /// Claimed by exactly one tracklet
    Used,
    /// Claimed by more than one tracklet (or by a kink)
    Shared,
}

/// Single-writer arbiter of cluster ownership.
pub trait UsageArbiter {
    /// Current state of a cluster.
    fn state(&self, key: ClusterKey) -> UsageState;

    /// Overwrites the state of a cluster.
    fn set_state(&mut self, key: ClusterKey, state: UsageState);
}

/// Whether the global fit has flagged a kink at a module/position.
pub trait KinkFlags {
    fn is_kink(&self, module: ModuleId, y: f64, z: f64) -> bool;
}

/// In-memory arbiter backed by a hash map.
#[derive(Debug, Clone, Default)]
pub struct UsageLedger {
    states: HashMap<ClusterKey, UsageState>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of clusters in `state`.
    pub fn count(&self, state: UsageState) -> usize {
        self.states.values().filter(|s| **s == state).count()
    }

    /// Forgets every claim (next event).
    pub fn clear(&mut self) {
        self.states.clear();
    }
}

impl UsageArbiter for UsageLedger {
    fn state(&self, key: ClusterKey) -> UsageState {
        self.states.get(&key).copied().unwrap_or_default()
    }

    fn set_state(&mut self, key: ClusterKey, state: UsageState) {
        if state == UsageState::Free {
            self.states.remove(&key);
        } else {
            self.states.insert(key, state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MeasurementId;

    #[test]
    fn test_ledger_defaults_to_free() {
        let ledger = UsageLedger::new();
        let key = ClusterKey::new(ModuleId(1), MeasurementId(7));
        assert_eq!(ledger.state(key), UsageState::Free);
    }

    #[test]
    fn test_ledger_counts_states() {
        let mut ledger = UsageLedger::new();
        let a = ClusterKey::new(ModuleId(1), MeasurementId(0));
        let b = ClusterKey::new(ModuleId(1), MeasurementId(1));
        let c = ClusterKey::new(ModuleId(2), MeasurementId(0));

        ledger.set_state(a, UsageState::Used);
        ledger.set_state(b, UsageState::Shared);
        ledger.set_state(c, UsageState::Used);
        assert_eq!(ledger.count(UsageState::Used), 2);
        assert_eq!(ledger.count(UsageState::Shared), 1);

        ledger.set_state(c, UsageState::Free);
        assert_eq!(ledger.count(UsageState::Used), 1);

        ledger.clear();
        assert_eq!(ledger.state(b), UsageState::Free);
    }
}
