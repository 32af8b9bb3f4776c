//! Point-in-time views of the pool and its units.

use serde::Serialize;
use taskpool_core::TaskId;

/// Lifecycle state of a computation unit.
///
/// `Idle -> Busy -> Idle` while the pool runs; any state may move to
/// `Terminated`, which is final.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitState {
    #[default]
    Idle,
    Busy,
    Terminated,
}

/// Point-in-time view of one unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitInfo {
    pub unit_id: usize,
    pub state: UnitState,
    /// `Some` exactly when the unit is busy.
    pub current_task: Option<TaskId>,
}

/// Aggregate utilisation snapshot of a pool.
///
/// `busy_units + idle_units + terminated_units == total_units` holds for
/// every snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub total_units: usize,
    pub busy_units: usize,
    pub idle_units: usize,
    pub terminated_units: usize,
    pub queue_length: usize,
    pub completed_count: u64,
    pub failed_count: u64,
    pub cancelled_count: u64,
}

impl PoolStats {
    /// Tasks accepted but not yet resolved.
    pub const fn in_flight(&self) -> usize {
        self.busy_units + self.queue_length
    }

    /// Fraction of live units currently running a task.
    pub fn utilization(&self) -> f64 {
        let live = self.busy_units + self.idle_units;
        if live == 0 {
            0.0
        } else {
            self.busy_units as f64 / live as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utilization_ignores_terminated_units() {
        let stats = PoolStats {
            total_units: 4,
            busy_units: 1,
            idle_units: 1,
            terminated_units: 2,
            queue_length: 3,
            ..PoolStats::default()
        };
        assert_eq!(stats.utilization(), 0.5);
        assert_eq!(stats.in_flight(), 4);
        assert_eq!(PoolStats::default().utilization(), 0.0);
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(PoolStats::default()).unwrap();
        assert_eq!(json["queueLength"], 0);
        assert_eq!(json["terminatedUnits"], 0);
        assert_eq!(
            serde_json::to_value(UnitState::Terminated).unwrap(),
            "terminated"
        );
    }
}
