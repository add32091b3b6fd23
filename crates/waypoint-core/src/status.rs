//! Status enums for executions, barriers and forcers.

use serde::{Deserialize, Serialize};

/// Status of a pipeline, workflow, phase or step execution instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// Execution record created but not started.
    #[default]
    New,
    /// Waiting in a queue for resources.
    Queued,
    /// Execution is starting.
    Starting,
    /// Execution is running.
    Running,
    /// Execution is paused by a user or an approval.
    Paused,
    /// Execution is waiting on an external signal.
    Waiting,
    /// Completed successfully.
    Success,
    /// Skipped by a condition; counts as a positive outcome.
    Skipped,
    /// Failed.
    Failed,
    /// Errored out.
    Error,
    /// Aborted by a user or the system.
    Aborted,
    /// Rejected at an approval gate.
    Rejected,
    /// Expired before completing.
    Expired,
}

impl ExecutionStatus {
    /// Returns true if the execution finished.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            Self::Success
                | Self::Skipped
                | Self::Failed
                | Self::Error
                | Self::Aborted
                | Self::Rejected
                | Self::Expired
        )
    }

    /// Returns true for success-class statuses.
    pub fn is_positive(&self) -> bool {
        matches!(self, Self::Success | Self::Skipped)
    }

    /// Returns true while the execution is starting or running.
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

/// State of a BarrierInstance.
///
/// Transitions only move forward: `Standing` to either terminal state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BarrierState {
    /// Waiting for participants.
    #[default]
    Standing,
    /// Every participant arrived.
    Down,
    /// At least one participant was abandoned.
    Endure,
}

impl BarrierState {
    /// Returns true if the barrier reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Standing)
    }
}

/// Progress of a node in a forcer tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ForcerState {
    /// Not there yet.
    #[default]
    Approaching,
    /// Reached the rendezvous.
    Arrived,
    /// Will never reach the rendezvous.
    Abandoned,
}

impl ForcerState {
    /// Returns true once the state can no longer change.
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Approaching)
    }

    /// Barrier state implied by the root of a forcer tree.
    pub fn barrier_state(&self) -> BarrierState {
        match self {
            Self::Approaching => BarrierState::Standing,
            Self::Arrived => BarrierState::Down,
            Self::Abandoned => BarrierState::Endure,
        }
    }
}

/// Environment classification used by scope rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvironmentType {
    Prod,
    NonProd,
}

impl EnvironmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prod => "PROD",
            Self::NonProd => "NON_PROD",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positive_statuses_are_final() {
        for status in [ExecutionStatus::Success, ExecutionStatus::Skipped] {
            assert!(status.is_positive());
            assert!(status.is_final());
        }
        assert!(!ExecutionStatus::Running.is_final());
        assert!(!ExecutionStatus::Aborted.is_positive());
    }

    #[test]
    fn test_forcer_to_barrier_state() {
        assert_eq!(ForcerState::Approaching.barrier_state(), BarrierState::Standing);
        assert_eq!(ForcerState::Arrived.barrier_state(), BarrierState::Down);
        assert_eq!(ForcerState::Abandoned.barrier_state(), BarrierState::Endure);
        assert!(!BarrierState::Standing.is_terminal());
        assert!(BarrierState::Endure.is_terminal());
    }
}
