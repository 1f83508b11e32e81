//! Task and task-group state enumerations (spec.md §6).

use serde::{Deserialize, Serialize};

/// State of a single task within a task group, as reported by the executor
/// (spec.md §4.5/§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Ready,
    Executing,
    Complete,
    FailedRecoverable,
    FailedUnrecoverable,
    OnHold,
}

/// State of a task group, as tracked by the worker-side state manager (C6)
/// and reported to the master. `READY → EXECUTING → {COMPLETE | ON_HOLD |
/// FAILED_RECOVERABLE | FAILED_UNRECOVERABLE}` (spec.md §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskGroupState {
    Ready,
    Executing,
    Complete,
    OnHold,
    FailedRecoverable,
    FailedUnrecoverable,
}

impl TaskGroupState {
    /// True once no further transitions are expected for this attempt.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskGroupState::Complete
                | TaskGroupState::OnHold
                | TaskGroupState::FailedRecoverable
                | TaskGroupState::FailedUnrecoverable
        )
    }

    /// Whether `next` is a legal direct successor of `self`, per the FSM in
    /// spec.md §4.6. Used by tests to check P5 (task ordering).
    pub fn can_transition_to(self, next: TaskGroupState) -> bool {
        use TaskGroupState::*;
        matches!(
            (self, next),
            (Ready, Executing)
                | (Executing, Complete)
                | (Executing, OnHold)
                | (Executing, FailedRecoverable)
                | (Executing, FailedUnrecoverable)
        )
    }
}

/// Cause attached to a `FAILED_RECOVERABLE` transition (spec.md §4.5/§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoverableCause {
    InputReadFailure,
    OutputWriteFailure,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(TaskGroupState::Complete.is_terminal());
        assert!(TaskGroupState::OnHold.is_terminal());
        assert!(TaskGroupState::FailedRecoverable.is_terminal());
        assert!(TaskGroupState::FailedUnrecoverable.is_terminal());
        assert!(!TaskGroupState::Ready.is_terminal());
        assert!(!TaskGroupState::Executing.is_terminal());
    }

    #[test]
    fn legal_transitions_follow_the_fsm() {
        assert!(TaskGroupState::Ready.can_transition_to(TaskGroupState::Executing));
        assert!(TaskGroupState::Executing.can_transition_to(TaskGroupState::Complete));
        assert!(!TaskGroupState::Ready.can_transition_to(TaskGroupState::Complete));
        assert!(!TaskGroupState::Complete.can_transition_to(TaskGroupState::Executing));
    }
}
