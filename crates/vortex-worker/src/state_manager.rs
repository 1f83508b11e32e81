//! Task-Group State Manager (C6): the worker-local state machine reporting
//! `TaskGroupStateChanged` over the control transport (spec.md §4.6).
//!
//! `READY → EXECUTING → {COMPLETE | ON_HOLD | FAILED_RECOVERABLE |
//! FAILED_UNRECOVERABLE}`. The master is the authority on dedup (spec.md
//! §4.1: "duplicates are tolerated because all operations are idempotent");
//! this side additionally guards against accidental re-emission with a
//! `DashSet` keyed by `(task_group_id, attempt_idx, state)`, so a caller bug
//! that calls `report` twice for the same transition sends at most once.

use crate::client::MasterClient;
use crate::error::WorkerError;
use dashmap::DashSet;
use vortex_core::{RecoverableCause, TaskGroupId, TaskGroupState};
use vortex_proto::control_envelope::Payload;
use vortex_proto::{self as proto, TaskGroupStateChanged};

/// One already-sent transition key, guarding against re-emission.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SentKey {
    task_group_id: TaskGroupId,
    attempt_idx: u32,
    state: TaskGroupState,
}

pub struct TaskGroupStateManager {
    task_group_id: TaskGroupId,
    attempt_idx: u32,
    sent: DashSet<SentKey>,
}

impl TaskGroupStateManager {
    pub fn new(task_group_id: TaskGroupId, attempt_idx: u32) -> Self {
        Self {
            task_group_id,
            attempt_idx,
            sent: DashSet::new(),
        }
    }

    /// Sends one `TaskGroupStateChanged` transition. Returns `Ok(false)`
    /// without sending if this exact transition was already reported for
    /// this attempt (scenario 5: "the original attempt's state transitions
    /// are not re-emitted").
    pub async fn report(
        &self,
        master: &mut MasterClient,
        executor_id: &str,
        state: TaskGroupState,
        tasks_on_hold: Vec<String>,
        cause: Option<RecoverableCause>,
    ) -> Result<bool, WorkerError> {
        let key = SentKey {
            task_group_id: self.task_group_id.clone(),
            attempt_idx: self.attempt_idx,
            state,
        };
        if !self.sent.insert(key) {
            return Ok(false);
        }

        master
            .send(Payload::TaskGroupStateChanged(TaskGroupStateChanged {
                executor_id: executor_id.to_string(),
                task_group_id: self.task_group_id.to_string(),
                state: to_proto_state(state) as i32,
                tasks_on_hold,
                cause: cause.map(to_proto_cause).unwrap_or(proto::RecoverableCause::Unspecified) as i32,
                attempt_idx: self.attempt_idx,
            }))
            .await?;
        Ok(true)
    }
}

fn to_proto_state(state: TaskGroupState) -> proto::TaskGroupState {
    match state {
        TaskGroupState::Ready => proto::TaskGroupState::Ready,
        TaskGroupState::Executing => proto::TaskGroupState::Executing,
        TaskGroupState::Complete => proto::TaskGroupState::Complete,
        TaskGroupState::OnHold => proto::TaskGroupState::OnHold,
        TaskGroupState::FailedRecoverable => proto::TaskGroupState::FailedRecoverable,
        TaskGroupState::FailedUnrecoverable => proto::TaskGroupState::FailedUnrecoverable,
    }
}

fn to_proto_cause(cause: RecoverableCause) -> proto::RecoverableCause {
    match cause {
        RecoverableCause::InputReadFailure => proto::RecoverableCause::InputReadFailure,
        RecoverableCause::OutputWriteFailure => proto::RecoverableCause::OutputWriteFailure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_transition_is_only_sendable_once_per_attempt() {
        let manager = TaskGroupStateManager::new(TaskGroupId::new("tg-0"), 0);
        let key = SentKey {
            task_group_id: TaskGroupId::new("tg-0"),
            attempt_idx: 0,
            state: TaskGroupState::Executing,
        };
        assert!(manager.sent.insert(key.clone()));
        assert!(!manager.sent.insert(key));
    }

    #[test]
    fn proto_state_mapping_is_total() {
        for state in [
            TaskGroupState::Ready,
            TaskGroupState::Executing,
            TaskGroupState::Complete,
            TaskGroupState::OnHold,
            TaskGroupState::FailedRecoverable,
            TaskGroupState::FailedUnrecoverable,
        ] {
            let _ = to_proto_state(state);
        }
    }
}
