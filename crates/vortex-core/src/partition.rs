//! Partition Metadata (C2): the per-partition state machine, location
//! future, and block index (spec.md §3/§4.2/§4.3).
//!
//! Each partition owns its own lock (`parking_lot::Mutex`); a process-wide
//! read/write lock over the *map* of partitions lives one layer up, in the
//! master's partition manager (spec.md §5).

use crate::error::DataflowError;
use crate::ids::{Location, TaskGroupId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::Notify;

/// spec.md §4.3's per-partition state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionState {
    Ready,
    Scheduled,
    Committed,
    Lost,
    LostBeforeCommit,
    Removed,
}

impl PartitionState {
    /// Whether `self -> next` is a legal direct transition in the §4.3
    /// diagram, including the documented re-entry into `Scheduled` from
    /// `Lost`/`LostBeforeCommit` (a new attempt).
    fn can_transition_to(self, next: PartitionState) -> bool {
        use PartitionState::*;
        matches!(
            (self, next),
            (Ready, Scheduled)
                | (Scheduled, Committed)
                | (Scheduled, LostBeforeCommit)
                | (Committed, Lost)
                | (Lost, Scheduled)
                | (LostBeforeCommit, Scheduled)
                | (Lost, Removed)
        )
    }

    /// States in which a fresh `location_future()` call keeps waiting
    /// rather than failing immediately.
    fn awaits_commit(self) -> bool {
        matches!(self, PartitionState::Ready | PartitionState::Scheduled)
    }
}

/// One contiguous group of elements sharing a hash-key range within a
/// partition (spec.md GLOSSARY).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMetadata {
    pub key: u64,
    pub byte_length: u64,
    pub offset: u64,
    pub element_count: u64,
}

struct PartitionInner {
    state: PartitionState,
    location: Option<Location>,
    blocks: BTreeMap<u64, BlockMetadata>,
}

/// Per-partition state machine, location future, and block index.
pub struct PartitionMetadata {
    pub producer_task_group: TaskGroupId,
    inner: parking_lot::Mutex<PartitionInner>,
    notify: Notify,
}

impl PartitionMetadata {
    /// `initialize_state`: a partition is created `READY` when its
    /// producer task group is enqueued for scheduling (spec.md §3).
    pub fn new(producer_task_group: TaskGroupId) -> Self {
        Self {
            producer_task_group,
            inner: parking_lot::Mutex::new(PartitionInner {
                state: PartitionState::Ready,
                location: None,
                blocks: BTreeMap::new(),
            }),
            notify: Notify::new(),
        }
    }

    pub fn state(&self) -> PartitionState {
        self.inner.lock().state
    }

    pub fn location(&self) -> Option<Location> {
        self.inner.lock().location.clone()
    }

    /// Runs the §4.3 transition function. Illegal transitions are reported,
    /// not panicked on — callers (the master's partition manager) log and
    /// drop them, per spec.md §7.
    #[tracing::instrument(level = "debug", skip(self, location))]
    pub fn on_state_changed(
        &self,
        new_state: PartitionState,
        location: Option<Location>,
    ) -> Result<(), DataflowError> {
        {
            let mut inner = self.inner.lock();

            // Re-delivery of an already-applied COMMITTED from the same
            // location is an idempotent no-op (P8); from a different
            // location it is a fatal protocol error (two producers).
            if inner.state == PartitionState::Committed && new_state == PartitionState::Committed
            {
                return match (&inner.location, &location) {
                    (Some(current), Some(incoming)) if current == incoming => Ok(()),
                    (Some(_), Some(_)) => Err(DataflowError::IllegalMessage {
                        listener_id: "partition-metadata".into(),
                        kind: "commit from a different location than the current owner".into(),
                    }),
                    _ => Ok(()),
                };
            }

            if !inner.state.can_transition_to(new_state) {
                return Err(DataflowError::IllegalMessage {
                    listener_id: "partition-metadata".into(),
                    kind: format!("illegal transition {:?} -> {:?}", inner.state, new_state),
                });
            }

            if new_state == PartitionState::Committed && location.is_none() {
                return Err(DataflowError::IllegalMessage {
                    listener_id: "partition-metadata".into(),
                    kind: "commit without a location".into(),
                });
            }

            inner.state = new_state;
            if let Some(loc) = location {
                inner.location = Some(loc);
            }
            if matches!(new_state, PartitionState::Scheduled) {
                // A rebuild attempt starts with a clean block list; the new
                // attempt is responsible for re-committing its own blocks.
                inner.blocks.clear();
            }
            if new_state == PartitionState::Removed {
                inner.blocks.clear();
                inner.location = None;
            }
        }
        // Notify outside the lock: waking a task that immediately tries to
        // re-lock `inner` would otherwise contend with us while we still
        // hold the guard.
        self.notify.notify_waiters();
        Ok(())
    }

    /// Resolves on the first transition to `COMMITTED`; fails with
    /// `AbsentPartition` carrying the observed state on `LOST_BEFORE_COMMIT`,
    /// `LOST`, or `REMOVED`. Every call is itself a fresh future, so retries
    /// after `LOST -> SCHEDULED` naturally see the new generation.
    pub async fn location_future(&self) -> Result<Location, DataflowError> {
        loop {
            let notified = {
                let inner = self.inner.lock();
                match inner.state {
                    PartitionState::Committed => {
                        return Ok(inner
                            .location
                            .clone()
                            .expect("COMMITTED partitions always carry a location"));
                    }
                    s if s.awaits_commit() => self.notify.notified(),
                    s => return Err(DataflowError::AbsentPartition { state: s }),
                }
            };
            notified.await;
        }
    }

    /// Appends or finalizes block metadata. Only legal while `SCHEDULED`;
    /// idempotent per index (re-committing identical metadata for an index
    /// already present is a no-op; re-committing different metadata for
    /// the same index is a dropped protocol error, per DESIGN.md's
    /// resolution of the corresponding Open Question).
    #[tracing::instrument(level = "debug", skip(self, blocks))]
    pub fn commit_blocks(
        &self,
        blocks: impl IntoIterator<Item = (u64, BlockMetadata)>,
    ) -> Result<(), DataflowError> {
        let mut inner = self.inner.lock();
        if inner.state != PartitionState::Scheduled {
            return Err(DataflowError::IllegalMessage {
                listener_id: "partition-metadata".into(),
                kind: format!("commit_blocks is illegal in state {:?}", inner.state),
            });
        }
        for (index, block) in blocks {
            match inner.blocks.get(&index) {
                Some(existing) if existing == &block => {}
                Some(_) => {
                    return Err(DataflowError::IllegalMessage {
                        listener_id: "partition-metadata".into(),
                        kind: format!("conflicting commit for block index {index}"),
                    });
                }
                None => {
                    inner.blocks.insert(index, block);
                }
            }
        }
        Ok(())
    }

    pub fn blocks(&self) -> Vec<BlockMetadata> {
        self.inner.lock().blocks.values().cloned().collect()
    }

    /// Clears the block list; used on removal.
    pub fn remove_block_metadata(&self) {
        self.inner.lock().blocks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ExecutorId;

    fn tg() -> TaskGroupId {
        TaskGroupId::new("tg-0")
    }

    #[test]
    fn new_partition_starts_ready() {
        let p = PartitionMetadata::new(tg());
        assert_eq!(p.state(), PartitionState::Ready);
        assert!(p.location().is_none());
    }

    #[test]
    fn legal_transitions_follow_the_diagram() {
        let p = PartitionMetadata::new(tg());
        p.on_state_changed(PartitionState::Scheduled, None).unwrap();
        assert_eq!(p.state(), PartitionState::Scheduled);
        p.on_state_changed(
            PartitionState::Committed,
            Some(Location::Executor(ExecutorId::new("e1"))),
        )
        .unwrap();
        assert_eq!(p.state(), PartitionState::Committed);
        assert_eq!(p.location(), Some(Location::Executor(ExecutorId::new("e1"))));
    }

    #[test]
    fn illegal_transition_is_reported_not_applied() {
        let p = PartitionMetadata::new(tg());
        // READY -> COMMITTED skips SCHEDULED.
        let result = p.on_state_changed(
            PartitionState::Committed,
            Some(Location::Executor(ExecutorId::new("e1"))),
        );
        assert!(result.is_err());
        assert_eq!(p.state(), PartitionState::Ready);
    }

    #[test]
    fn commit_without_location_is_rejected() {
        let p = PartitionMetadata::new(tg());
        p.on_state_changed(PartitionState::Scheduled, None).unwrap();
        assert!(p.on_state_changed(PartitionState::Committed, None).is_err());
        assert_eq!(p.state(), PartitionState::Scheduled);
    }

    #[test]
    fn commit_is_idempotent_same_location() {
        let p = PartitionMetadata::new(tg());
        p.on_state_changed(PartitionState::Scheduled, None).unwrap();
        let loc = Location::Executor(ExecutorId::new("e1"));
        p.on_state_changed(PartitionState::Committed, Some(loc.clone()))
            .unwrap();
        // Re-delivery (at-least-once transport) from the same location.
        p.on_state_changed(PartitionState::Committed, Some(loc.clone()))
            .unwrap();
        assert_eq!(p.location(), Some(loc));
    }

    #[test]
    fn commit_from_a_different_location_is_a_protocol_error() {
        let p = PartitionMetadata::new(tg());
        p.on_state_changed(PartitionState::Scheduled, None).unwrap();
        p.on_state_changed(
            PartitionState::Committed,
            Some(Location::Executor(ExecutorId::new("e1"))),
        )
        .unwrap();
        let result = p.on_state_changed(
            PartitionState::Committed,
            Some(Location::Executor(ExecutorId::new("e2"))),
        );
        assert!(result.is_err());
        // The original owner is unchanged.
        assert_eq!(
            p.location(),
            Some(Location::Executor(ExecutorId::new("e1")))
        );
    }

    #[test]
    fn rebuild_after_lost_creates_a_new_attempt() {
        let p = PartitionMetadata::new(tg());
        p.on_state_changed(PartitionState::Scheduled, None).unwrap();
        p.on_state_changed(
            PartitionState::Committed,
            Some(Location::Executor(ExecutorId::new("e1"))),
        )
        .unwrap();
        p.on_state_changed(PartitionState::Lost, None).unwrap();
        assert_eq!(p.state(), PartitionState::Lost);
        p.on_state_changed(PartitionState::Scheduled, None).unwrap();
        assert_eq!(p.state(), PartitionState::Scheduled);
        assert!(p.blocks().is_empty());
    }

    #[test]
    fn commit_blocks_requires_scheduled_state_and_is_idempotent_per_index() {
        let p = PartitionMetadata::new(tg());
        let block = BlockMetadata {
            key: 0,
            byte_length: 10,
            offset: 0,
            element_count: 2,
        };
        // Not yet scheduled.
        assert!(p.commit_blocks([(0, block.clone())]).is_err());

        p.on_state_changed(PartitionState::Scheduled, None).unwrap();
        p.commit_blocks([(0, block.clone())]).unwrap();
        // Identical re-commit is a no-op.
        p.commit_blocks([(0, block.clone())]).unwrap();
        assert_eq!(p.blocks().len(), 1);

        let conflicting = BlockMetadata {
            element_count: 3,
            ..block
        };
        assert!(p.commit_blocks([(0, conflicting)]).is_err());
    }

    #[tokio::test]
    async fn location_future_resolves_on_commit() {
        let p = std::sync::Arc::new(PartitionMetadata::new(tg()));
        p.on_state_changed(PartitionState::Scheduled, None).unwrap();

        let waiter = {
            let p = p.clone();
            tokio::spawn(async move { p.location_future().await })
        };
        tokio::task::yield_now().await;
        p.on_state_changed(
            PartitionState::Committed,
            Some(Location::Executor(ExecutorId::new("e1"))),
        )
        .unwrap();

        let resolved = waiter.await.unwrap().unwrap();
        assert_eq!(resolved, Location::Executor(ExecutorId::new("e1")));
    }

    #[tokio::test]
    async fn location_future_fails_on_lost_before_commit() {
        let p = PartitionMetadata::new(tg());
        p.on_state_changed(PartitionState::Scheduled, None).unwrap();
        p.on_state_changed(PartitionState::LostBeforeCommit, None)
            .unwrap();
        let result = p.location_future().await;
        assert_eq!(
            result,
            Err(DataflowError::AbsentPartition {
                state: PartitionState::LostBeforeCommit
            })
        );
    }

    #[tokio::test]
    async fn location_future_fails_immediately_on_removed() {
        let p = PartitionMetadata::new(tg());
        p.on_state_changed(PartitionState::Scheduled, None).unwrap();
        p.on_state_changed(
            PartitionState::Committed,
            Some(Location::Executor(ExecutorId::new("e1"))),
        )
        .unwrap();
        p.on_state_changed(PartitionState::Lost, None).unwrap();
        p.on_state_changed(PartitionState::Removed, None).unwrap();
        let result = p.location_future().await;
        assert_eq!(
            result,
            Err(DataflowError::AbsentPartition {
                state: PartitionState::Removed
            })
        );
        assert!(p.blocks().is_empty());
        assert!(p.location().is_none());
    }
}
