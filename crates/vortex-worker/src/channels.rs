//! Data Channel Factory (C4): builds input readers and output writers for a
//! task's edges, according to communication pattern and data-store kind
//! (spec.md §4.4). Intra-stage (same task group) edges are wired with
//! in-process queues; cross-stage edges go through C7/C8
//! (`partition_worker::PartitionManagerWorker`).

use crate::error::WorkerError;
use crate::partition_worker::PartitionManagerWorker;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::mpsc;
use vortex_core::{CommPattern, EdgeId, HashRange, PartitionId};

/// One source-tagged read result: the elements read, plus the id of the
/// vertex they came from (spec.md §4.5's "list of futures tagged with
/// source-vertex id").
#[derive(Debug, Clone)]
pub struct TaggedElements {
    pub src_vertex_id: String,
    pub elements: Vec<Bytes>,
}

pub type ReadFuture = BoxFuture<'static, Result<TaggedElements, WorkerError>>;

/// An input reader for one of a task's `TaskInput`s. Each futures-worth of
/// data is tagged with its source-vertex id so the operator's read queue can
/// report which upstream produced it.
pub enum InputReader {
    /// A sibling task's output, wired with an in-process queue (spec.md
    /// §4.4's intra-stage case).
    Local {
        src_vertex_id: String,
        receiver: mpsc::Receiver<Bytes>,
    },
    /// A cross-stage edge: one future per producer partition, each going
    /// through C8. `Broadcast` and `Shuffle` fan out to every producer
    /// index; `Forward` carries exactly one.
    CrossStage {
        partition_worker: Arc<dyn PartitionManagerWorker>,
        partitions: Vec<PartitionId>,
        hash_range: Option<HashRange>,
    },
}

impl InputReader {
    /// `sum(sourceParallelism)` for this reader alone — the executor sums
    /// this across all of a task's non-side inputs to know how many pairs to
    /// drain from the read queue (spec.md §4.5).
    pub fn source_count(&self) -> usize {
        match self {
            InputReader::Local { .. } => 1,
            InputReader::CrossStage { partitions, .. } => partitions.len(),
        }
    }

    /// Consumes the reader into its constituent read futures.
    pub fn into_futures(self) -> Vec<ReadFuture> {
        match self {
            InputReader::Local {
                src_vertex_id,
                mut receiver,
            } => {
                let fut: ReadFuture = Box::pin(async move {
                    let mut elements = Vec::new();
                    while let Some(item) = receiver.recv().await {
                        elements.push(item);
                    }
                    Ok(TaggedElements {
                        src_vertex_id,
                        elements,
                    })
                });
                vec![fut]
            }
            InputReader::CrossStage {
                partition_worker,
                partitions,
                hash_range,
            } => partitions
                .into_iter()
                .map(|partition| {
                    let worker = Arc::clone(&partition_worker);
                    let tag = partition.to_string();
                    let range = hash_range;
                    let fut: ReadFuture = Box::pin(async move {
                        let elements = worker.retrieve(&partition, range).await?;
                        Ok(TaggedElements {
                            src_vertex_id: tag,
                            elements,
                        })
                    });
                    fut
                })
                .collect(),
        }
    }
}

/// An output writer for one of a task's outputs.
pub enum OutputWriter {
    Local(mpsc::Sender<Bytes>),
    CrossStage {
        partition_worker: Arc<dyn PartitionManagerWorker>,
        partition: PartitionId,
        pattern: CommPattern,
        shuffle_modulus: Option<u64>,
    },
}

impl OutputWriter {
    pub async fn write(&self, elements: Vec<Bytes>) -> Result<(), WorkerError> {
        match self {
            OutputWriter::Local(sender) => {
                for element in elements {
                    sender
                        .send(element)
                        .await
                        .map_err(|_| WorkerError::Dataflow(vortex_core::DataflowError::UnknownFailure {
                            context: "local output channel closed".into(),
                        }))?;
                }
                Ok(())
            }
            OutputWriter::CrossStage {
                partition_worker,
                partition,
                pattern,
                shuffle_modulus,
            } => match pattern {
                CommPattern::Shuffle => {
                    let modulus = shuffle_modulus.ok_or(WorkerError::UnsupportedCommPattern {
                        pattern: CommPattern::Shuffle,
                    })?;
                    partition_worker
                        .data_skew_write(partition, elements, modulus)
                        .await
                }
                CommPattern::Forward | CommPattern::Broadcast => {
                    partition_worker.commit(partition, elements).await
                }
            },
        }
    }

    /// Closes the writer: for a local queue this drops the sender (the
    /// receiving future's `recv()` loop ends); for a cross-stage writer,
    /// nothing further is required — `commit`/`data_skew_write` already
    /// published the partition's final state on the last `write()`.
    pub fn close(self) -> Result<(), WorkerError> {
        Ok(())
    }
}

/// Builds the in-process queue for a local (intra-task-group) edge, shared
/// by both the producing and consuming task's wiring step.
pub fn local_queue(buffer: usize) -> (mpsc::Sender<Bytes>, mpsc::Receiver<Bytes>) {
    mpsc::channel(buffer)
}

/// One-to-one: a single partition `edge#dstIndex` with the full hash range
/// (spec.md §4.4).
pub fn forward_partitions(edge_id: &EdgeId, dst_index: u32) -> Vec<PartitionId> {
    vec![PartitionId::new(edge_id.clone(), dst_index)]
}

/// Broadcast: one partition per producer index, each read in full (spec.md
/// §4.4).
pub fn broadcast_partitions(edge_id: &EdgeId, producer_parallelism: u32) -> Vec<PartitionId> {
    (0..producer_parallelism)
        .map(|i| PartitionId::new(edge_id.clone(), i))
        .collect()
}

/// Shuffle: every producer index, restricted to the consumer's assigned
/// hash range at read time (spec.md §4.4).
pub fn shuffle_partitions(edge_id: &EdgeId, producer_parallelism: u32) -> Vec<PartitionId> {
    broadcast_partitions(edge_id, producer_parallelism)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_is_exactly_one_partition() {
        let edge = EdgeId::new("e0");
        let partitions = forward_partitions(&edge, 2);
        assert_eq!(partitions, vec![PartitionId::new(edge, 2)]);
    }

    #[test]
    fn broadcast_spans_every_producer_index() {
        let edge = EdgeId::new("e0");
        let partitions = broadcast_partitions(&edge, 3);
        assert_eq!(
            partitions,
            vec![
                PartitionId::new(edge.clone(), 0),
                PartitionId::new(edge.clone(), 1),
                PartitionId::new(edge, 2),
            ]
        );
    }

    #[tokio::test]
    async fn local_reader_drains_until_sender_drops() {
        let (tx, rx) = local_queue(4);
        tx.send(Bytes::from_static(b"a")).await.unwrap();
        tx.send(Bytes::from_static(b"b")).await.unwrap();
        drop(tx);

        let reader = InputReader::Local {
            src_vertex_id: "producer".into(),
            receiver: rx,
        };
        assert_eq!(reader.source_count(), 1);
        let futures = reader.into_futures();
        assert_eq!(futures.len(), 1);
        let result = futures.into_iter().next().unwrap().await.unwrap();
        assert_eq!(result.src_vertex_id, "producer");
        assert_eq!(result.elements, vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
    }
}
