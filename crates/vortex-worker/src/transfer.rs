//! Worker half of Block Transfer Framing (C7): a `BlockTransfer` gRPC
//! service and a client for pulling a partition's blocks from a peer
//! executor. The wire carrier here is a tonic bidirectional stream of
//! `vortex_proto::Frame` messages, whose `type`/`transfer_id`/`body` fields
//! are the same three the manual 6-byte header in
//! `vortex_storage::framing` packs by hand for spec.md §4.7 — protobuf
//! delimits the fields here instead of a literal byte layout, but transfer
//! ids are still unique per direction per channel and still released on
//! the matching `*_LAST` frame.
//!
//! Wire convention (spec.md §4.7 is agnostic to contents, this is ours): a
//! pull request is a single `PULL_LAST` frame whose body is the requested
//! partition id as UTF-8; the response is zero or more `PUSH_INTERMEDIATE`
//! frames (one block each) followed by a `PUSH_LAST` frame (the final
//! block, or empty if the partition has none). Each pushed frame's body is
//! the block's hash-range key (8 bytes, big-endian) followed by its element
//! bytes, so a shuffle reader pulling from a remote executor can still
//! restrict itself to its assigned hash range (spec.md §4.4).

use crate::error::WorkerError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Response, Status, Streaming};
use vortex_core::PartitionId;
use vortex_proto::{block_transfer_client::BlockTransferClient as TonicBlockTransferClient, BlockTransfer, Frame, FrameType};
use vortex_storage::BlockStore;

pub struct DataTransferService<S: BlockStore> {
    store: Arc<S>,
}

impl<S: BlockStore> DataTransferService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[tonic::async_trait]
impl<S: BlockStore + 'static> BlockTransfer for DataTransferService<S> {
    type TransferStream = ReceiverStream<Result<Frame, Status>>;

    async fn transfer(
        &self,
        request: Request<Streaming<Frame>>,
    ) -> Result<Response<Self::TransferStream>, Status> {
        let mut inbound = request.into_inner();
        let store = Arc::clone(&self.store);
        let (tx, rx) = mpsc::channel(16);

        tokio::spawn(async move {
            while let Some(frame) = inbound.next().await {
                let Ok(frame) = frame else { break };
                if frame.r#type != FrameType::PullLast as i32 {
                    continue;
                }
                let Ok(partition_id) = std::str::from_utf8(&frame.body)
                    .ok()
                    .and_then(|s| s.parse::<PartitionId>().ok())
                    .ok_or(())
                else {
                    let _ = tx
                        .send(Err(Status::invalid_argument("malformed partition id")))
                        .await;
                    continue;
                };
                let blocks = store.list_blocks(&partition_id);
                if blocks.is_empty() {
                    let _ = tx
                        .send(Ok(Frame {
                            r#type: FrameType::PushLast as i32,
                            transfer_id: frame.transfer_id,
                            body: Bytes::new().to_vec(),
                        }))
                        .await;
                    continue;
                }
                let last_index = blocks.len() - 1;
                for (i, block) in blocks.into_iter().enumerate() {
                    let bytes = match store.read_block(&partition_id, block.key) {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            let _ = tx.send(Err(Status::unavailable(e.to_string()))).await;
                            break;
                        }
                    };
                    let frame_type = if i == last_index {
                        FrameType::PushLast
                    } else {
                        FrameType::PushIntermediate
                    };
                    let mut body = BytesMut::with_capacity(8 + bytes.len());
                    body.put_u64(block.key);
                    body.put_slice(&bytes);
                    if tx
                        .send(Ok(Frame {
                            r#type: frame_type as i32,
                            transfer_id: frame.transfer_id,
                            body: body.to_vec(),
                        }))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

/// Client for pulling a partition's blocks from a peer executor's data
/// service.
pub struct DataTransferClient {
    client: TonicBlockTransferClient<Channel>,
}

impl DataTransferClient {
    pub async fn connect<D>(dst: D) -> Result<Self, WorkerError>
    where
        D: TryInto<Endpoint>,
        D::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let endpoint = dst
            .try_into()
            .map_err(|e| WorkerError::from_transport_error(e.into(), "invalid data endpoint"))?;
        let client = TonicBlockTransferClient::connect(endpoint)
            .await
            .map_err(|e| WorkerError::from_transport_error(e, "failed to connect to data service"))?;
        Ok(Self { client })
    }

    /// Pulls every block of `partition_id`, in key order, as a single
    /// logical transfer. Each result entry is `(key, bytes)`; the key is the
    /// block's hash-range slot, so a shuffle reader can filter by its
    /// assigned range after the pull.
    pub async fn pull_partition(
        &mut self,
        transfer_id: u16,
        partition_id: &PartitionId,
    ) -> Result<Vec<(u64, Bytes)>, WorkerError> {
        let request_frame = Frame {
            r#type: FrameType::PullLast as i32,
            transfer_id: transfer_id as u32,
            body: partition_id.to_string().into_bytes(),
        };
        let outbound = tokio_stream::iter(vec![request_frame]);
        let response = self
            .client
            .transfer(Request::new(outbound))
            .await
            .map_err(|e| WorkerError::from_transport_error(e, "transfer"))?;
        let mut inbound = response.into_inner();
        let mut blocks = Vec::new();
        while let Some(frame) = inbound
            .next()
            .await
            .transpose()
            .map_err(|e| WorkerError::from_transport_error(e, "transfer stream"))?
        {
            let is_last = frame.r#type == FrameType::PushLast as i32;
            if frame.body.len() >= 8 {
                let mut body = Bytes::from(frame.body);
                let key = body.get_u64();
                blocks.push((key, body));
            }
            if is_last {
                break;
            }
        }
        Ok(blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vortex_core::EdgeId;
    use vortex_storage::BlockStoreBackend;

    #[tokio::test]
    async fn service_streams_back_every_block_ending_in_push_last() {
        let store = Arc::new(BlockStoreBackend::new_memory());
        let partition = PartitionId::new(EdgeId::new("e0"), 0);
        store.write_block(&partition, 0, 2, b"ab").unwrap();
        store.write_block(&partition, 1, 1, b"c").unwrap();
        let service = DataTransferService::new(store);

        let request_frame = Frame {
            r#type: FrameType::PullLast as i32,
            transfer_id: 7,
            body: partition.to_string().into_bytes(),
        };
        let inbound = tokio_stream::iter(vec![Ok(request_frame)]);
        let response = service
            .transfer(Request::new(Box::pin(inbound) as _))
            .await
            .unwrap();
        let frames: Vec<Frame> = response
            .into_inner()
            .map(|r| r.unwrap())
            .collect::<Vec<_>>()
            .await;

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].r#type, FrameType::PushIntermediate as i32);
        assert_eq!(&frames[0].body[8..], b"ab");
        assert_eq!(frames[1].r#type, FrameType::PushLast as i32);
        assert_eq!(&frames[1].body[8..], b"c");
        assert!(frames.iter().all(|f| f.transfer_id == 7));
    }

    #[tokio::test]
    async fn service_emits_an_empty_push_last_for_a_partition_with_no_blocks() {
        let store = Arc::new(BlockStoreBackend::new_memory());
        let partition = PartitionId::new(EdgeId::new("e0"), 0);
        let service = DataTransferService::new(store);

        let request_frame = Frame {
            r#type: FrameType::PullLast as i32,
            transfer_id: 1,
            body: partition.to_string().into_bytes(),
        };
        let inbound = tokio_stream::iter(vec![Ok(request_frame)]);
        let response = service
            .transfer(Request::new(Box::pin(inbound) as _))
            .await
            .unwrap();
        let frames: Vec<Frame> = response
            .into_inner()
            .map(|r| r.unwrap())
            .collect::<Vec<_>>()
            .await;

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].r#type, FrameType::PushLast as i32);
        assert!(frames[0].body.is_empty());
    }
}
