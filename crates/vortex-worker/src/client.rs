//! Worker's client to the master's control-transport listener
//! (`runtime-master`): reports block/task-group state, requests partition
//! locations, reserves partitions. Mirrors
//! `vortex_master::ControlTransportClient`'s shape exactly (spec.md §4.1),
//! addressed at the opposite listener.

use std::time::Duration;
use tonic::transport::{Channel, Endpoint};
use tonic::Request;
use vortex_core::RUNTIME_MASTER_LISTENER;
use vortex_proto::{
    control_transport_client::ControlTransportClient as TonicControlTransportClient,
    ControlEnvelope,
};

use crate::error::WorkerError;

#[derive(Debug, Clone)]
pub struct MasterClient {
    client: TonicControlTransportClient<Channel>,
}

impl MasterClient {
    pub async fn connect<D>(dst: D) -> Result<Self, WorkerError>
    where
        D: TryInto<Endpoint>,
        D::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let endpoint = dst
            .try_into()
            .map_err(|e| WorkerError::from_transport_error(e.into(), "invalid master endpoint"))?;
        let client = TonicControlTransportClient::connect(endpoint)
            .await
            .map_err(|e| WorkerError::from_transport_error(e, "failed to connect to master"))?;
        Ok(Self { client })
    }

    /// Fire-and-forget to the master's `runtime-master` listener (e.g.
    /// `BlockStateChanged`, `TaskGroupStateChanged`).
    pub async fn send(&mut self, payload: vortex_proto::control_envelope::Payload) -> Result<(), WorkerError> {
        let envelope = ControlEnvelope {
            message_id: uuid::Uuid::new_v4().to_string(),
            listener_id: RUNTIME_MASTER_LISTENER.to_string(),
            payload: Some(payload),
        };
        self.client
            .send(Request::new(envelope))
            .await
            .map_err(|e| WorkerError::from_transport_error(e, "send"))?;
        Ok(())
    }

    /// Request/reply against the master (`RequestBlockLocation`,
    /// `ReservePartition`), with a caller-supplied deadline.
    pub async fn request(
        &mut self,
        payload: vortex_proto::control_envelope::Payload,
        timeout: Duration,
    ) -> Result<ControlEnvelope, WorkerError> {
        let envelope = ControlEnvelope {
            message_id: uuid::Uuid::new_v4().to_string(),
            listener_id: RUNTIME_MASTER_LISTENER.to_string(),
            payload: Some(payload),
        };
        let mut request = Request::new(envelope);
        request.set_timeout(timeout);
        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| WorkerError::from_transport_error(e, "request"))?;
        Ok(response.into_inner())
    }
}
