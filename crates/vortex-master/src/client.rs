//! Client for the master to reach a worker's control-transport listener
//! (`executor`), e.g. to dispatch `ScheduleTaskGroup`.

use std::time::Duration;
use tonic::transport::{Channel, Endpoint};
use tonic::Request;
use vortex_core::EXECUTOR_LISTENER;
use vortex_proto::{control_transport_client::ControlTransportClient as TonicControlTransportClient, ControlEnvelope};

use crate::error::MasterError;

#[derive(Debug, Clone)]
pub struct ControlTransportClient {
    client: TonicControlTransportClient<Channel>,
}

impl ControlTransportClient {
    pub async fn connect<D>(dst: D) -> Result<Self, MasterError>
    where
        D: TryInto<Endpoint>,
        D::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::connect_with_endpoint_config(dst, |endpoint| endpoint).await
    }

    pub async fn connect_with_timeout<D>(dst: D, timeout: Duration) -> Result<Self, MasterError>
    where
        D: TryInto<Endpoint>,
        D::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::connect_with_endpoint_config(dst, |endpoint| endpoint.timeout(timeout)).await
    }

    async fn connect_with_endpoint_config<D, F>(dst: D, config_fn: F) -> Result<Self, MasterError>
    where
        D: TryInto<Endpoint>,
        D::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
        F: FnOnce(Endpoint) -> Endpoint,
    {
        let endpoint = dst
            .try_into()
            .map_err(|e| MasterError::from_transport_error(e.into(), "invalid endpoint"))?;
        let client = TonicControlTransportClient::connect(config_fn(endpoint))
            .await
            .map_err(|e| MasterError::from_transport_error(e, "failed to connect"))?;
        Ok(Self { client })
    }

    /// Fire-and-forget to the worker's `executor` listener.
    pub async fn send(&mut self, payload: vortex_proto::control_envelope::Payload) -> Result<(), MasterError> {
        let envelope = ControlEnvelope {
            message_id: uuid::Uuid::new_v4().to_string(),
            listener_id: EXECUTOR_LISTENER.to_string(),
            payload: Some(payload),
        };
        self.client
            .send(Request::new(envelope))
            .await
            .map_err(|e| MasterError::from_transport_error(e, "send"))?;
        Ok(())
    }

    /// Request/reply against the worker's `executor` listener, with a
    /// caller-supplied deadline (spec.md §4.1).
    pub async fn request(
        &mut self,
        payload: vortex_proto::control_envelope::Payload,
        timeout: Duration,
    ) -> Result<ControlEnvelope, MasterError> {
        let envelope = ControlEnvelope {
            message_id: uuid::Uuid::new_v4().to_string(),
            listener_id: EXECUTOR_LISTENER.to_string(),
            payload: Some(payload),
        };
        let mut request = Request::new(envelope);
        request.set_timeout(timeout);
        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| MasterError::from_transport_error(e, "request"))?;
        Ok(response.into_inner())
    }

    pub fn client_mut(&mut self) -> &mut TonicControlTransportClient<Channel> {
        &mut self.client
    }
}
