//! Thin client for operators: connects to a master's `runtime-master`
//! control listener to look up a partition's location or force a
//! worker-loss drill, without pulling in the full `vortex-master`/
//! `vortex-worker` crates.

use tonic::transport::{Channel, Endpoint};
use tonic::Request;
use vortex_core::RUNTIME_MASTER_LISTENER;
use vortex_proto::control_envelope::Payload;
use vortex_proto::control_transport_client::ControlTransportClient as TonicControlTransportClient;
use vortex_proto::{BlockLocationInfo, ContainerFailed, ControlEnvelope, RequestBlockLocation};

#[derive(Debug)]
pub struct OperatorError(pub String);

impl std::fmt::Display for OperatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for OperatorError {}

/// A connection to one master's `runtime-master` listener.
pub struct OperatorClient {
    client: TonicControlTransportClient<Channel>,
}

impl OperatorClient {
    pub async fn connect<D>(dst: D) -> Result<Self, OperatorError>
    where
        D: TryInto<Endpoint>,
        D::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let endpoint = dst
            .try_into()
            .map_err(|e| OperatorError(format!("invalid master address: {}", e.into())))?;
        let client = TonicControlTransportClient::connect(endpoint)
            .await
            .map_err(|e| OperatorError(format!("failed to connect to master: {e}")))?;
        Ok(Self { client })
    }

    fn envelope(payload: Payload) -> ControlEnvelope {
        ControlEnvelope {
            message_id: uuid::Uuid::new_v4().to_string(),
            listener_id: RUNTIME_MASTER_LISTENER.to_string(),
            payload: Some(payload),
        }
    }

    /// Looks up where a partition's blocks currently live (`RequestBlockLocation`).
    pub async fn request_block_location(
        &mut self,
        block_id: &str,
    ) -> Result<BlockLocationInfo, OperatorError> {
        let envelope = Self::envelope(Payload::RequestBlockLocation(RequestBlockLocation {
            executor_id: "operator-cli".to_string(),
            block_id: block_id.to_string(),
        }));
        let reply = self
            .client
            .request(Request::new(envelope))
            .await
            .map_err(|e| OperatorError(format!("request failed: {e}")))?
            .into_inner();
        match reply.payload {
            Some(Payload::BlockLocationInfo(info)) => Ok(info),
            other => Err(OperatorError(format!(
                "master replied with an unexpected message: {other:?}"
            ))),
        }
    }

    /// Simulates the loss of an executor's container, to exercise the
    /// master's `remove_worker` recovery path (spec.md §4.2/§4.3).
    pub async fn force_worker_loss(&mut self, executor_id: &str) -> Result<(), OperatorError> {
        let envelope = Self::envelope(Payload::ContainerFailed(ContainerFailed {
            executor_id: executor_id.to_string(),
        }));
        self.client
            .send(Request::new(envelope))
            .await
            .map_err(|e| OperatorError(format!("send failed: {e}")))?;
        Ok(())
    }
}
