//! The master's half of the Control Transport (C1): a `ControlTransport`
//! gRPC adapter in front of whatever implements `MasterControlService`
//! (spec.md §4.1), hosted under the reserved `runtime-master` listener id.

use async_trait::async_trait;
use std::sync::Arc;
use tonic::{Request, Response, Status};
use vortex_proto::{ControlEnvelope, ControlTransport, Empty};

/// The master process's single control listener. `on_message` is the
/// fire-and-forget half (`send`); `on_request` completes a reply (`request`)
/// — tonic's unary response channel plays the role of `ctx.reply(u)`.
#[async_trait]
pub trait MasterControlService: Send + Sync {
    async fn on_message(&self, envelope: ControlEnvelope);
    async fn on_request(&self, envelope: ControlEnvelope) -> ControlEnvelope;
}

/// Server adapter converting tonic requests into `MasterControlService`
/// calls.
#[derive(Debug)]
pub struct ControlTransportServer<T: MasterControlService> {
    service: Arc<T>,
}

impl<T: MasterControlService> ControlTransportServer<T> {
    pub fn new(service: Arc<T>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &T {
        &self.service
    }
}

#[tonic::async_trait]
impl<T: MasterControlService + 'static> ControlTransport for ControlTransportServer<T> {
    async fn send(&self, request: Request<ControlEnvelope>) -> Result<Response<Empty>, Status> {
        self.service.on_message(request.into_inner()).await;
        Ok(Response::new(Empty {}))
    }

    async fn request(
        &self,
        request: Request<ControlEnvelope>,
    ) -> Result<Response<ControlEnvelope>, Status> {
        let reply = self.service.on_request(request.into_inner()).await;
        Ok(Response::new(reply))
    }
}
