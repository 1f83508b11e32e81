//! Wire definitions for the runtime's two gRPC surfaces: the control
//! transport (C1, spec.md §4.1/§6) and the block-transfer frame stream
//! (C7, spec.md §4.7).
//!
//! Generated via `tonic_build` in `build.rs`.

/// Control transport: the tagged-union envelope, its payload messages, and
/// the `ControlTransport` service both master and worker host one instance
/// of (under the `runtime-master` and `executor` listener ids respectively).
pub mod control {
    pub mod v1 {
        tonic::include_proto!("vortex.control.v1");
    }
}

/// Block transfer framing carried over a bidirectional stream.
pub mod data {
    pub mod v1 {
        tonic::include_proto!("vortex.data.v1");
    }
}

pub use control::v1::control_transport_client::ControlTransportClient;
pub use control::v1::control_transport_server::{ControlTransport, ControlTransportServer};
pub use control::v1::*;

pub use data::v1::block_transfer_client::BlockTransferClient;
pub use data::v1::block_transfer_server::{BlockTransfer, BlockTransferServer};
pub use data::v1::{Frame, FrameType};
