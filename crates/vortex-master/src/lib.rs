//! Master-side dataflow runtime components: the Partition Manager (C3) and
//! its Control Transport (C1) surface.

pub mod client;
pub mod error;
pub mod partition_manager;
pub mod server;
pub mod service;

pub use client::ControlTransportClient;
pub use error::MasterError;
pub use partition_manager::InMemoryPartitionManager;
pub use server::{ControlTransportServer, MasterControlService};
pub use service::PartitionManagerService;
