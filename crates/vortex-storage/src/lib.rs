//! Worker-local block storage (C4's data-store axis) and block transfer
//! framing (C7).

pub mod error;
pub mod framing;
pub mod storage;

pub use error::{StorageError, StorageErrorSource};
pub use framing::{decode_frame, encode_frame, Frame, FrameHeader, FrameType, TransferMultiplexer};
pub use storage::{BlockStore, BlockStoreBackend, MemoryBlockStore, SyncMode};
