pub mod backend;
pub mod file_io;

pub use backend::{BlockStore, BlockStoreBackend, MemoryBlockStore, SyncMode};
pub use file_io::FileIo;
