//! Worker-local block storage: the concrete side of C4's data-store axis
//! (spec.md §3's `{memory, serialized-memory, local-file, remote-file}`).
//!
//! Block *metadata* is transmitted over the control transport, never
//! persisted (spec.md §6); this module only persists the bytes and hands
//! back a `vortex_core::BlockMetadata` describing where they landed.

use crate::error::StorageError;
use crate::storage::file_io::FileIo;
use bytes::Bytes;
use dashmap::DashMap;
use fs4::fs_std::FileExt;
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use sysinfo::{ProcessesToUpdate, System};
use vortex_core::{BlockMetadata, PartitionId};

/// Worker-local persistence for one partition's blocks.
pub trait BlockStore: Send + Sync {
    /// Appends a block's bytes and returns the metadata entry describing
    /// its placement (key, byte length, offset, element count).
    fn write_block(
        &self,
        partition: &PartitionId,
        key: u64,
        element_count: u64,
        bytes: &[u8],
    ) -> Result<BlockMetadata, StorageError>;

    fn read_block(&self, partition: &PartitionId, key: u64) -> Result<Bytes, StorageError>;

    fn list_blocks(&self, partition: &PartitionId) -> Vec<BlockMetadata>;

    /// Drops all bytes held for a partition; used on `REMOVED`.
    fn remove_partition(&self, partition: &PartitionId) -> Result<(), StorageError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    None,
    Immediate,
    Periodic,
}

/// Selects a `BlockStore` implementation for a worker process, mirroring
/// the `{memory, serialized-memory, local-file, remote-file}` data-store
/// axis of spec.md §3.
#[derive(Debug)]
pub enum BlockStoreBackend {
    Memory {
        store: MemoryBlockStore,
    },
    SerializedMemory {
        store: MemoryBlockStore,
    },
    LocalFile {
        sync_mode: SyncMode,
        data_dir: PathBuf,
        _directory_lock: File,
    },
    /// Bytes written here are addressed by `Location::Remote` and survive
    /// executor loss; this implementation treats the configured directory
    /// as the durable store (an actual remote-object-store client is out
    /// of scope per spec.md §1's exclusion of storage backends beyond
    /// their abstract interface).
    RemoteFile {
        sync_mode: SyncMode,
        data_dir: PathBuf,
        _directory_lock: File,
    },
}

impl BlockStoreBackend {
    pub fn new_memory() -> Self {
        BlockStoreBackend::Memory {
            store: MemoryBlockStore::default(),
        }
    }

    pub fn new_serialized_memory() -> Self {
        BlockStoreBackend::SerializedMemory {
            store: MemoryBlockStore::default(),
        }
    }

    pub fn new_local_file<P: AsRef<Path>>(
        sync_mode: SyncMode,
        data_dir: P,
    ) -> Result<Self, StorageError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let directory_lock = acquire_directory_lock(&data_dir, ".vortex-local.lock")?;
        Ok(BlockStoreBackend::LocalFile {
            sync_mode,
            data_dir,
            _directory_lock: directory_lock,
        })
    }

    pub fn new_remote_file<P: AsRef<Path>>(
        sync_mode: SyncMode,
        data_dir: P,
    ) -> Result<Self, StorageError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let directory_lock = acquire_directory_lock(&data_dir, ".vortex-remote.lock")?;
        Ok(BlockStoreBackend::RemoteFile {
            sync_mode,
            data_dir,
            _directory_lock: directory_lock,
        })
    }

    pub fn store(&self) -> &dyn BlockStore {
        match self {
            BlockStoreBackend::Memory { store } | BlockStoreBackend::SerializedMemory { store } => {
                store
            }
            BlockStoreBackend::LocalFile { .. } | BlockStoreBackend::RemoteFile { .. } => self,
        }
    }
}

impl Drop for BlockStoreBackend {
    fn drop(&mut self) {
        let (data_dir, lock_name) = match self {
            BlockStoreBackend::LocalFile { data_dir, .. } => (data_dir, ".vortex-local.lock"),
            BlockStoreBackend::RemoteFile { data_dir, .. } => (data_dir, ".vortex-remote.lock"),
            _ => return,
        };
        let lock_path = data_dir.join(lock_name);
        if lock_path.exists() {
            if let Err(e) = std::fs::remove_file(&lock_path) {
                tracing::warn!(?lock_path, error = %e, "failed to remove directory lock file");
            }
        }
    }
}

impl BlockStore for BlockStoreBackend {
    #[tracing::instrument(level = "debug", skip(self, bytes), fields(partition = %partition, key, len = bytes.len()))]
    fn write_block(
        &self,
        partition: &PartitionId,
        key: u64,
        element_count: u64,
        bytes: &[u8],
    ) -> Result<BlockMetadata, StorageError> {
        match self {
            BlockStoreBackend::Memory { store } | BlockStoreBackend::SerializedMemory { store } => {
                store.write_block(partition, key, element_count, bytes)
            }
            BlockStoreBackend::LocalFile {
                sync_mode, data_dir, ..
            }
            | BlockStoreBackend::RemoteFile {
                sync_mode, data_dir, ..
            } => write_block_to_file(data_dir, *sync_mode, partition, key, element_count, bytes),
        }
    }

    fn read_block(&self, partition: &PartitionId, key: u64) -> Result<Bytes, StorageError> {
        match self {
            BlockStoreBackend::Memory { store } | BlockStoreBackend::SerializedMemory { store } => {
                store.read_block(partition, key)
            }
            BlockStoreBackend::LocalFile { data_dir, .. }
            | BlockStoreBackend::RemoteFile { data_dir, .. } => {
                read_block_from_file(data_dir, partition, key)
            }
        }
    }

    fn list_blocks(&self, partition: &PartitionId) -> Vec<BlockMetadata> {
        match self {
            BlockStoreBackend::Memory { store } | BlockStoreBackend::SerializedMemory { store } => {
                store.list_blocks(partition)
            }
            BlockStoreBackend::LocalFile { data_dir, .. }
            | BlockStoreBackend::RemoteFile { data_dir, .. } => list_blocks_from_file(data_dir, partition),
        }
    }

    fn remove_partition(&self, partition: &PartitionId) -> Result<(), StorageError> {
        match self {
            BlockStoreBackend::Memory { store } | BlockStoreBackend::SerializedMemory { store } => {
                store.remove_partition(partition)
            }
            BlockStoreBackend::LocalFile { data_dir, .. }
            | BlockStoreBackend::RemoteFile { data_dir, .. } => {
                remove_partition_dir(data_dir, partition)
            }
        }
    }
}

/// An in-process block store, used for the `memory` and `serialized-memory`
/// data-store kinds. The distinction between the two is the caller's coder
/// step (whether bytes are already serialized); storage itself is identical.
#[derive(Debug, Default)]
pub struct MemoryBlockStore {
    blocks: DashMap<String, RwLock<Vec<(BlockMetadata, Bytes)>>>,
}

impl BlockStore for MemoryBlockStore {
    fn write_block(
        &self,
        partition: &PartitionId,
        key: u64,
        element_count: u64,
        bytes: &[u8],
    ) -> Result<BlockMetadata, StorageError> {
        let entry = self
            .blocks
            .entry(partition.to_string())
            .or_insert_with(|| RwLock::new(Vec::new()));
        let mut guard = entry.write();
        let offset = guard.iter().map(|(m, _)| m.byte_length).sum();
        let metadata = BlockMetadata {
            key,
            byte_length: bytes.len() as u64,
            offset,
            element_count,
        };
        guard.push((metadata.clone(), Bytes::copy_from_slice(bytes)));
        Ok(metadata)
    }

    fn read_block(&self, partition: &PartitionId, key: u64) -> Result<Bytes, StorageError> {
        let entry = self.blocks.get(&partition.to_string()).ok_or_else(|| {
            StorageError::Unavailable {
                context: format!("no blocks for partition {partition}"),
            }
        })?;
        let guard = entry.read();
        guard
            .iter()
            .find(|(m, _)| m.key == key)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| StorageError::Unavailable {
                context: format!("block {key} not found for partition {partition}"),
            })
    }

    fn list_blocks(&self, partition: &PartitionId) -> Vec<BlockMetadata> {
        self.blocks
            .get(&partition.to_string())
            .map(|entry| entry.read().iter().map(|(m, _)| m.clone()).collect())
            .unwrap_or_default()
    }

    fn remove_partition(&self, partition: &PartitionId) -> Result<(), StorageError> {
        self.blocks.remove(&partition.to_string());
        Ok(())
    }
}

fn partition_dir(data_dir: &Path, partition: &PartitionId) -> PathBuf {
    data_dir.join(partition.to_string())
}

fn block_path(data_dir: &Path, partition: &PartitionId, key: u64) -> PathBuf {
    partition_dir(data_dir, partition).join(format!("{key}.block"))
}

#[tracing::instrument(level = "debug", skip(bytes), fields(partition = %partition, key))]
fn write_block_to_file(
    data_dir: &Path,
    sync_mode: SyncMode,
    partition: &PartitionId,
    key: u64,
    element_count: u64,
    bytes: &[u8],
) -> Result<BlockMetadata, StorageError> {
    let dir = partition_dir(data_dir, partition);
    std::fs::create_dir_all(&dir)
        .map_err(|e| StorageError::from_io_error(e, "failed to create partition directory"))?;
    let path = block_path(data_dir, partition, key);
    let mut file = FileIo::create_with_write_truncate_permissions(&path)?;
    let offset = FileIo::append_data_to_end(&mut file, bytes)?;
    if sync_mode != SyncMode::None {
        FileIo::synchronize_to_disk(&mut file)?;
    }
    Ok(BlockMetadata {
        key,
        byte_length: bytes.len() as u64,
        offset,
        element_count,
    })
}

fn read_block_from_file(
    data_dir: &Path,
    partition: &PartitionId,
    key: u64,
) -> Result<Bytes, StorageError> {
    let path = block_path(data_dir, partition, key);
    let mut file = FileIo::open_with_read_only_permissions(&path)?;
    let size = FileIo::get_file_size(&file)?;
    let mut buffer = vec![0u8; size as usize];
    FileIo::read_data_at_offset(&mut file, &mut buffer, 0)?;
    Ok(Bytes::from(buffer))
}

fn list_blocks_from_file(data_dir: &Path, partition: &PartitionId) -> Vec<BlockMetadata> {
    let dir = partition_dir(data_dir, partition);
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return Vec::new();
    };
    let mut blocks = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let Ok(key) = stem.parse::<u64>() else {
            continue;
        };
        let Ok(file) = FileIo::open_with_read_only_permissions(&path) else {
            continue;
        };
        let Ok(size) = FileIo::get_file_size(&file) else {
            continue;
        };
        blocks.push(BlockMetadata {
            key,
            byte_length: size,
            offset: 0,
            element_count: 0,
        });
    }
    blocks.sort_by_key(|m| m.key);
    blocks
}

fn remove_partition_dir(data_dir: &Path, partition: &PartitionId) -> Result<(), StorageError> {
    let dir = partition_dir(data_dir, partition);
    if dir.exists() {
        std::fs::remove_dir_all(&dir)
            .map_err(|e| StorageError::from_io_error(e, "failed to remove partition directory"))?;
    }
    Ok(())
}

fn acquire_directory_lock(data_dir: &Path, lock_name: &str) -> Result<File, StorageError> {
    if !data_dir.exists() {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| StorageError::from_io_error(e, "failed to create data directory"))?;
    }
    let lock_path = data_dir.join(lock_name);
    let lock_file = if lock_path.exists() {
        OpenOptions::new()
            .write(true)
            .open(&lock_path)
            .map_err(|e| StorageError::from_io_error(e, "failed to open existing lock file"))?
    } else {
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&lock_path)
            .map_err(|e| StorageError::from_io_error(e, "failed to create lock file"))?
    };

    match lock_file.try_lock_exclusive() {
        Ok(true) => {
            write_lock_metadata(&lock_file)?;
            Ok(lock_file)
        }
        Ok(false) | Err(_) => handle_lock_conflict(&lock_path, data_dir, lock_name),
    }
}

fn write_lock_metadata(lock_file: &File) -> Result<(), StorageError> {
    let pid = std::process::id();
    let timestamp = chrono::Utc::now().to_rfc3339();
    let info = format!("PID: {pid}\nTimestamp: {timestamp}\n");
    let _ = lock_file.set_len(0);
    (&*lock_file)
        .write_all(info.as_bytes())
        .map_err(|e| StorageError::from_io_error(e, "failed to write lock metadata"))
}

fn handle_lock_conflict(
    lock_path: &Path,
    data_dir: &Path,
    lock_name: &str,
) -> Result<File, StorageError> {
    let existing_pid = std::fs::read_to_string(lock_path).ok().and_then(|content| {
        content
            .lines()
            .find(|line| line.starts_with("PID:"))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|pid| pid.parse::<u32>().ok())
    });

    match existing_pid {
        Some(pid) if is_process_alive(pid) => Err(StorageError::DirectoryLocked {
            context: format!("block directory {data_dir:?} is already in use"),
            pid: Some(pid),
        }),
        Some(_) | None => {
            if std::fs::remove_file(lock_path).is_ok() {
                acquire_directory_lock(data_dir, lock_name)
            } else {
                Err(StorageError::DirectoryLocked {
                    context: format!("block directory {data_dir:?} is already in use"),
                    pid: None,
                })
            }
        }
    }
}

fn is_process_alive(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, false);
    system
        .processes()
        .get(&sysinfo::Pid::from(pid as usize))
        .is_some()
}
