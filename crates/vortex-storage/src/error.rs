use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum StorageError {
    ReadFailed {
        context: String,
        source: Box<StorageErrorSource>,
    },
    WriteFailed {
        context: String,
        source: Box<StorageErrorSource>,
    },
    InsufficientSpace {
        context: String,
    },
    PermissionDenied {
        context: String,
    },
    DataCorruption {
        context: String,
        details: String,
    },
    Unavailable {
        context: String,
    },
    DirectoryLocked {
        context: String,
        pid: Option<u32>,
    },
    LockAcquisitionFailed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StorageErrorSource {
    Io(String),
    Serialization(String),
    Custom(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ReadFailed { context, source } => {
                write!(f, "read failed in {context}: {source}")
            }
            StorageError::WriteFailed { context, source } => {
                write!(f, "write failed in {context}: {source}")
            }
            StorageError::InsufficientSpace { context } => {
                write!(f, "insufficient space in {context}")
            }
            StorageError::PermissionDenied { context } => {
                write!(f, "permission denied in {context}")
            }
            StorageError::DataCorruption { context, details } => {
                write!(f, "data corruption in {context}: {details}")
            }
            StorageError::Unavailable { context } => {
                write!(f, "storage unavailable in {context}")
            }
            StorageError::DirectoryLocked { context, pid } => match pid {
                Some(pid) => write!(f, "directory locked in {context} (pid: {pid})"),
                None => write!(f, "directory locked in {context}"),
            },
            StorageError::LockAcquisitionFailed => {
                write!(f, "failed to acquire exclusive lock on file")
            }
        }
    }
}

impl fmt::Display for StorageErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageErrorSource::Io(msg) => write!(f, "io error: {msg}"),
            StorageErrorSource::Serialization(msg) => write!(f, "serialization error: {msg}"),
            StorageErrorSource::Custom(msg) => write!(f, "custom error: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {}
impl std::error::Error for StorageErrorSource {}

impl StorageError {
    pub fn from_io_error(e: std::io::Error, context: &str) -> Self {
        match e.kind() {
            std::io::ErrorKind::PermissionDenied => StorageError::PermissionDenied {
                context: context.to_string(),
            },
            std::io::ErrorKind::OutOfMemory => StorageError::InsufficientSpace {
                context: context.to_string(),
            },
            _ => StorageError::WriteFailed {
                context: context.to_string(),
                source: Box::new(StorageErrorSource::Io(e.to_string())),
            },
        }
    }

    /// Classifies this error per spec.md §7: I/O-level failures at a channel
    /// boundary are recoverable at task-group granularity; everything else
    /// (corruption, a misbehaving lock holder) is not.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StorageError::ReadFailed { .. }
                | StorageError::WriteFailed { .. }
                | StorageError::InsufficientSpace { .. }
                | StorageError::Unavailable { .. }
        )
    }
}
