//! Identifiers shared by every other crate in the workspace.
//!
//! All identifiers are dense, unique within a job, and never reused. They
//! are opaque strings with the structural conventions spec.md §3 describes;
//! `PartitionId` additionally carries its own structure (`edge#index`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id!(JobId);
string_id!(StageId);
string_id!(TaskGroupId);
string_id!(TaskId);
string_id!(EdgeId);
string_id!(ExecutorId);

/// The two reserved control-transport listener ids (spec.md §4.1).
pub const RUNTIME_MASTER_LISTENER: &str = "runtime-master";
pub const EXECUTOR_LISTENER: &str = "executor";

/// `<edgeId>#<producerTaskIndex>`: one shard of intermediate data produced
/// by exactly one producer task, per spec.md §3.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionId {
    pub edge: EdgeId,
    pub producer_index: u32,
}

impl PartitionId {
    pub fn new(edge: EdgeId, producer_index: u32) -> Self {
        Self {
            edge,
            producer_index,
        }
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.edge, self.producer_index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionIdParseError(pub String);

impl fmt::Display for PartitionIdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid partition id '{}', expected '<edge>#<index>'", self.0)
    }
}

impl std::error::Error for PartitionIdParseError {}

impl FromStr for PartitionId {
    type Err = PartitionIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (edge, index) = s
            .rsplit_once('#')
            .ok_or_else(|| PartitionIdParseError(s.to_string()))?;
        let producer_index: u32 = index
            .parse()
            .map_err(|_| PartitionIdParseError(s.to_string()))?;
        if edge.is_empty() {
            return Err(PartitionIdParseError(s.to_string()));
        }
        Ok(PartitionId {
            edge: EdgeId::new(edge),
            producer_index,
        })
    }
}

/// The owner of a partition's bytes: a specific executor, or the `remote`
/// sentinel for external stores (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Location {
    Executor(ExecutorId),
    Remote,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Executor(id) => write!(f, "{id}"),
            Location::Remote => write!(f, "remote"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_id_display_and_parse_round_trip() {
        let id = PartitionId::new(EdgeId::new("e7"), 3);
        assert_eq!(id.to_string(), "e7#3");
        let parsed: PartitionId = "e7#3".parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn partition_id_parse_rejects_malformed_input() {
        assert!("no-hash".parse::<PartitionId>().is_err());
        assert!("#3".parse::<PartitionId>().is_err());
        assert!("edge#not-a-number".parse::<PartitionId>().is_err());
    }

    #[test]
    fn job_id_conversions() {
        let id: JobId = "job-42".into();
        assert_eq!(id.as_str(), "job-42");
        let raw: String = id.into();
        assert_eq!(raw, "job-42");
    }

    #[test]
    fn location_display() {
        assert_eq!(Location::Remote.to_string(), "remote");
        assert_eq!(
            Location::Executor(ExecutorId::new("exec-1")).to_string(),
            "exec-1"
        );
    }
}
