//! Identifier aliases, host addressing, and the wire-level error vocabulary.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical graph database (namespace for schemas, indexes, and partitions).
pub type SpaceId = u32;
/// Replicated shard of a space; unit of consensus.
pub type PartId = u32;
/// Schema identifier shared by tags and edge types.
pub type SchemaId = u32;
/// Vertex label identifier.
pub type TagId = u32;
/// Directed edge label. A positive value is the out-edge stored in the source
/// vertex's partition; its negation is the in-edge in the destination's.
pub type EdgeType = i32;
/// Secondary index identifier.
pub type IndexId = u32;
/// Edge rank, disambiguates parallel edges of the same type.
pub type Rank = i64;
/// Cluster fingerprint stamped into every inter-daemon RPC. Non-zero once set.
pub type ClusterId = i64;

/// Network identity of a daemon. Equality is structural.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostAddr {
    pub host: String,
    pub port: u16,
}

impl HostAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The sentinel address returned before a partition has elected a leader.
    pub const fn zero() -> Self {
        Self {
            host: String::new(),
            port: 0,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.host.is_empty() && self.port == 0
    }

    /// Parse `host:port`. The host part may not be empty.
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| anyhow::anyhow!("invalid host address {s:?}: missing port"))?;
        anyhow::ensure!(!host.is_empty(), "invalid host address {s:?}: empty host");
        let port: u16 = port
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid host address {s:?}: bad port"))?;
        Ok(Self::new(host, port))
    }

    /// Parse a comma-separated `host:port` list. Empty input yields an empty
    /// list (single-node deployment).
    pub fn parse_list(s: &str) -> anyhow::Result<Vec<Self>> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Vec::new());
        }
        s.split(',').map(|item| Self::parse(item.trim())).collect()
    }
}

impl fmt::Display for HostAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Error codes surfaced to clients in `PartitionResult`s.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    Succeeded,
    LeaderChanged,
    SpaceNotFound,
    PartNotFound,
    ConsensusError,
    FailedToCheckpoint,
    CheckpointBlocked,
    PartialResult,
    InvalidSpaceVidLen,
    InvalidOperation,
    IndexNotFound,
    SchemaNotFound,
    EdgePropNotFound,
    TagPropNotFound,
    NotNullable,
    DataTypeMismatch,
    FieldUnset,
    OutOfRange,
    InvalidFieldValue,
    FilterOut,
    KeyNotFound,
    Unknown,
}

/// Per-partition outcome attached to a response. Only failures are reported;
/// an empty list means the request fully succeeded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionResult {
    pub code: ErrorCode,
    pub part_id: PartId,
    /// Current suspected leader, filled for `LeaderChanged` when known.
    pub leader: Option<HostAddr>,
}

impl PartitionResult {
    pub fn new(code: ErrorCode, part_id: PartId) -> Self {
        Self {
            code,
            part_id,
            leader: None,
        }
    }

    pub fn with_leader(code: ErrorCode, part_id: PartId, leader: HostAddr) -> Self {
        Self {
            code,
            part_id,
            leader: Some(leader),
        }
    }
}
