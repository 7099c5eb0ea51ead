//! Result codes surfaced by the KV store to the processors above it.

use std::fmt;

/// Outcome of a KV-store operation. The processor layer owns the fixed
/// translation of these into wire error codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Succeeded,
    /// The addressed partition is led by another replica.
    LeaderChanged,
    SpaceNotFound,
    PartNotFound,
    /// Consensus could not commit (no leader, quorum lost, replication fault).
    ConsensusError,
    CheckpointError,
    /// Writes rejected while a checkpoint blocks the partition.
    WriteBlocked,
    PartialResult,
    /// Point read found no value.
    KeyNotFound,
    Unknown,
}

impl ResultCode {
    pub fn ok(self) -> bool {
        self == ResultCode::Succeeded
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
