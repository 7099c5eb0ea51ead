//! Key schema of the meta partition.
//!
//! Every meta record lives in space 0, partition 0, under one of a fixed set
//! of prefixes. Identifiers inside keys are big-endian so prefix scans list
//! records in id order.

use lattice_common::{IndexId, PartId, SchemaId, SpaceId};

/// The meta space.
pub const META_SPACE_ID: SpaceId = 0;
/// The single meta partition.
pub const META_PART_ID: PartId = 0;

/// Reserved key holding the cluster fingerprint. Written once, never
/// rewritten.
pub const CLUSTER_ID_KEY: &[u8] = b"__meta_cluster_id_key__";

pub const SPACES_PREFIX: &[u8] = b"__spaces__";
pub const SCHEMAS_PREFIX: &[u8] = b"__schemas__";
pub const INDEXES_PREFIX: &[u8] = b"__indexes__";
pub const HOSTS_PREFIX: &[u8] = b"__hosts__";
pub const USERS_PREFIX: &[u8] = b"__users__";
/// Prefix of legacy (v1) schema records, consumed by the meta upgrade.
pub const SCHEMAS_V1_PREFIX: &[u8] = b"__schemas_v1__";

const KIND_TAG: u8 = 0;
const KIND_EDGE: u8 = 1;

pub fn space_key(space: SpaceId) -> Vec<u8> {
    let mut out = SPACES_PREFIX.to_vec();
    out.extend_from_slice(&space.to_be_bytes());
    out
}

pub fn schema_key(space: SpaceId, id: SchemaId, is_edge: bool, version: u32) -> Vec<u8> {
    let mut out = SCHEMAS_PREFIX.to_vec();
    out.push(if is_edge { KIND_EDGE } else { KIND_TAG });
    out.extend_from_slice(&space.to_be_bytes());
    out.extend_from_slice(&id.to_be_bytes());
    out.extend_from_slice(&version.to_be_bytes());
    out
}

/// Prefix of all versions of one schema.
pub fn schema_versions_prefix(space: SpaceId, id: SchemaId, is_edge: bool) -> Vec<u8> {
    let mut out = SCHEMAS_PREFIX.to_vec();
    out.push(if is_edge { KIND_EDGE } else { KIND_TAG });
    out.extend_from_slice(&space.to_be_bytes());
    out.extend_from_slice(&id.to_be_bytes());
    out
}

pub fn index_key(space: SpaceId, index: IndexId) -> Vec<u8> {
    let mut out = INDEXES_PREFIX.to_vec();
    out.extend_from_slice(&space.to_be_bytes());
    out.extend_from_slice(&index.to_be_bytes());
    out
}

/// Prefix of every index record in one space.
pub fn index_space_prefix(space: SpaceId) -> Vec<u8> {
    let mut out = INDEXES_PREFIX.to_vec();
    out.extend_from_slice(&space.to_be_bytes());
    out
}

pub fn host_key(host: &str, port: u16) -> Vec<u8> {
    let mut out = HOSTS_PREFIX.to_vec();
    out.extend_from_slice(host.as_bytes());
    out.push(b':');
    out.extend_from_slice(&port.to_be_bytes());
    out
}

pub fn user_key(account: &str) -> Vec<u8> {
    let mut out = USERS_PREFIX.to_vec();
    out.extend_from_slice(account.as_bytes());
    out
}
