//! Meta record CRUD over the replicated meta partition.
//!
//! Records are serde_json values keyed by the fixed prefixes in
//! [`keys`](crate::keys). Writes are ordinary replicated KV writes and
//! therefore succeed only on the current meta leader; reads go through the
//! local engine (meta daemons run with `check_leader` off, so followers
//! serve reads).

use std::sync::Arc;

use lattice_common::schema::SpaceDesc;
use lattice_common::{ClusterId, HostAddr, IndexId, IndexItem, Schema, SchemaId, SpaceId};
use lattice_kv::{LatticeStore, ResultCode};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::keys;

/// A named schema version as stored in meta.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SchemaRecord {
    pub name: String,
    pub schema: Schema,
}

/// Host liveness record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HostRecord {
    pub host: HostAddr,
    pub last_seen_ms: u64,
}

/// User record. Only the root-user bootstrap is in scope; the password is
/// stored as a one-way fingerprint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub account: String,
    pub password_fingerprint: u64,
    pub is_god: bool,
}

/// Fowler–Noll–Vo fold used as the stored password fingerprint.
pub fn password_fingerprint(password: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in password.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x100_0000_01b3);
    }
    hash
}

/// Meta service facade bound to one daemon's store.
pub struct MetaService {
    store: Arc<LatticeStore>,
    cluster_id: ClusterId,
}

impl MetaService {
    pub fn new(store: Arc<LatticeStore>, cluster_id: ClusterId) -> Self {
        Self { store, cluster_id }
    }

    pub fn cluster_id(&self) -> ClusterId {
        self.cluster_id
    }

    /// Reject requests stamped with a different cluster's fingerprint.
    pub fn check_cluster_id(&self, presented: ClusterId) -> Result<(), ResultCode> {
        if presented == self.cluster_id {
            Ok(())
        } else {
            warn!(presented, expected = self.cluster_id, "cluster id mismatch");
            Err(ResultCode::Unknown)
        }
    }

    async fn put_record(&self, key: Vec<u8>, record: &impl Serialize) -> ResultCode {
        let value = match serde_json::to_vec(record) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = ?err, "meta record encode failed");
                return ResultCode::Unknown;
            }
        };
        self.store
            .async_multi_put(keys::META_SPACE_ID, keys::META_PART_ID, vec![(key, value)])
            .await
    }

    fn get_record<T: for<'de> Deserialize<'de>>(&self, key: &[u8]) -> Result<T, ResultCode> {
        let bytes = self.store.get(keys::META_SPACE_ID, keys::META_PART_ID, key)?;
        serde_json::from_slice(&bytes).map_err(|err| {
            warn!(error = ?err, "meta record decode failed");
            ResultCode::Unknown
        })
    }

    fn scan_records<T: for<'de> Deserialize<'de>>(
        &self,
        prefix: &[u8],
    ) -> Result<Vec<T>, ResultCode> {
        let iter =
            self.store
                .prefix_scan(keys::META_SPACE_ID, keys::META_PART_ID, prefix, None)?;
        let mut out = Vec::new();
        for (_, value) in iter {
            match serde_json::from_slice(&value) {
                Ok(record) => out.push(record),
                Err(err) => warn!(error = ?err, "skipping undecodable meta record"),
            }
        }
        Ok(out)
    }

    // ---- spaces ----

    pub async fn create_space(&self, desc: &SpaceDesc) -> ResultCode {
        self.put_record(keys::space_key(desc.space_id), desc).await
    }

    pub fn get_space(&self, space: SpaceId) -> Result<SpaceDesc, ResultCode> {
        self.get_record(&keys::space_key(space))
    }

    pub fn list_spaces(&self) -> Result<Vec<SpaceDesc>, ResultCode> {
        self.scan_records(keys::SPACES_PREFIX)
    }

    // ---- schemas ----

    pub async fn create_schema(
        &self,
        space: SpaceId,
        id: SchemaId,
        is_edge: bool,
        name: &str,
        schema: Schema,
    ) -> ResultCode {
        let key = keys::schema_key(space, id, is_edge, schema.version);
        let record = SchemaRecord {
            name: name.to_string(),
            schema,
        };
        self.put_record(key, &record).await
    }

    /// Newest version of one schema.
    pub fn get_schema(
        &self,
        space: SpaceId,
        id: SchemaId,
        is_edge: bool,
    ) -> Result<SchemaRecord, ResultCode> {
        let prefix = keys::schema_versions_prefix(space, id, is_edge);
        let versions: Vec<SchemaRecord> = self.scan_records(&prefix)?;
        versions.into_iter().last().ok_or(ResultCode::KeyNotFound)
    }

    pub fn list_schemas(&self) -> Result<Vec<SchemaRecord>, ResultCode> {
        self.scan_records(keys::SCHEMAS_PREFIX)
    }

    // ---- indexes ----

    pub async fn create_index(&self, space: SpaceId, item: &IndexItem) -> ResultCode {
        self.put_record(keys::index_key(space, item.index_id), item)
            .await
    }

    pub fn get_index(&self, space: SpaceId, index: IndexId) -> Result<IndexItem, ResultCode> {
        self.get_record(&keys::index_key(space, index))
    }

    pub fn list_indexes(&self, space: SpaceId) -> Result<Vec<IndexItem>, ResultCode> {
        self.scan_records(&keys::index_space_prefix(space))
    }

    // ---- hosts ----

    pub async fn register_host(&self, host: &HostAddr, now_ms: u64) -> ResultCode {
        let record = HostRecord {
            host: host.clone(),
            last_seen_ms: now_ms,
        };
        self.put_record(keys::host_key(&host.host, host.port), &record)
            .await
    }

    /// Hosts whose last heartbeat is within `ttl_ms` of `now_ms`.
    pub fn active_hosts(&self, now_ms: u64, ttl_ms: u64) -> Result<Vec<HostAddr>, ResultCode> {
        let records: Vec<HostRecord> = self.scan_records(keys::HOSTS_PREFIX)?;
        Ok(records
            .into_iter()
            .filter(|r| now_ms.saturating_sub(r.last_seen_ms) <= ttl_ms)
            .map(|r| r.host)
            .collect())
    }

    // ---- users ----

    pub async fn create_user(&self, account: &str, password: &str, is_god: bool) -> ResultCode {
        let record = UserRecord {
            account: account.to_string(),
            password_fingerprint: password_fingerprint(password),
            is_god,
        };
        self.put_record(keys::user_key(account), &record).await
    }

    pub fn user_exists(&self, account: &str) -> Result<bool, ResultCode> {
        match self.get_record::<UserRecord>(&keys::user_key(account)) {
            Ok(_) => Ok(true),
            Err(ResultCode::KeyNotFound) => Ok(false),
            Err(code) => Err(code),
        }
    }

    pub fn store(&self) -> &Arc<LatticeStore> {
        &self.store
    }
}
