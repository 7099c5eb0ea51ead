//! Cross-partition edge transactions.
//!
//! A chain groups the edges of one request that share a `(local, remote)`
//! partition pair. The transaction manager's contract is that the out-edge
//! rows in the local partition and the mirrored in-edge rows in the remote
//! partition become durable together or not at all; the chain manager here
//! stages the remote side first and compensates it away when the local
//! commit fails, so no observer sees a half-written edge.

use std::sync::Arc;

use async_trait::async_trait;
use lattice_common::keys::{edge_key, parse_edge_key, IndexKeyTail};
use lattice_common::{IndexItem, IndexManager, PartId, RowReader, SchemaManager, SpaceId, Value};
use lattice_kv::{LatticeStore, ResultCode};
use tracing::{error, warn};

/// Commits two-sided edge writes.
#[async_trait]
pub trait TransactionManager: Send + Sync + 'static {
    /// Commit the out-edge `kvs` (keyed in `local_part`) together with their
    /// mirrored in-edges in `remote_part`. When an `IndexAppender` is given,
    /// its derived index entries commit in the same local batch.
    async fn add_same_part_edges(
        &self,
        vid_len: usize,
        space: SpaceId,
        local_part: PartId,
        remote_part: PartId,
        kvs: Vec<(Vec<u8>, Vec<u8>)>,
        index_appender: Option<&IndexAppender>,
    ) -> ResultCode;
}

/// Derives secondary-index entries for already-resolved edge rows. Stands in
/// for the inner add-edges processor the transaction manager invokes when
/// the space carries edge indexes.
pub struct IndexAppender {
    schema_man: Arc<SchemaManager>,
    indexes: Vec<Arc<IndexItem>>,
}

impl IndexAppender {
    pub fn new(schema_man: Arc<SchemaManager>, indexes: Vec<Arc<IndexItem>>) -> Self {
        Self {
            schema_man,
            indexes,
        }
    }

    /// Index entries for the out-edge rows of one chain. In-edge rows carry
    /// no index entries.
    pub fn index_kvs(
        &self,
        space: SpaceId,
        vid_len: usize,
        kvs: &[(Vec<u8>, Vec<u8>)],
    ) -> anyhow::Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        for (key, value) in kvs {
            let parts = parse_edge_key(vid_len, key)?;
            if parts.edge_type < 0 {
                continue;
            }
            let schema_id = parts.edge_type.unsigned_abs();
            let schema = self
                .schema_man
                .edge_schema(space, schema_id)
                .ok_or_else(|| anyhow::anyhow!("edge schema {schema_id} missing"))?;
            let reader = RowReader::new(&schema, value)?;

            for index in self.indexes.iter().filter(|i| i.schema_id == schema_id) {
                let mut values = Vec::with_capacity(index.fields.len());
                for field in &index.fields {
                    let value = reader.get(&field.name).unwrap_or(Value::Null);
                    values.push(value);
                }
                let tail = IndexKeyTail::Edge {
                    src: parts.src.clone(),
                    rank: parts.rank,
                    dst: parts.dst.clone(),
                };
                let entry = lattice_common::keys::index_key(
                    vid_len,
                    parts.part,
                    index,
                    &values,
                    &tail,
                )?;
                out.push((entry, Vec::new()));
            }
        }
        Ok(out)
    }
}

/// Transaction manager that drives chains through the local store.
pub struct ChainTransactionManager {
    store: Arc<LatticeStore>,
}

impl ChainTransactionManager {
    pub fn new(store: Arc<LatticeStore>) -> Arc<Self> {
        Arc::new(Self { store })
    }

    /// Accessor used to look up indexes when wiring the appender.
    pub fn appender_for(
        schema_man: &Arc<SchemaManager>,
        index_man: &IndexManager,
        space: SpaceId,
    ) -> Option<IndexAppender> {
        let indexes = index_man.edge_indexes(space);
        if indexes.is_empty() {
            None
        } else {
            Some(IndexAppender::new(schema_man.clone(), indexes))
        }
    }
}

#[async_trait]
impl TransactionManager for ChainTransactionManager {
    async fn add_same_part_edges(
        &self,
        vid_len: usize,
        space: SpaceId,
        local_part: PartId,
        remote_part: PartId,
        kvs: Vec<(Vec<u8>, Vec<u8>)>,
        index_appender: Option<&IndexAppender>,
    ) -> ResultCode {
        // Mirror every out-edge into its in-edge key in the remote partition.
        let mut remote_kvs = Vec::with_capacity(kvs.len());
        for (key, value) in &kvs {
            let parts = match parse_edge_key(vid_len, key) {
                Ok(parts) => parts,
                Err(err) => {
                    error!(error = ?err, "malformed edge key in chain");
                    return ResultCode::Unknown;
                }
            };
            let mirrored = match edge_key(
                vid_len,
                remote_part,
                &parts.dst,
                -parts.edge_type,
                parts.rank,
                &parts.src,
            ) {
                Ok(key) => key,
                Err(err) => {
                    error!(error = ?err, "in-edge key build failed");
                    return ResultCode::Unknown;
                }
            };
            remote_kvs.push((mirrored, value.clone()));
        }

        let mut local_kvs = kvs;
        if let Some(appender) = index_appender {
            match appender.index_kvs(space, vid_len, &local_kvs) {
                Ok(extra) => local_kvs.extend(extra),
                Err(err) => {
                    error!(error = ?err, "index entry derivation failed");
                    return ResultCode::Unknown;
                }
            }
        }

        // Remote side first: a failure here leaves both partitions untouched.
        let remote_keys: Vec<Vec<u8>> = remote_kvs.iter().map(|(k, _)| k.clone()).collect();
        let code = self
            .store
            .async_multi_put(space, remote_part, remote_kvs)
            .await;
        if !code.ok() {
            return code;
        }

        // Local side: edges plus index entries in one atomic batch.
        let code = self.store.async_multi_put(space, local_part, local_kvs).await;
        if !code.ok() {
            // Take the staged in-edges back out so neither side is visible.
            let rollback = self
                .store
                .async_multi_remove(space, remote_part, remote_keys)
                .await;
            if !rollback.ok() {
                warn!(
                    space,
                    local_part,
                    remote_part,
                    %rollback,
                    "in-edge rollback failed, chain left for recovery"
                );
            }
            return code;
        }

        ResultCode::Succeeded
    }
}
