//! Meta data upgrade from the v1 record format.
//!
//! Legacy deployments stored schema records under `__schemas_v1__` in a flat
//! format without versions or nullability. When the operator passes
//! `--upgrade-meta-data`, the leader rewrites every legacy record into the
//! current key schema and drops the old key. Running the upgrade twice is a
//! no-op: the second pass finds no legacy records.

use std::sync::Arc;

use lattice_common::schema::{ColumnDef, Schema};
use lattice_common::{PropertyType, SchemaId, SpaceId};
use lattice_kv::LatticeStore;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::keys;
use crate::service::SchemaRecord;

/// Legacy schema record layout.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LegacySchemaRecord {
    pub space: SpaceId,
    pub id: SchemaId,
    pub is_edge: bool,
    pub name: String,
    /// `(column name, type tag)` pairs; every legacy column is non-nullable.
    pub columns: Vec<(String, String)>,
}

fn legacy_type(tag: &str) -> Option<PropertyType> {
    match tag {
        "bool" => Some(PropertyType::Bool),
        "int" => Some(PropertyType::Int),
        "float" | "double" => Some(PropertyType::Float),
        "string" => Some(PropertyType::String),
        "date" => Some(PropertyType::Date),
        "datetime" | "timestamp" => Some(PropertyType::DateTime),
        _ => None,
    }
}

/// Rewrite every legacy schema record into the current format. Returns the
/// number of records migrated.
pub async fn upgrade_meta_v1_to_v2(store: &Arc<LatticeStore>) -> anyhow::Result<usize> {
    let legacy: Vec<(Vec<u8>, Vec<u8>)> = store
        .prefix_scan(
            keys::META_SPACE_ID,
            keys::META_PART_ID,
            keys::SCHEMAS_V1_PREFIX,
            None,
        )
        .map_err(|code| anyhow::anyhow!("legacy schema scan failed: {code}"))?
        .collect();

    if legacy.is_empty() {
        info!("no legacy meta records, upgrade is a no-op");
        return Ok(0);
    }

    let mut new_records = Vec::with_capacity(legacy.len());
    let mut old_keys = Vec::with_capacity(legacy.len());
    for (key, value) in legacy {
        let record: LegacySchemaRecord = match serde_json::from_slice(&value) {
            Ok(record) => record,
            Err(err) => {
                warn!(error = ?err, "skipping undecodable legacy schema record");
                continue;
            }
        };

        let mut columns = Vec::with_capacity(record.columns.len());
        for (name, tag) in &record.columns {
            let Some(prop_type) = legacy_type(tag) else {
                warn!(name, tag, "skipping legacy column with unknown type");
                continue;
            };
            columns.push(ColumnDef::new(name.clone(), prop_type));
        }

        let upgraded = SchemaRecord {
            name: record.name.clone(),
            schema: Schema::new(record.id, 1, columns),
        };
        let new_key = keys::schema_key(record.space, record.id, record.is_edge, 1);
        new_records.push((new_key, serde_json::to_vec(&upgraded)?));
        old_keys.push(key);
    }

    let migrated = new_records.len();
    let code = store
        .async_multi_put(keys::META_SPACE_ID, keys::META_PART_ID, new_records)
        .await;
    anyhow::ensure!(code.ok(), "legacy schema rewrite failed: {code}");
    let code = store
        .async_multi_remove(keys::META_SPACE_ID, keys::META_PART_ID, old_keys)
        .await;
    anyhow::ensure!(code.ok(), "legacy schema cleanup failed: {code}");

    info!(migrated, "meta data upgraded to v2");
    Ok(migrated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::MetaService;
    use lattice_common::HostAddr;
    use lattice_kv::{ReplicaFabric, StoreOptions};

    fn meta_store() -> Arc<LatticeStore> {
        let store = LatticeStore::in_memory(
            StoreOptions {
                local: HostAddr::new("meta1", 45500),
                check_leader: false,
            },
            ReplicaFabric::new(),
        );
        store
            .add_part(
                keys::META_SPACE_ID,
                keys::META_PART_ID,
                &[HostAddr::new("meta1", 45500)],
            )
            .unwrap();
        store
    }

    #[tokio::test]
    async fn upgrade_rewrites_and_is_idempotent() {
        let store = meta_store();
        let legacy = LegacySchemaRecord {
            space: 1,
            id: 3,
            is_edge: false,
            name: "person".into(),
            columns: vec![("c1".into(), "int".into()), ("c2".into(), "string".into())],
        };
        let mut key = keys::SCHEMAS_V1_PREFIX.to_vec();
        key.extend_from_slice(b"person");
        store
            .async_multi_put(
                keys::META_SPACE_ID,
                keys::META_PART_ID,
                vec![(key.clone(), serde_json::to_vec(&legacy).unwrap())],
            )
            .await;

        assert_eq!(upgrade_meta_v1_to_v2(&store).await.unwrap(), 1);

        let service = MetaService::new(store.clone(), 1);
        let record = service.get_schema(1, 3, false).unwrap();
        assert_eq!(record.name, "person");
        assert_eq!(record.schema.version, 1);
        assert_eq!(record.schema.columns.len(), 2);
        assert!(store
            .get(keys::META_SPACE_ID, keys::META_PART_ID, &key)
            .is_err());

        // Second run must be a no-op.
        assert_eq!(upgrade_meta_v1_to_v2(&store).await.unwrap(), 0);
        assert_eq!(service.get_schema(1, 3, false).unwrap(), record);
    }
}
