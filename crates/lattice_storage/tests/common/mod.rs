//! Shared fixtures for storage integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use lattice_common::keys::{index_key, vertex_key, IndexKeyTail};
use lattice_common::schema::{ColumnDef, SpaceDesc};
use lattice_common::{
    HostAddr, IndexItem, IndexManager, PropertyType, RowWriter, Schema, SchemaManager, Value,
};
use lattice_kv::{LatticeStore, ReplicaFabric, StoreOptions};
use lattice_storage::{ChainTransactionManager, StorageEnv};

pub const SPACE: u32 = 1;
pub const VID_LEN: usize = 8;
pub const TAG: u32 = 100;
pub const TAG_INDEX: u32 = 200;
pub const EDGE: u32 = 300;
pub const EDGE_INDEX: u32 = 400;

pub fn local_host() -> HostAddr {
    HostAddr::new("storage1", 44500)
}

/// An env over an in-memory single-replica store: tag `player(c1,c2,c3)`
/// with index `(c1, c2)`, edge `follows(weight)` with an optional index on
/// `weight`.
pub fn test_env(part_num: u32, with_edge_index: bool) -> Arc<StorageEnv> {
    let local = local_host();
    let store = LatticeStore::in_memory(
        StoreOptions {
            local: local.clone(),
            check_leader: true,
        },
        ReplicaFabric::new(),
    );
    for part in 1..=part_num {
        store.add_part(SPACE, part, &[local.clone()]).unwrap();
    }

    let schema_man = Arc::new(SchemaManager::new());
    schema_man.add_space(SpaceDesc {
        space_id: SPACE,
        part_num,
        vid_len: VID_LEN,
    });
    schema_man.add_tag_schema(
        SPACE,
        TAG,
        "player",
        Schema::new(
            TAG,
            1,
            vec![
                ColumnDef::new("c1", PropertyType::Int),
                ColumnDef::new("c2", PropertyType::Int),
                ColumnDef::new("c3", PropertyType::Int),
            ],
        ),
    );
    schema_man.add_edge_schema(
        SPACE,
        EDGE,
        "follows",
        Schema::new(EDGE, 1, vec![ColumnDef::new("weight", PropertyType::Int)]),
    );

    let index_man = Arc::new(IndexManager::new());
    index_man.add_index(
        SPACE,
        IndexItem {
            index_id: TAG_INDEX,
            schema_id: TAG,
            is_edge: false,
            fields: vec![
                ColumnDef::new("c1", PropertyType::Int),
                ColumnDef::new("c2", PropertyType::Int),
            ],
        },
    );
    if with_edge_index {
        index_man.add_index(
            SPACE,
            IndexItem {
                index_id: EDGE_INDEX,
                schema_id: EDGE,
                is_edge: true,
                fields: vec![ColumnDef::new("weight", PropertyType::Int)],
            },
        );
    }

    let txn_man = ChainTransactionManager::new(store.clone());
    Arc::new(StorageEnv {
        store,
        schema_man,
        index_man,
        txn_man,
    })
}

/// Write one `player` row plus its `(c1, c2)` index entry.
pub async fn insert_player(env: &StorageEnv, vid: &[u8], c1: i64, c2: i64, c3: i64) {
    let part = env.schema_man.part_for_vid(SPACE, vid).unwrap();
    let schema = env.schema_man.tag_schema(SPACE, TAG).unwrap();
    let mut writer = RowWriter::new(&schema);
    writer.set("c1", Value::Int(c1)).unwrap();
    writer.set("c2", Value::Int(c2)).unwrap();
    writer.set("c3", Value::Int(c3)).unwrap();
    let row = writer.finish().unwrap();

    let row_key = vertex_key(VID_LEN, part, vid, TAG).unwrap();
    let index = env.index_man.get_index(SPACE, TAG_INDEX).unwrap();
    let entry = index_key(
        VID_LEN,
        part,
        &index,
        &[Value::Int(c1), Value::Int(c2)],
        &IndexKeyTail::Vertex { vid: vid.to_vec() },
    )
    .unwrap();

    let code = env
        .store
        .async_multi_put(SPACE, part, vec![(row_key, row), (entry, Vec::new())])
        .await;
    assert!(code.ok(), "seed write failed: {code}");
}

/// Pick a destination vid whose partition differs from `local_part`.
pub fn dst_in_other_part(env: &StorageEnv, local_part: u32) -> Vec<u8> {
    (0..1000u32)
        .map(|i| format!("B{i}").into_bytes())
        .find(|dst| env.schema_man.part_for_vid(SPACE, dst).unwrap() != local_part)
        .expect("some vid must hash to another partition")
}
