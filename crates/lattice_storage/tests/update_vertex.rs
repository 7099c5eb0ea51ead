//! Update-vertex processor tests.

mod common;

use lattice_common::expr::{CompareOp, Expr};
use lattice_common::keys::index_prefix;
use lattice_common::{ErrorCode, Value};
use lattice_storage::mutate::UpdateVertexProcessor;
use lattice_storage::requests::{UpdatedProp, UpdateVertexRequest};

use common::{insert_player, test_env, SPACE, TAG, TAG_INDEX};

#[tokio::test]
async fn update_rewrites_row_and_index_entry() {
    let env = test_env(4, false);
    insert_player(&env, b"ada", 1, 1, 30).await;
    let part = env.schema_man.part_for_vid(SPACE, b"ada").unwrap();

    let processor = UpdateVertexProcessor::new(env.clone());
    let resp = processor
        .process(UpdateVertexRequest {
            space_id: SPACE,
            part_id: part,
            vid: b"ada".to_vec(),
            tag_id: TAG,
            updated_props: vec![UpdatedProp {
                name: "c1".to_string(),
                value: Value::Int(9),
            }],
            insertable: false,
            return_props: vec!["c1".to_string(), "c3".to_string()],
            condition: None,
        })
        .await;

    assert!(resp.failed_parts.is_empty(), "unexpected: {:?}", resp.failed_parts);
    let data = resp.data.unwrap();
    assert_eq!(data.col_names, vec!["_inserted", "c1", "c3"]);
    assert_eq!(
        data.rows,
        vec![vec![Value::Bool(false), Value::Int(9), Value::Int(30)]]
    );

    // Exactly one index entry remains and it carries the new c1.
    let entries: Vec<_> = env
        .store
        .prefix_scan(SPACE, part, &index_prefix(part, TAG_INDEX), None)
        .unwrap()
        .collect();
    assert_eq!(entries.len(), 1);
    let index = env.index_man.get_index(SPACE, TAG_INDEX).unwrap();
    let cols: Vec<_> = index
        .fields
        .iter()
        .map(|c| (c.name.clone(), c.prop_type.value_kind()))
        .collect();
    let values = lattice_common::keys::decode_index_values(
        &entries[0].0,
        common::VID_LEN,
        false,
        &cols,
        index.var_col_num(),
        index.has_nullable_col(),
    )
    .unwrap();
    assert_eq!(values, vec![Value::Int(9), Value::Int(1)]);
}

#[tokio::test]
async fn condition_failure_filters_out_without_writing() {
    let env = test_env(4, false);
    insert_player(&env, b"ada", 1, 1, 30).await;
    let part = env.schema_man.part_for_vid(SPACE, b"ada").unwrap();

    let processor = UpdateVertexProcessor::new(env.clone());
    let resp = processor
        .process(UpdateVertexRequest {
            space_id: SPACE,
            part_id: part,
            vid: b"ada".to_vec(),
            tag_id: TAG,
            updated_props: vec![UpdatedProp {
                name: "c1".to_string(),
                value: Value::Int(9),
            }],
            insertable: false,
            return_props: vec![],
            condition: Some(Expr::cmp("c3", CompareOp::Gt, Value::Int(100))),
        })
        .await;

    assert_eq!(resp.failed_parts.len(), 1);
    assert_eq!(resp.failed_parts[0].code, ErrorCode::FilterOut);
    assert!(resp.data.is_none());

    // The row is untouched.
    let check = processor
        .process(UpdateVertexRequest {
            space_id: SPACE,
            part_id: part,
            vid: b"ada".to_vec(),
            tag_id: TAG,
            updated_props: vec![],
            insertable: false,
            return_props: vec!["c1".to_string()],
            condition: None,
        })
        .await;
    assert_eq!(
        check.data.unwrap().rows,
        vec![vec![Value::Bool(false), Value::Int(1)]]
    );
}

#[tokio::test]
async fn insertable_update_creates_the_row() {
    let env = test_env(4, false);
    let part = env.schema_man.part_for_vid(SPACE, b"new").unwrap();

    let processor = UpdateVertexProcessor::new(env.clone());
    let resp = processor
        .process(UpdateVertexRequest {
            space_id: SPACE,
            part_id: part,
            vid: b"new".to_vec(),
            tag_id: TAG,
            updated_props: vec![
                UpdatedProp {
                    name: "c1".to_string(),
                    value: Value::Int(1),
                },
                UpdatedProp {
                    name: "c2".to_string(),
                    value: Value::Int(2),
                },
                UpdatedProp {
                    name: "c3".to_string(),
                    value: Value::Int(3),
                },
            ],
            insertable: true,
            return_props: vec!["c2".to_string()],
            condition: None,
        })
        .await;

    assert!(resp.failed_parts.is_empty());
    assert_eq!(
        resp.data.unwrap().rows,
        vec![vec![Value::Bool(true), Value::Int(2)]]
    );
}

#[tokio::test]
async fn leader_change_reports_the_new_leader() {
    use lattice_common::HostAddr;

    let env = test_env(4, false);
    insert_player(&env, b"ada", 1, 1, 30).await;
    let part = env.schema_man.part_for_vid(SPACE, b"ada").unwrap();

    let new_leader = HostAddr::new("storage2", 44500);
    env.store
        .replica_group(SPACE, part)
        .unwrap()
        .set_leader(new_leader.clone());

    let processor = UpdateVertexProcessor::new(env);
    let resp = processor
        .process(UpdateVertexRequest {
            space_id: SPACE,
            part_id: part,
            vid: b"ada".to_vec(),
            tag_id: TAG,
            updated_props: vec![UpdatedProp {
                name: "c1".to_string(),
                value: Value::Int(2),
            }],
            insertable: false,
            return_props: vec![],
            condition: None,
        })
        .await;

    assert_eq!(resp.failed_parts.len(), 1);
    assert_eq!(resp.failed_parts[0].code, ErrorCode::LeaderChanged);
    assert_eq!(resp.failed_parts[0].leader, Some(new_leader));
    assert!(resp.data.is_none());
}

#[tokio::test]
async fn missing_vertex_without_insertable_fails() {
    let env = test_env(4, false);
    let part = env.schema_man.part_for_vid(SPACE, b"ghost").unwrap();

    let processor = UpdateVertexProcessor::new(env);
    let resp = processor
        .process(UpdateVertexRequest {
            space_id: SPACE,
            part_id: part,
            vid: b"ghost".to_vec(),
            tag_id: TAG,
            updated_props: vec![],
            insertable: false,
            return_props: vec![],
            condition: None,
        })
        .await;

    assert_eq!(resp.failed_parts.len(), 1);
    assert_eq!(resp.failed_parts[0].code, ErrorCode::KeyNotFound);
}
