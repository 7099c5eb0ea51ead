//! Plan-shape and execution tests for index lookups.

mod common;

use lattice_common::expr::{CompareOp, Expr};
use lattice_common::{ErrorCode, Value};
use lattice_storage::lookup::plan::build_plan;
use lattice_storage::lookup::LookupProcessor;
use lattice_storage::requests::{
    ColumnHint, IndexQueryContext, IndexSpec, LookupIndexRequest,
};

use common::{insert_player, test_env, SPACE, TAG, TAG_INDEX};

fn lookup_request(
    hints: Vec<ColumnHint>,
    filter: Option<Expr>,
    yields: &[&str],
) -> LookupIndexRequest {
    LookupIndexRequest {
        space_id: SPACE,
        indices: IndexSpec {
            is_edge: false,
            tag_or_edge_id: TAG,
            contexts: vec![IndexQueryContext {
                index_id: TAG_INDEX,
                column_hints: hints,
                filter,
            }],
        },
        return_columns: yields.iter().map(|s| s.to_string()).collect(),
    }
}

fn eq_hint(column: &str, value: i64) -> ColumnHint {
    ColumnHint::Equal {
        column: column.to_string(),
        value: Value::Int(value),
    }
}

#[test]
fn indexed_only_lookup_skips_fetch_and_filter() {
    let env = test_env(4, false);
    let req = lookup_request(vec![eq_hint("c1", 1), eq_hint("c2", 1)], None, &["c1", "c2"]);
    let plan = build_plan(&env, &req).unwrap();
    assert_eq!(plan.shapes(), [vec!["IndexScan", "IndexOutput"]]);
    assert_eq!(plan.col_names, vec!["_vid", "c1", "c2"]);
}

#[test]
fn non_indexed_yield_inserts_vertex_fetch() {
    let env = test_env(4, false);
    let req = lookup_request(vec![eq_hint("c1", 1), eq_hint("c2", 1)], None, &["c3"]);
    let plan = build_plan(&env, &req).unwrap();
    assert_eq!(plan.shapes(), [vec!["IndexScan", "IndexVertex", "IndexOutput"]]);
}

#[test]
fn filter_only_lookup_inserts_filter_node() {
    let env = test_env(4, false);
    let filter = Expr::And(vec![
        Expr::cmp("c1", CompareOp::Gt, Value::Int(1)),
        Expr::cmp("c2", CompareOp::Gt, Value::Int(1)),
    ]);
    let req = lookup_request(Vec::new(), Some(filter), &["c1"]);
    let plan = build_plan(&env, &req).unwrap();
    assert_eq!(plan.shapes(), [vec!["IndexScan", "IndexFilter", "IndexOutput"]]);
}

#[test]
fn data_and_filter_build_the_full_chain() {
    let env = test_env(4, false);
    let filter = Expr::cmp("c3", CompareOp::Gt, Value::Int(1));
    let req = lookup_request(Vec::new(), Some(filter), &["c3"]);
    let plan = build_plan(&env, &req).unwrap();
    assert_eq!(
        plan.shapes(),
        [vec!["IndexScan", "IndexVertex", "IndexFilter", "IndexOutput"]]
    );
}

#[test]
fn planner_errors() {
    let env = test_env(4, false);

    let mut req = lookup_request(Vec::new(), None, &["c1"]);
    req.indices.contexts.clear();
    assert_eq!(build_plan(&env, &req).unwrap_err(), ErrorCode::InvalidOperation);

    let mut req = lookup_request(Vec::new(), None, &["c1"]);
    req.indices.contexts[0].index_id = 9999;
    assert_eq!(build_plan(&env, &req).unwrap_err(), ErrorCode::IndexNotFound);

    // A data fetch against an unknown tag id cannot resolve its schema.
    let mut req = lookup_request(Vec::new(), None, &["c3"]);
    req.indices.tag_or_edge_id = 9999;
    assert_eq!(build_plan(&env, &req).unwrap_err(), ErrorCode::SchemaNotFound);

    let mut req = lookup_request(Vec::new(), None, &["c1"]);
    req.space_id = 77;
    assert_eq!(
        build_plan(&env, &req).unwrap_err(),
        ErrorCode::InvalidSpaceVidLen
    );
}

#[test]
fn edge_lookups_use_the_edge_column_order() {
    let env = test_env(4, true);
    let req = LookupIndexRequest {
        space_id: SPACE,
        indices: IndexSpec {
            is_edge: true,
            tag_or_edge_id: common::EDGE,
            contexts: vec![IndexQueryContext {
                index_id: common::EDGE_INDEX,
                column_hints: Vec::new(),
                filter: None,
            }],
        },
        return_columns: vec!["weight".to_string()],
    };
    let plan = build_plan(&env, &req).unwrap();
    assert_eq!(plan.col_names, vec!["_src", "_ranking", "_dst", "weight"]);
}

#[tokio::test]
async fn indexed_only_execution_returns_hinted_rows() {
    let env = test_env(4, false);
    insert_player(&env, b"ada", 1, 1, 30).await;
    insert_player(&env, b"bob", 1, 2, 40).await;
    insert_player(&env, b"cal", 2, 1, 50).await;

    let processor = LookupProcessor::new(env);
    let resp = processor
        .process(lookup_request(
            vec![eq_hint("c1", 1), eq_hint("c2", 1)],
            None,
            &["c1", "c2"],
        ))
        .await;

    assert!(resp.failed_parts.is_empty());
    assert_eq!(resp.data.col_names, vec!["_vid", "c1", "c2"]);
    assert_eq!(
        resp.data.rows,
        vec![vec![Value::Str("ada".into()), Value::Int(1), Value::Int(1)]]
    );
}

#[tokio::test]
async fn data_fetch_execution_reads_the_base_row() {
    let env = test_env(4, false);
    insert_player(&env, b"ada", 1, 1, 30).await;
    insert_player(&env, b"bob", 1, 2, 40).await;

    let processor = LookupProcessor::new(env);
    let resp = processor
        .process(lookup_request(
            vec![eq_hint("c1", 1), eq_hint("c2", 1)],
            None,
            &["c3"],
        ))
        .await;

    assert!(resp.failed_parts.is_empty());
    assert_eq!(
        resp.data.rows,
        vec![vec![Value::Str("ada".into()), Value::Int(30)]]
    );
}

#[tokio::test]
async fn filter_execution_drops_non_matching_rows() {
    let env = test_env(4, false);
    insert_player(&env, b"ada", 1, 1, 30).await;
    insert_player(&env, b"bob", 2, 2, 40).await;
    insert_player(&env, b"cal", 3, 3, 50).await;

    let filter = Expr::And(vec![
        Expr::cmp("c1", CompareOp::Gt, Value::Int(1)),
        Expr::cmp("c2", CompareOp::Gt, Value::Int(1)),
    ]);
    let processor = LookupProcessor::new(env);
    let mut resp = processor
        .process(lookup_request(Vec::new(), Some(filter), &["c1"]))
        .await;

    assert!(resp.failed_parts.is_empty());
    resp.data.rows.sort_by(|a, b| format!("{a:?}").cmp(&format!("{b:?}")));
    assert_eq!(
        resp.data.rows,
        vec![
            vec![Value::Str("bob".into()), Value::Int(2)],
            vec![Value::Str("cal".into()), Value::Int(3)],
        ]
    );
}

#[tokio::test]
async fn edge_index_written_by_the_atomic_writer_is_visible_to_lookup() {
    use lattice_storage::mutate::AddEdgesAtomicProcessor;
    use lattice_storage::requests::{AddEdgesRequest, EdgeRef, NewEdge};
    use std::collections::BTreeMap;

    let env = test_env(8, true);
    let src = b"A".to_vec();
    let local = env.schema_man.part_for_vid(SPACE, &src).unwrap();
    let dst = common::dst_in_other_part(&env, local);

    let mut parts = BTreeMap::new();
    parts.insert(
        local,
        vec![NewEdge {
            key: EdgeRef {
                src: src.clone(),
                edge_type: common::EDGE as i32,
                rank: 5,
                dst: dst.clone(),
            },
            props: vec![Value::Int(42)],
        }],
    );
    let writer = AddEdgesAtomicProcessor::new(env.clone());
    let resp = writer
        .process(AddEdgesRequest {
            space_id: SPACE,
            prop_names: vec!["weight".to_string()],
            parts,
        })
        .await;
    assert!(resp.failed_parts.is_empty());

    let processor = LookupProcessor::new(env);
    let resp = processor
        .process(LookupIndexRequest {
            space_id: SPACE,
            indices: IndexSpec {
                is_edge: true,
                tag_or_edge_id: common::EDGE,
                contexts: vec![IndexQueryContext {
                    index_id: common::EDGE_INDEX,
                    column_hints: Vec::new(),
                    filter: None,
                }],
            },
            return_columns: vec!["weight".to_string()],
        })
        .await;

    assert!(resp.failed_parts.is_empty());
    assert_eq!(
        resp.data.rows,
        vec![vec![
            Value::Str("A".into()),
            Value::Int(5),
            Value::Str(String::from_utf8_lossy(&dst).into_owned()),
            Value::Int(42),
        ]]
    );
}

#[tokio::test]
async fn multiple_contexts_feed_one_result_set() {
    let env = test_env(4, false);
    insert_player(&env, b"ada", 1, 1, 30).await;
    insert_player(&env, b"bob", 2, 2, 40).await;

    let mut req = lookup_request(vec![eq_hint("c1", 1)], None, &["c1"]);
    req.indices.contexts.push(IndexQueryContext {
        index_id: TAG_INDEX,
        column_hints: vec![eq_hint("c1", 2)],
        filter: None,
    });

    let processor = LookupProcessor::new(env);
    let mut resp = processor.process(req).await;
    assert!(resp.failed_parts.is_empty());
    resp.data.rows.sort_by(|a, b| format!("{a:?}").cmp(&format!("{b:?}")));
    assert_eq!(
        resp.data.rows,
        vec![
            vec![Value::Str("ada".into()), Value::Int(1)],
            vec![Value::Str("bob".into()), Value::Int(2)],
        ]
    );
}
