//! Lookup plan construction.
//!
//! Per context the planner decides two facts: whether any yield column is
//! missing from the index field list (`need_data`) and whether the context
//! carries a filter (`need_filter`). Those two booleans select one of four
//! plan shapes:
//!
//! ```text
//! scan -> output
//! scan -> vertex/edge -> output
//! scan -> filter -> output
//! scan -> vertex/edge -> filter -> output
//! ```
//!
//! Every context's output feeds the single terminal aggregate writing the
//! shared result data set.

use std::sync::Arc;

use lattice_common::ErrorCode;

use crate::env::StorageEnv;
use crate::lookup::node::{
    AggregateNode, ExecNode, IndexEdgeNode, IndexFilterNode, IndexMeta, IndexOutputNode,
    IndexScanNode, IndexVertexNode,
};
use crate::requests::LookupIndexRequest;

/// A built plan: the terminal aggregate plus the fixed result column order.
#[derive(Debug)]
pub struct LookupPlan {
    pub col_names: Vec<String>,
    pub aggregate: AggregateNode,
    shapes: Vec<Vec<&'static str>>,
}

impl LookupPlan {
    /// Node-name chains per context, scan first. Exposed for plan-shape
    /// assertions.
    pub fn shapes(&self) -> &[Vec<&'static str>] {
        &self.shapes
    }
}

/// Compile a lookup request into an executable plan.
pub fn build_plan(env: &StorageEnv, req: &LookupIndexRequest) -> Result<LookupPlan, ErrorCode> {
    let space = req.space_id;
    let is_edge = req.indices.is_edge;

    if req.indices.contexts.is_empty() {
        return Err(ErrorCode::InvalidOperation);
    }
    let vid_len = env
        .schema_man
        .vid_len(space)
        .ok_or(ErrorCode::InvalidSpaceVidLen)?;
    let parts = env
        .schema_man
        .space_parts(space)
        .ok_or(ErrorCode::InvalidSpaceVidLen)?;

    // Fixed result column order.
    let mut col_names = if is_edge {
        vec!["_src".to_string(), "_ranking".to_string(), "_dst".to_string()]
    } else {
        vec!["_vid".to_string()]
    };
    col_names.extend(req.return_columns.iter().cloned());

    let mut outputs = Vec::with_capacity(req.indices.contexts.len());
    let mut shapes = Vec::with_capacity(req.indices.contexts.len());

    for ctx in &req.indices.contexts {
        let index = env
            .index_man
            .get_index(space, ctx.index_id)
            .ok_or(ErrorCode::IndexNotFound)?;

        // Record the key-layout facts the decoders downstream rely on.
        let meta = IndexMeta {
            index_id: index.index_id,
            cols: index
                .fields
                .iter()
                .map(|c| (c.name.clone(), c.prop_type.value_kind()))
                .collect(),
            v_col_num: index.var_col_num(),
            has_nullable: index.has_nullable_col(),
        };

        let need_filter = ctx.filter.is_some();
        // A yield column outside the index field list forces a base-row
        // fetch.
        let need_data = req
            .return_columns
            .iter()
            .any(|col| !index.fields.iter().any(|f| &f.name == col));

        let mut shape = vec!["IndexScan"];
        let mut node: Box<dyn ExecNode> = Box::new(IndexScanNode::new(
            env.store.clone(),
            space,
            vid_len,
            is_edge,
            meta.clone(),
            ctx.column_hints.clone(),
            parts.clone(),
        ));

        if need_data {
            let schema_id = req.indices.tag_or_edge_id;
            if is_edge {
                let schema = env
                    .schema_man
                    .edge_schema(space, schema_id)
                    .ok_or(ErrorCode::SchemaNotFound)?;
                node = Box::new(IndexEdgeNode::new(
                    node,
                    env.store.clone(),
                    space,
                    vid_len,
                    schema_id as i32,
                    schema,
                ));
                shape.push("IndexEdge");
            } else {
                let schema = env
                    .schema_man
                    .tag_schema(space, schema_id)
                    .ok_or(ErrorCode::SchemaNotFound)?;
                node = Box::new(IndexVertexNode::new(
                    node,
                    env.store.clone(),
                    space,
                    vid_len,
                    schema_id,
                    schema,
                ));
                shape.push("IndexVertex");
            }
        }

        if need_filter {
            let filter = ctx.filter.clone().expect("need_filter implies a filter");
            node = Box::new(IndexFilterNode::new(
                node,
                filter,
                vid_len,
                is_edge,
                meta.clone(),
            ));
            shape.push("IndexFilter");
        }

        shape.push("IndexOutput");
        outputs.push(IndexOutputNode::new(
            node,
            vid_len,
            is_edge,
            meta,
            req.return_columns.clone(),
        ));
        shapes.push(shape);
    }

    Ok(LookupPlan {
        col_names,
        aggregate: AggregateNode::new(outputs),
        shapes,
    })
}
