//! Request and response shapes of the storage service.
//!
//! The RPC binding that carries these over the wire is external; processors
//! receive them as plain structs.

use std::collections::BTreeMap;

use lattice_common::{
    DataSet, EdgeType, Expr, IndexId, PartId, PartitionResult, Rank, SchemaId, SpaceId, TagId,
    Value,
};

/// The four-part edge identity carried in mutation requests.
#[derive(Clone, Debug, PartialEq)]
pub struct EdgeRef {
    pub src: Vec<u8>,
    pub edge_type: EdgeType,
    pub rank: Rank,
    pub dst: Vec<u8>,
}

/// One edge to insert, with its property values positional against the
/// request's `prop_names` (or the schema when `prop_names` is empty).
#[derive(Clone, Debug, PartialEq)]
pub struct NewEdge {
    pub key: EdgeRef,
    pub props: Vec<Value>,
}

/// Atomic add-edges request, grouped by the partition owning the out-edge.
#[derive(Clone, Debug, Default)]
pub struct AddEdgesRequest {
    pub space_id: SpaceId,
    pub prop_names: Vec<String>,
    pub parts: BTreeMap<PartId, Vec<NewEdge>>,
}

/// Generic mutation response: only failed partitions are listed, so an empty
/// list means full success.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExecResponse {
    pub failed_parts: Vec<PartitionResult>,
}

/// Per-indexed-column bound inside an index query.
#[derive(Clone, Debug, PartialEq)]
pub enum ColumnHint {
    Equal { column: String, value: Value },
    Range {
        column: String,
        /// Inclusive lower bound.
        begin: Option<Value>,
        /// Exclusive upper bound.
        end: Option<Value>,
    },
    In { column: String, values: Vec<Value> },
}

impl ColumnHint {
    pub fn column(&self) -> &str {
        match self {
            ColumnHint::Equal { column, .. }
            | ColumnHint::Range { column, .. }
            | ColumnHint::In { column, .. } => column,
        }
    }
}

/// One index to consult, with bounds and an optional residual filter.
#[derive(Clone, Debug, Default)]
pub struct IndexQueryContext {
    pub index_id: IndexId,
    pub column_hints: Vec<ColumnHint>,
    pub filter: Option<Expr>,
}

/// The indexes of one lookup, all over the same tag or edge type.
#[derive(Clone, Debug, Default)]
pub struct IndexSpec {
    pub is_edge: bool,
    pub tag_or_edge_id: SchemaId,
    pub contexts: Vec<IndexQueryContext>,
}

#[derive(Clone, Debug, Default)]
pub struct LookupIndexRequest {
    pub space_id: SpaceId,
    pub indices: IndexSpec,
    pub return_columns: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LookupIndexResponse {
    pub failed_parts: Vec<PartitionResult>,
    pub data: DataSet,
}

/// One property assignment of an update.
#[derive(Clone, Debug, PartialEq)]
pub struct UpdatedProp {
    pub name: String,
    pub value: Value,
}

#[derive(Clone, Debug)]
pub struct UpdateVertexRequest {
    pub space_id: SpaceId,
    pub part_id: PartId,
    pub vid: Vec<u8>,
    pub tag_id: TagId,
    pub updated_props: Vec<UpdatedProp>,
    /// Insert a fresh row when the vertex does not exist yet.
    pub insertable: bool,
    /// Columns echoed back in the response data set.
    pub return_props: Vec<String>,
    /// Condition over the pre-update row; failure responds `FilterOut`.
    pub condition: Option<Expr>,
}

#[derive(Clone, Debug, Default)]
pub struct UpdateResponse {
    pub failed_parts: Vec<PartitionResult>,
    pub data: Option<DataSet>,
}
