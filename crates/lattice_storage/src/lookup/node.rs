//! Execution nodes of a lookup plan.
//!
//! Nodes are pure sequential producers: the parent pulls rows one at a time
//! with `next()`. Scan nodes walk index entries partition by partition;
//! fetch nodes turn an index entry into the base row via a point get;
//! filter nodes drop rows failing the residual predicate; output nodes
//! project the final column order and feed the terminal aggregate.

use std::sync::Arc;

use lattice_common::keys::{
    decode_index_values, edge_key, index_prefix, parse_index_tail, vertex_key, IndexKeyTail,
};
use lattice_common::{Expr, IndexId, PartId, RowReader, Schema, SpaceId, Value, ValueKind};
use lattice_kv::{LatticeStore, ResultCode};

use crate::requests::ColumnHint;

/// Execution failure: a store-level code pinned to a partition, or a decode
/// fault.
#[derive(Debug)]
pub enum ExecError {
    Store { part: PartId, code: ResultCode },
    Decode(anyhow::Error),
}

impl From<anyhow::Error> for ExecError {
    fn from(err: anyhow::Error) -> Self {
        ExecError::Decode(err)
    }
}

pub type ExecResult<T> = Result<T, ExecError>;

/// A row flowing between plan nodes: the index key alone, or the key plus
/// the fetched base-row properties.
#[derive(Clone, Debug)]
pub enum ExecRow {
    Key(Vec<u8>),
    WithProps {
        key: Vec<u8>,
        props: Vec<(String, Value)>,
    },
}

impl ExecRow {
    pub fn key(&self) -> &[u8] {
        match self {
            ExecRow::Key(key) => key,
            ExecRow::WithProps { key, .. } => key,
        }
    }
}

pub trait ExecNode: Send {
    fn next(&mut self) -> ExecResult<Option<ExecRow>>;
}

/// Per-index layout facts the planner records for key decoders downstream.
#[derive(Clone, Debug)]
pub struct IndexMeta {
    pub index_id: IndexId,
    /// Indexed columns with their runtime kinds, in key order.
    pub cols: Vec<(String, ValueKind)>,
    /// Count of variable-length (string) columns.
    pub v_col_num: usize,
    /// Whether any indexed column is nullable (null-bitmap suffix present).
    pub has_nullable: bool,
}

impl IndexMeta {
    fn decode(&self, key: &[u8], vid_len: usize, is_edge: bool) -> anyhow::Result<Vec<Value>> {
        decode_index_values(key, vid_len, is_edge, &self.cols, self.v_col_num, self.has_nullable)
    }

    fn decode_named(
        &self,
        key: &[u8],
        vid_len: usize,
        is_edge: bool,
    ) -> anyhow::Result<Vec<(String, Value)>> {
        let values = self.decode(key, vid_len, is_edge)?;
        Ok(self
            .cols
            .iter()
            .map(|(name, _)| name.clone())
            .zip(values)
            .collect())
    }
}

fn part_of_key(key: &[u8]) -> PartId {
    PartId::from_be_bytes(key[..4].try_into().unwrap())
}

fn hint_matches(hint: &ColumnHint, value: &Value) -> bool {
    match hint {
        ColumnHint::Equal { value: expected, .. } => value == expected,
        ColumnHint::Range { begin, end, .. } => {
            let lower_ok = begin.as_ref().map_or(true, |b| {
                value.partial_cmp_same_kind(b).map_or(false, |o| o.is_ge())
            });
            let upper_ok = end.as_ref().map_or(true, |e| {
                value.partial_cmp_same_kind(e).map_or(false, |o| o.is_lt())
            });
            lower_ok && upper_ok
        }
        ColumnHint::In { values, .. } => values.contains(value),
    }
}

/// Walks every partition's entries of one index, bounded by column hints.
pub struct IndexScanNode {
    store: Arc<LatticeStore>,
    space: SpaceId,
    vid_len: usize,
    is_edge: bool,
    meta: IndexMeta,
    hints: Vec<ColumnHint>,
    parts: Vec<PartId>,
    part_idx: usize,
    iter: Option<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + Send>>,
}

impl IndexScanNode {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<LatticeStore>,
        space: SpaceId,
        vid_len: usize,
        is_edge: bool,
        meta: IndexMeta,
        hints: Vec<ColumnHint>,
        parts: Vec<PartId>,
    ) -> Self {
        Self {
            store,
            space,
            vid_len,
            is_edge,
            meta,
            hints,
            parts,
            part_idx: 0,
            iter: None,
        }
    }

    fn matches_hints(&self, key: &[u8]) -> anyhow::Result<bool> {
        if self.hints.is_empty() {
            return Ok(true);
        }
        let named = self.meta.decode_named(key, self.vid_len, self.is_edge)?;
        for hint in &self.hints {
            let Some((_, value)) = named.iter().find(|(name, _)| name == hint.column()) else {
                return Ok(false);
            };
            if !hint_matches(hint, value) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl ExecNode for IndexScanNode {
    fn next(&mut self) -> ExecResult<Option<ExecRow>> {
        loop {
            if self.iter.is_none() {
                let Some(&part) = self.parts.get(self.part_idx) else {
                    return Ok(None);
                };
                let prefix = index_prefix(part, self.meta.index_id);
                let iter = self
                    .store
                    .prefix_scan(self.space, part, &prefix, None)
                    .map_err(|code| ExecError::Store { part, code })?;
                self.iter = Some(iter);
            }

            match self.iter.as_mut().unwrap().next() {
                Some((key, _)) => {
                    if self.matches_hints(&key)? {
                        return Ok(Some(ExecRow::Key(key)));
                    }
                }
                None => {
                    self.iter = None;
                    self.part_idx += 1;
                }
            }
        }
    }
}

/// Fetches the base vertex row for each index entry. Dangling entries are
/// skipped.
pub struct IndexVertexNode {
    child: Box<dyn ExecNode>,
    store: Arc<LatticeStore>,
    space: SpaceId,
    vid_len: usize,
    tag_id: u32,
    schema: Arc<Schema>,
}

impl IndexVertexNode {
    pub fn new(
        child: Box<dyn ExecNode>,
        store: Arc<LatticeStore>,
        space: SpaceId,
        vid_len: usize,
        tag_id: u32,
        schema: Arc<Schema>,
    ) -> Self {
        Self {
            child,
            store,
            space,
            vid_len,
            tag_id,
            schema,
        }
    }
}

impl ExecNode for IndexVertexNode {
    fn next(&mut self) -> ExecResult<Option<ExecRow>> {
        loop {
            let Some(row) = self.child.next()? else {
                return Ok(None);
            };
            let key = row.key().to_vec();
            let part = part_of_key(&key);
            let IndexKeyTail::Vertex { vid } = parse_index_tail(&key, self.vid_len, false)?
            else {
                return Err(ExecError::Decode(anyhow::anyhow!("vertex tail expected")));
            };
            let row_key = vertex_key(self.vid_len, part, &vid, self.tag_id)?;
            match self.store.get(self.space, part, &row_key) {
                Ok(bytes) => {
                    let reader = RowReader::new(&self.schema, &bytes)?;
                    let values = reader.read_all()?;
                    let props = self
                        .schema
                        .columns
                        .iter()
                        .map(|c| c.name.clone())
                        .zip(values)
                        .collect();
                    return Ok(Some(ExecRow::WithProps { key, props }));
                }
                // The base row is gone; drop the stale entry and move on.
                Err(ResultCode::KeyNotFound) => continue,
                Err(code) => return Err(ExecError::Store { part, code }),
            }
        }
    }
}

/// Fetches the base edge row for each index entry.
pub struct IndexEdgeNode {
    child: Box<dyn ExecNode>,
    store: Arc<LatticeStore>,
    space: SpaceId,
    vid_len: usize,
    edge_type: i32,
    schema: Arc<Schema>,
}

impl IndexEdgeNode {
    pub fn new(
        child: Box<dyn ExecNode>,
        store: Arc<LatticeStore>,
        space: SpaceId,
        vid_len: usize,
        edge_type: i32,
        schema: Arc<Schema>,
    ) -> Self {
        Self {
            child,
            store,
            space,
            vid_len,
            edge_type,
            schema,
        }
    }
}

impl ExecNode for IndexEdgeNode {
    fn next(&mut self) -> ExecResult<Option<ExecRow>> {
        loop {
            let Some(row) = self.child.next()? else {
                return Ok(None);
            };
            let key = row.key().to_vec();
            let part = part_of_key(&key);
            let IndexKeyTail::Edge { src, rank, dst } =
                parse_index_tail(&key, self.vid_len, true)?
            else {
                return Err(ExecError::Decode(anyhow::anyhow!("edge tail expected")));
            };
            let row_key = edge_key(self.vid_len, part, &src, self.edge_type, rank, &dst)?;
            match self.store.get(self.space, part, &row_key) {
                Ok(bytes) => {
                    let reader = RowReader::new(&self.schema, &bytes)?;
                    let values = reader.read_all()?;
                    let props = self
                        .schema
                        .columns
                        .iter()
                        .map(|c| c.name.clone())
                        .zip(values)
                        .collect();
                    return Ok(Some(ExecRow::WithProps { key, props }));
                }
                Err(ResultCode::KeyNotFound) => continue,
                Err(code) => return Err(ExecError::Store { part, code }),
            }
        }
    }
}

/// Evaluates the residual filter over the in-scope row.
pub struct IndexFilterNode {
    child: Box<dyn ExecNode>,
    filter: Expr,
    vid_len: usize,
    is_edge: bool,
    /// Key-layout facts for evaluating over index columns when no base row
    /// was fetched.
    meta: IndexMeta,
}

impl IndexFilterNode {
    pub fn new(
        child: Box<dyn ExecNode>,
        filter: Expr,
        vid_len: usize,
        is_edge: bool,
        meta: IndexMeta,
    ) -> Self {
        Self {
            child,
            filter,
            vid_len,
            is_edge,
            meta,
        }
    }
}

impl ExecNode for IndexFilterNode {
    fn next(&mut self) -> ExecResult<Option<ExecRow>> {
        loop {
            let Some(row) = self.child.next()? else {
                return Ok(None);
            };
            let ctx: Vec<(String, Value)> = match &row {
                ExecRow::WithProps { props, .. } => props.clone(),
                ExecRow::Key(key) => self.meta.decode_named(key, self.vid_len, self.is_edge)?,
            };
            if self.filter.matches(&ctx) {
                return Ok(Some(row));
            }
        }
    }
}

/// Projects the fixed result columns and the yield columns of one context.
pub struct IndexOutputNode {
    child: Box<dyn ExecNode>,
    vid_len: usize,
    is_edge: bool,
    meta: IndexMeta,
    yield_cols: Vec<String>,
}

impl std::fmt::Debug for IndexOutputNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexOutputNode")
            .field("child", &"<exec node>")
            .field("vid_len", &self.vid_len)
            .field("is_edge", &self.is_edge)
            .field("meta", &self.meta)
            .field("yield_cols", &self.yield_cols)
            .finish()
    }
}

impl IndexOutputNode {
    pub fn new(
        child: Box<dyn ExecNode>,
        vid_len: usize,
        is_edge: bool,
        meta: IndexMeta,
        yield_cols: Vec<String>,
    ) -> Self {
        Self {
            child,
            vid_len,
            is_edge,
            meta,
            yield_cols,
        }
    }

    pub fn next(&mut self) -> ExecResult<Option<Vec<Value>>> {
        let Some(row) = self.child.next()? else {
            return Ok(None);
        };

        // Fixed locator columns come from the index-key tail.
        let mut out = Vec::with_capacity(self.yield_cols.len() + 3);
        match parse_index_tail(row.key(), self.vid_len, self.is_edge)? {
            IndexKeyTail::Edge { src, rank, dst } => {
                out.push(Value::Str(String::from_utf8_lossy(&src).into_owned()));
                out.push(Value::Int(rank));
                out.push(Value::Str(String::from_utf8_lossy(&dst).into_owned()));
            }
            IndexKeyTail::Vertex { vid } => {
                out.push(Value::Str(String::from_utf8_lossy(&vid).into_owned()));
            }
        }

        let scope: Vec<(String, Value)> = match &row {
            ExecRow::WithProps { props, .. } => props.clone(),
            ExecRow::Key(key) => self.meta.decode_named(key, self.vid_len, self.is_edge)?,
        };
        for name in &self.yield_cols {
            let value = scope
                .iter()
                .find(|(col, _)| col == name)
                .map(|(_, v)| v.clone())
                .unwrap_or(Value::Null);
            out.push(value);
        }
        Ok(Some(out))
    }
}

/// Terminal node: drains every context's output into the shared data set.
#[derive(Debug)]
pub struct AggregateNode {
    outputs: Vec<IndexOutputNode>,
}

impl AggregateNode {
    pub fn new(outputs: Vec<IndexOutputNode>) -> Self {
        Self { outputs }
    }

    pub fn execute(&mut self, result: &mut lattice_common::DataSet) -> ExecResult<()> {
        for output in &mut self.outputs {
            while let Some(row) = output.next()? {
                result.push_row(row);
            }
        }
        Ok(())
    }
}
