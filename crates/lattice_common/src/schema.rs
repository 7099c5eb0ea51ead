//! Schema and index registries.
//!
//! Tag and edge schemas are immutable per version; new versions append. The
//! managers here are process-local caches fed from meta records; daemons keep
//! them behind `Arc` and refresh on meta watch events.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::types::{EdgeType, IndexId, PartId, SchemaId, SpaceId, TagId};
use crate::value::{PropertyType, Value};

/// One column of a tag or edge schema.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub prop_type: PropertyType,
    pub nullable: bool,
    pub default: Option<Value>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, prop_type: PropertyType) -> Self {
        Self {
            name: name.into(),
            prop_type,
            nullable: false,
            default: None,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// A tag or edge schema at one version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub schema_id: SchemaId,
    pub version: u32,
    pub columns: Vec<ColumnDef>,
}

impl Schema {
    pub fn new(schema_id: SchemaId, version: u32, columns: Vec<ColumnDef>) -> Self {
        Self {
            schema_id,
            version,
            columns,
        }
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Count of nullable columns, in declaration order. Drives the size of
    /// the row null bitmap.
    pub fn nullable_count(&self) -> usize {
        self.columns.iter().filter(|c| c.nullable).count()
    }
}

/// Secondary index definition: an ordered column prefix over one schema.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexItem {
    pub index_id: IndexId,
    pub schema_id: SchemaId,
    pub is_edge: bool,
    pub fields: Vec<ColumnDef>,
}

impl IndexItem {
    /// Count of variable-length (string) fields. Key decoders need this to
    /// locate the length suffix.
    pub fn var_col_num(&self) -> usize {
        self.fields
            .iter()
            .filter(|c| matches!(c.prop_type, PropertyType::String))
            .count()
    }

    /// Whether any indexed column is nullable, which adds a null-bitmap
    /// suffix to every key of this index.
    pub fn has_nullable_col(&self) -> bool {
        self.fields.iter().any(|c| c.nullable)
    }
}

/// Per-space layout: partition count and the fixed vertex-id length.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpaceDesc {
    pub space_id: SpaceId,
    pub part_num: u32,
    pub vid_len: usize,
}

#[derive(Default)]
struct SchemaRegistry {
    spaces: HashMap<SpaceId, SpaceDesc>,
    // (space, id) -> versions, newest last
    tags: HashMap<(SpaceId, TagId), Vec<Arc<Schema>>>,
    edges: HashMap<(SpaceId, SchemaId), Vec<Arc<Schema>>>,
    tag_names: HashMap<(SpaceId, TagId), String>,
    edge_names: HashMap<(SpaceId, SchemaId), String>,
}

/// Process-local schema cache with hash-based partition placement.
#[derive(Default)]
pub struct SchemaManager {
    inner: RwLock<SchemaRegistry>,
}

impl SchemaManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_space(&self, desc: SpaceDesc) {
        let mut inner = self.inner.write().unwrap();
        inner.spaces.insert(desc.space_id, desc);
    }

    pub fn space(&self, space: SpaceId) -> Option<SpaceDesc> {
        self.inner.read().unwrap().spaces.get(&space).cloned()
    }

    pub fn vid_len(&self, space: SpaceId) -> Option<usize> {
        self.space(space).map(|s| s.vid_len)
    }

    /// All partition ids of a space, `1..=part_num`.
    pub fn space_parts(&self, space: SpaceId) -> Option<Vec<PartId>> {
        self.space(space).map(|s| (1..=s.part_num).collect())
    }

    /// Hash placement of a vertex id. Partition ids start at 1.
    pub fn part_for_vid(&self, space: SpaceId, vid: &[u8]) -> Option<PartId> {
        let desc = self.space(space)?;
        let mut hasher = DefaultHasher::new();
        vid.hash(&mut hasher);
        Some((hasher.finish() % u64::from(desc.part_num)) as PartId + 1)
    }

    pub fn add_tag_schema(&self, space: SpaceId, tag: TagId, name: &str, schema: Schema) {
        let mut inner = self.inner.write().unwrap();
        inner.tag_names.insert((space, tag), name.to_string());
        inner.tags.entry((space, tag)).or_default().push(Arc::new(schema));
    }

    pub fn add_edge_schema(&self, space: SpaceId, edge: SchemaId, name: &str, schema: Schema) {
        let mut inner = self.inner.write().unwrap();
        inner.edge_names.insert((space, edge), name.to_string());
        inner
            .edges
            .entry((space, edge))
            .or_default()
            .push(Arc::new(schema));
    }

    /// Newest version of a tag schema.
    pub fn tag_schema(&self, space: SpaceId, tag: TagId) -> Option<Arc<Schema>> {
        let inner = self.inner.read().unwrap();
        inner.tags.get(&(space, tag)).and_then(|v| v.last().cloned())
    }

    /// Newest version of an edge schema. Callers pass `edge_type.abs()`.
    pub fn edge_schema(&self, space: SpaceId, edge: SchemaId) -> Option<Arc<Schema>> {
        let inner = self.inner.read().unwrap();
        inner.edges.get(&(space, edge)).and_then(|v| v.last().cloned())
    }

    pub fn tag_schema_at(&self, space: SpaceId, tag: TagId, version: u32) -> Option<Arc<Schema>> {
        let inner = self.inner.read().unwrap();
        inner
            .tags
            .get(&(space, tag))?
            .iter()
            .find(|s| s.version == version)
            .cloned()
    }

    pub fn tag_name(&self, space: SpaceId, tag: TagId) -> Option<String> {
        self.inner.read().unwrap().tag_names.get(&(space, tag)).cloned()
    }

    pub fn edge_name(&self, space: SpaceId, edge: SchemaId) -> Option<String> {
        self.inner
            .read()
            .unwrap()
            .edge_names
            .get(&(space, edge))
            .cloned()
    }
}

/// Process-local cache of secondary index definitions.
#[derive(Default)]
pub struct IndexManager {
    inner: RwLock<HashMap<SpaceId, Vec<Arc<IndexItem>>>>,
}

impl IndexManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_index(&self, space: SpaceId, item: IndexItem) {
        let mut inner = self.inner.write().unwrap();
        inner.entry(space).or_default().push(Arc::new(item));
    }

    pub fn get_index(&self, space: SpaceId, index_id: IndexId) -> Option<Arc<IndexItem>> {
        let inner = self.inner.read().unwrap();
        inner
            .get(&space)?
            .iter()
            .find(|item| item.index_id == index_id)
            .cloned()
    }

    pub fn edge_indexes(&self, space: SpaceId) -> Vec<Arc<IndexItem>> {
        let inner = self.inner.read().unwrap();
        inner
            .get(&space)
            .map(|items| items.iter().filter(|i| i.is_edge).cloned().collect())
            .unwrap_or_default()
    }

    pub fn tag_indexes(&self, space: SpaceId) -> Vec<Arc<IndexItem>> {
        let inner = self.inner.read().unwrap();
        inner
            .get(&space)
            .map(|items| items.iter().filter(|i| !i.is_edge).cloned().collect())
            .unwrap_or_default()
    }

    /// Indexes covering one schema id, filtered by edge/tag kind.
    pub fn indexes_for_schema(
        &self,
        space: SpaceId,
        schema_id: SchemaId,
        is_edge: bool,
    ) -> Vec<Arc<IndexItem>> {
        let inner = self.inner.read().unwrap();
        inner
            .get(&space)
            .map(|items| {
                items
                    .iter()
                    .filter(|i| i.is_edge == is_edge && i.schema_id == schema_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}
