//! Shared types for the lattice graph store.
//!
//! These types are kept in a small, dependency-light crate because they are
//! used by the KV layer, the meta daemon, and the storage daemon alike.

pub mod dataset;
pub mod expr;
pub mod keys;
pub mod row;
pub mod schema;
pub mod types;
pub mod value;

pub use dataset::DataSet;
pub use expr::Expr;
pub use row::{RowReader, RowWriter, WriteFault};
pub use schema::{ColumnDef, IndexItem, IndexManager, Schema, SchemaManager};
pub use types::{
    ClusterId, EdgeType, ErrorCode, HostAddr, IndexId, PartId, PartitionResult, Rank, SchemaId,
    SpaceId, TagId,
};
pub use value::{PropertyType, Value, ValueKind};
