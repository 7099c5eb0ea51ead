//! Mutation processors.

pub mod add_edges_atomic;
pub mod update_vertex;

pub use add_edges_atomic::AddEdgesAtomicProcessor;
pub use update_vertex::UpdateVertexProcessor;
