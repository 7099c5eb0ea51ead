//! Partitioned, replicated key/value substrate.
//!
//! A [`LatticeStore`](store::LatticeStore) owns one state machine per
//! `(space, part)` pair. Each partition pairs a storage engine with a
//! [`Replicator`](store::Replicator) handle covering the consensus surface;
//! the [`MemPartManager`](part_manager::MemPartManager) maps partitions to
//! their replica sets and feeds membership changes into the store.

pub mod engine;
pub mod part_manager;
pub mod result;
pub mod store;

pub use engine::{FjallEngine, KvEngine, MemEngine};
pub use part_manager::{MemPartManager, PartListener};
pub use result::ResultCode;
pub use store::{
    LatticeStore, LocalReplicator, ReplicaFabric, ReplicaGroup, Replicator, StoreOptions,
    WriteBatch,
};
