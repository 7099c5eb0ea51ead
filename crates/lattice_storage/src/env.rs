//! Shared handles every storage processor runs against.

use std::sync::Arc;

use lattice_common::{IndexManager, SchemaManager};
use lattice_kv::LatticeStore;

use crate::txn::TransactionManager;

/// The storage daemon's shared collaborators.
pub struct StorageEnv {
    pub store: Arc<LatticeStore>,
    pub schema_man: Arc<SchemaManager>,
    pub index_man: Arc<IndexManager>,
    pub txn_man: Arc<dyn TransactionManager>,
}
