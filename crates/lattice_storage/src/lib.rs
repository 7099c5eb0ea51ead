//! Storage daemon internals: request processors, the lookup execution
//! planner, and the cross-partition atomic edge writer.

pub mod env;
pub mod lookup;
pub mod mutate;
pub mod processor;
pub mod requests;
pub mod txn;

pub use env::StorageEnv;
pub use processor::{to_error_code, write_fault_to_error, BaseProcessor};
pub use txn::{ChainTransactionManager, IndexAppender, TransactionManager};
