//! Meta daemon internals: cluster identity, the meta key schema, and the
//! record CRUD served from the well-known meta partition `(0, 0)`.

pub mod bootstrap;
pub mod cluster_id;
pub mod keys;
pub mod root_user;
pub mod service;
pub mod upgrade;

pub use bootstrap::{init_meta_kv, MetaBootOptions};
pub use cluster_id::ClusterIdMan;
pub use service::MetaService;
