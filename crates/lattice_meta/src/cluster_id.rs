//! Cluster fingerprint management.
//!
//! The cluster id is derived once by the first elected meta leader and
//! persisted under [`CLUSTER_ID_KEY`](crate::keys::CLUSTER_ID_KEY). It is
//! never rewritten; followers poll until the leader's write becomes visible.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use lattice_common::{ClusterId, HostAddr};
use lattice_kv::{LatticeStore, ResultCode};
use tracing::{error, info};

use crate::keys::{CLUSTER_ID_KEY, META_PART_ID, META_SPACE_ID};

pub struct ClusterIdMan;

impl ClusterIdMan {
    /// Derive a non-zero cluster id from the canonical form of the configured
    /// meta peer list. Deterministic across replicas.
    pub fn create(meta_peers: &[HostAddr]) -> ClusterId {
        let mut canonical: Vec<String> = meta_peers.iter().map(|h| h.to_string()).collect();
        canonical.sort();

        let mut hasher = DefaultHasher::new();
        "lattice_cluster_id".hash(&mut hasher);
        for peer in &canonical {
            peer.hash(&mut hasher);
        }
        let id = hasher.finish() as ClusterId;
        if id == 0 {
            1
        } else {
            id
        }
    }

    /// Read the persisted cluster id; 0 when the key is absent or malformed.
    pub fn get_cluster_id_from_kv(store: &Arc<LatticeStore>) -> ClusterId {
        match store.get(META_SPACE_ID, META_PART_ID, CLUSTER_ID_KEY) {
            Ok(bytes) if bytes.len() == 8 => {
                ClusterId::from_be_bytes(bytes[..8].try_into().unwrap())
            }
            Ok(bytes) => {
                error!(len = bytes.len(), "cluster id value has unexpected length");
                0
            }
            Err(ResultCode::KeyNotFound) => 0,
            Err(code) => {
                error!(%code, "cluster id read failed");
                0
            }
        }
    }

    /// Persist the cluster id. Leader-only; the write goes through the meta
    /// partition's replicated log.
    pub async fn persist_in_kv(store: &Arc<LatticeStore>, cluster_id: ClusterId) -> bool {
        let code = store
            .async_multi_put(
                META_SPACE_ID,
                META_PART_ID,
                vec![(CLUSTER_ID_KEY.to_vec(), cluster_id.to_be_bytes().to_vec())],
            )
            .await;
        if code.ok() {
            info!(cluster_id, "cluster id persisted");
            true
        } else {
            error!(%code, "cluster id write failed");
            false
        }
    }
}
