//! First-start sequence of a meta replica.
//!
//! Mirrors the daemon boot order: seed the meta partition, wait out the
//! first election, settle the cluster id, optionally run the meta upgrade,
//! then install the root user on the leader.

use std::sync::Arc;
use std::time::Duration;

use lattice_common::HostAddr;
use lattice_kv::{LatticeStore, MemPartManager};
use tracing::info;

use crate::cluster_id::ClusterIdMan;
use crate::keys::{META_PART_ID, META_SPACE_ID};
use crate::root_user::ensure_root_user;
use crate::service::MetaService;
use crate::upgrade::upgrade_meta_v1_to_v2;

#[derive(Clone, Debug)]
pub struct MetaBootOptions {
    pub local: HostAddr,
    /// Configured meta replica set; empty means single-node.
    pub meta_peers: Vec<HostAddr>,
    pub upgrade_meta_data: bool,
    /// Backoff between leader/cluster-id polls.
    pub poll_interval: Duration,
}

impl MetaBootOptions {
    pub fn single_node(local: HostAddr) -> Self {
        Self {
            local,
            meta_peers: Vec::new(),
            upgrade_meta_data: false,
            poll_interval: Duration::from_secs(1),
        }
    }

    fn effective_peers(&self) -> Vec<HostAddr> {
        if self.meta_peers.is_empty() {
            vec![self.local.clone()]
        } else {
            self.meta_peers.clone()
        }
    }
}

/// Initialize the meta partition and settle the cluster identity. Returns a
/// meta service carrying the agreed cluster id.
///
/// Invariants: a follower never writes the cluster-id key; a leader never
/// rewrites it.
pub async fn init_meta_kv(
    store: Arc<LatticeStore>,
    part_man: &MemPartManager,
    options: MetaBootOptions,
) -> anyhow::Result<MetaService> {
    let peers = options.effective_peers();
    part_man.add_part(META_SPACE_ID, META_PART_ID, peers.clone());
    // The listener path covers stores attached to the manager; seed directly
    // as well so a standalone store boots identically.
    store.add_part(META_SPACE_ID, META_PART_ID, &peers)?;

    info!("waiting for the meta leader election");
    let leader = loop {
        let leader = store
            .part_leader(META_SPACE_ID, META_PART_ID)
            .map_err(|code| anyhow::anyhow!("meta partition unavailable: {code}"))?;
        if !leader.is_zero() {
            break leader;
        }
        info!("leader has not been elected, sleeping");
        tokio::time::sleep(options.poll_interval).await;
    };

    let is_leader = leader == options.local;
    let mut cluster_id = ClusterIdMan::get_cluster_id_from_kv(&store);
    if cluster_id == 0 {
        if is_leader {
            info!("I am the meta leader, creating the cluster id");
            cluster_id = ClusterIdMan::create(&peers);
            if !ClusterIdMan::persist_in_kv(&store, cluster_id).await {
                anyhow::bail!("cluster id write failed, refusing to start");
            }
        } else {
            info!("I am a follower, waiting for the leader's cluster id");
            loop {
                tokio::time::sleep(options.poll_interval).await;
                cluster_id = ClusterIdMan::get_cluster_id_from_kv(&store);
                if cluster_id != 0 {
                    break;
                }
                info!("waiting for the leader's cluster id");
            }
        }
    }

    if options.upgrade_meta_data && is_leader {
        upgrade_meta_v1_to_v2(&store).await?;
    }

    let service = MetaService::new(store, cluster_id);
    if is_leader && !ensure_root_user(&service).await {
        anyhow::bail!("root user bootstrap failed");
    }

    info!(cluster_id, "meta store initialized");
    Ok(service)
}
