//! The partitioned replicated store.
//!
//! Every `(space, part)` pair is an independent state machine: a storage
//! engine plus a [`Replicator`] covering the consensus surface. The
//! [`LocalReplicator`] used here commits through an in-process
//! [`ReplicaGroup`]; replicas of one partition in the same process share a
//! group via the [`ReplicaFabric`], which gives leader election and
//! follower visibility without a network. Daemons talking over a real
//! transport supply their own `Replicator` behind the same seam.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use fjall::Keyspace;
use lattice_common::{HostAddr, PartId, SpaceId};
use tracing::{info, warn};

use crate::engine::{FjallEngine, KvEngine, MemEngine};
use crate::part_manager::PartListener;
use crate::result::ResultCode;

/// One replicated write, atomic within its partition.
#[derive(Clone, Debug)]
pub enum WriteBatch {
    MultiPut(Vec<(Vec<u8>, Vec<u8>)>),
    MultiRemove(Vec<Vec<u8>>),
    /// Half-open `[start, end)`.
    RemoveRange(Vec<u8>, Vec<u8>),
}

/// Consensus surface of one partition.
#[async_trait]
pub trait Replicator: Send + Sync + 'static {
    /// Commit a batch through the replicated log. Resolves once the batch is
    /// durable on a quorum (for the local fabric: applied to every member).
    async fn replicate(&self, batch: WriteBatch) -> ResultCode;

    /// Current leader, or the zero address before the first election.
    fn leader(&self) -> HostAddr;

    fn is_leader(&self) -> bool;
}

struct GroupInner {
    // (host, engine) per registered replica
    members: Vec<(HostAddr, Arc<dyn KvEngine>)>,
    expected: usize,
    leader: HostAddr,
    commit_seq: u64,
}

/// In-process replica set of one partition.
pub struct ReplicaGroup {
    inner: Mutex<GroupInner>,
}

impl ReplicaGroup {
    fn new(expected: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(GroupInner {
                members: Vec::new(),
                expected: expected.max(1),
                leader: HostAddr::zero(),
                commit_seq: 0,
            }),
        })
    }

    fn register(&self, host: HostAddr, engine: Arc<dyn KvEngine>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(slot) = inner.members.iter_mut().find(|(h, _)| *h == host) {
            slot.1 = engine;
        } else {
            inner.members.push((host, engine));
        }
        // First election once the full replica set has checked in.
        if inner.leader.is_zero() && inner.members.len() >= inner.expected {
            let mut hosts: Vec<HostAddr> = inner.members.iter().map(|(h, _)| h.clone()).collect();
            hosts.sort();
            inner.leader = hosts.remove(0);
            info!(leader = %inner.leader, "partition leader elected");
        }
    }

    /// Current leader; zero before the first election.
    pub fn leader(&self) -> HostAddr {
        self.inner.lock().unwrap().leader.clone()
    }

    /// Force a leadership change. Used by rebalancing and by tests.
    pub fn set_leader(&self, host: HostAddr) {
        self.inner.lock().unwrap().leader = host;
    }

    fn commit(&self, batch: &WriteBatch) -> ResultCode {
        let mut inner = self.inner.lock().unwrap();
        inner.commit_seq += 1;
        for (host, engine) in &inner.members {
            let res = match batch {
                WriteBatch::MultiPut(kvs) => engine.multi_put(kvs),
                WriteBatch::MultiRemove(keys) => engine.multi_remove(keys),
                WriteBatch::RemoveRange(start, end) => engine.remove_range(start, end),
            };
            if let Err(err) = res {
                warn!(replica = %host, error = ?err, "replicated apply failed");
                return ResultCode::ConsensusError;
            }
        }
        ResultCode::Succeeded
    }

    /// Commit sequence observed so far; strictly ordered per partition.
    pub fn commit_seq(&self) -> u64 {
        self.inner.lock().unwrap().commit_seq
    }
}

/// Shared registry of in-process replica groups, keyed by `(space, part)`.
/// Stores that should replicate to each other share one fabric.
#[derive(Default)]
pub struct ReplicaFabric {
    groups: Mutex<HashMap<(SpaceId, PartId), Arc<ReplicaGroup>>>,
}

impl ReplicaFabric {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn group(&self, space: SpaceId, part: PartId, expected: usize) -> Arc<ReplicaGroup> {
        let mut groups = self.groups.lock().unwrap();
        groups
            .entry((space, part))
            .or_insert_with(|| ReplicaGroup::new(expected))
            .clone()
    }

    /// Lookup a group without creating it.
    pub fn find_group(&self, space: SpaceId, part: PartId) -> Option<Arc<ReplicaGroup>> {
        self.groups.lock().unwrap().get(&(space, part)).cloned()
    }
}

/// Replicator handle bound to one replica of one group.
pub struct LocalReplicator {
    local: HostAddr,
    group: Arc<ReplicaGroup>,
}

impl LocalReplicator {
    pub fn new(local: HostAddr, group: Arc<ReplicaGroup>) -> Self {
        Self { local, group }
    }
}

#[async_trait]
impl Replicator for LocalReplicator {
    async fn replicate(&self, batch: WriteBatch) -> ResultCode {
        let leader = self.group.leader();
        if leader.is_zero() {
            return ResultCode::ConsensusError;
        }
        if leader != self.local {
            return ResultCode::LeaderChanged;
        }
        self.group.commit(&batch)
    }

    fn leader(&self) -> HostAddr {
        self.group.leader()
    }

    fn is_leader(&self) -> bool {
        let leader = self.group.leader();
        !leader.is_zero() && leader == self.local
    }
}

/// Store construction options.
#[derive(Clone, Debug)]
pub struct StoreOptions {
    /// This daemon's identity; becomes the replica address in every group.
    pub local: HostAddr,
    /// When set, reads on a non-leader partition fail with `LeaderChanged`.
    /// Meta daemons clear this so followers serve reads.
    pub check_leader: bool,
}

enum EngineKind {
    Mem,
    Fjall(Arc<Keyspace>),
}

struct Partition {
    engine: Arc<dyn KvEngine>,
    replicator: Arc<dyn Replicator>,
}

/// Partitioned replicated KV store; one per daemon.
pub struct LatticeStore {
    options: StoreOptions,
    engines: EngineKind,
    fabric: Arc<ReplicaFabric>,
    parts: RwLock<HashMap<(SpaceId, PartId), Arc<Partition>>>,
    injected: Mutex<HashMap<(SpaceId, PartId), Vec<ResultCode>>>,
}

impl LatticeStore {
    /// Store over in-memory engines, replicating through `fabric`.
    pub fn in_memory(options: StoreOptions, fabric: Arc<ReplicaFabric>) -> Arc<Self> {
        Arc::new(Self {
            options,
            engines: EngineKind::Mem,
            fabric,
            parts: RwLock::new(HashMap::new()),
            injected: Mutex::new(HashMap::new()),
        })
    }

    /// Store over a fjall keyspace rooted at `data_path`.
    pub fn open(
        options: StoreOptions,
        data_path: &Path,
        fabric: Arc<ReplicaFabric>,
    ) -> anyhow::Result<Arc<Self>> {
        let keyspace = Arc::new(fjall::Config::new(data_path).open()?);
        Ok(Arc::new(Self {
            options,
            engines: EngineKind::Fjall(keyspace),
            fabric,
            parts: RwLock::new(HashMap::new()),
            injected: Mutex::new(HashMap::new()),
        }))
    }

    pub fn local_host(&self) -> &HostAddr {
        &self.options.local
    }

    pub fn check_leader(&self) -> bool {
        self.options.check_leader
    }

    fn make_engine(&self, space: SpaceId, part: PartId) -> anyhow::Result<Arc<dyn KvEngine>> {
        match &self.engines {
            EngineKind::Mem => Ok(Arc::new(MemEngine::new())),
            EngineKind::Fjall(keyspace) => {
                Ok(Arc::new(FjallEngine::open(keyspace.clone(), space, part)?))
            }
        }
    }

    /// Register a partition with its replica set. Idempotent.
    pub fn add_part(
        &self,
        space: SpaceId,
        part: PartId,
        peers: &[HostAddr],
    ) -> anyhow::Result<()> {
        {
            let parts = self.parts.read().unwrap();
            if parts.contains_key(&(space, part)) {
                return Ok(());
            }
        }
        let engine = self.make_engine(space, part)?;
        let group = self.fabric.group(space, part, peers.len());
        group.register(self.options.local.clone(), engine.clone());
        let replicator = Arc::new(LocalReplicator::new(self.options.local.clone(), group));
        let mut parts = self.parts.write().unwrap();
        parts.insert(
            (space, part),
            Arc::new(Partition {
                engine,
                replicator,
            }),
        );
        Ok(())
    }

    pub fn remove_part(&self, space: SpaceId, part: PartId) {
        self.parts.write().unwrap().remove(&(space, part));
    }

    fn partition(&self, space: SpaceId, part: PartId) -> Result<Arc<Partition>, ResultCode> {
        let parts = self.parts.read().unwrap();
        if let Some(partition) = parts.get(&(space, part)) {
            return Ok(partition.clone());
        }
        if parts.keys().any(|(s, _)| *s == space) {
            Err(ResultCode::PartNotFound)
        } else {
            Err(ResultCode::SpaceNotFound)
        }
    }

    fn take_injected(&self, space: SpaceId, part: PartId) -> Option<ResultCode> {
        let mut injected = self.injected.lock().unwrap();
        let faults = injected.get_mut(&(space, part))?;
        if faults.is_empty() {
            None
        } else {
            Some(faults.remove(0))
        }
    }

    /// Queue a result code to be returned by the next write on a partition.
    /// Test hook for consensus-level fault scenarios.
    pub fn inject_write_fault(&self, space: SpaceId, part: PartId, code: ResultCode) {
        self.injected
            .lock()
            .unwrap()
            .entry((space, part))
            .or_default()
            .push(code);
    }

    /// Atomic multi-key write within one partition.
    pub async fn async_multi_put(
        &self,
        space: SpaceId,
        part: PartId,
        kvs: Vec<(Vec<u8>, Vec<u8>)>,
    ) -> ResultCode {
        self.write(space, part, WriteBatch::MultiPut(kvs)).await
    }

    pub async fn async_multi_remove(
        &self,
        space: SpaceId,
        part: PartId,
        keys: Vec<Vec<u8>>,
    ) -> ResultCode {
        self.write(space, part, WriteBatch::MultiRemove(keys)).await
    }

    /// Remove every key in the half-open range `[start, end)`.
    pub async fn async_remove_range(
        &self,
        space: SpaceId,
        part: PartId,
        start: Vec<u8>,
        end: Vec<u8>,
    ) -> ResultCode {
        self.write(space, part, WriteBatch::RemoveRange(start, end))
            .await
    }

    async fn write(&self, space: SpaceId, part: PartId, batch: WriteBatch) -> ResultCode {
        let partition = match self.partition(space, part) {
            Ok(partition) => partition,
            Err(code) => return code,
        };
        if let Some(code) = self.take_injected(space, part) {
            return code;
        }
        partition.replicator.replicate(batch).await
    }

    /// Point read. `check_leader` gates follower reads.
    pub fn get(&self, space: SpaceId, part: PartId, key: &[u8]) -> Result<Vec<u8>, ResultCode> {
        let partition = self.partition(space, part)?;
        if self.options.check_leader && !partition.replicator.is_leader() {
            return Err(ResultCode::LeaderChanged);
        }
        partition.engine.get(key).ok_or(ResultCode::KeyNotFound)
    }

    /// Ordered prefix scan, restartable from a bookmark (`after` is the last
    /// key already consumed).
    pub fn prefix_scan(
        &self,
        space: SpaceId,
        part: PartId,
        prefix: &[u8],
        after: Option<&[u8]>,
    ) -> Result<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + Send>, ResultCode> {
        let partition = self.partition(space, part)?;
        if self.options.check_leader && !partition.replicator.is_leader() {
            return Err(ResultCode::LeaderChanged);
        }
        Ok(partition.engine.scan_prefix(prefix, after))
    }

    /// Ordered scan of the half-open key range `[start, end)`, restartable
    /// from a bookmark. An empty `end` means unbounded.
    pub fn range_scan(
        &self,
        space: SpaceId,
        part: PartId,
        start: &[u8],
        end: &[u8],
        after: Option<&[u8]>,
    ) -> Result<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + Send>, ResultCode> {
        let partition = self.partition(space, part)?;
        if self.options.check_leader && !partition.replicator.is_leader() {
            return Err(ResultCode::LeaderChanged);
        }
        Ok(partition.engine.scan_range(start, end, after))
    }

    /// Current leader of a partition; the zero address before election.
    pub fn part_leader(&self, space: SpaceId, part: PartId) -> Result<HostAddr, ResultCode> {
        Ok(self.partition(space, part)?.replicator.leader())
    }

    pub fn is_part_leader(&self, space: SpaceId, part: PartId) -> bool {
        self.partition(space, part)
            .map(|p| p.replicator.is_leader())
            .unwrap_or(false)
    }

    /// Replica group of a partition, when served by the in-process fabric.
    pub fn replica_group(&self, space: SpaceId, part: PartId) -> Option<Arc<ReplicaGroup>> {
        self.fabric.find_group(space, part)
    }
}

impl PartListener for LatticeStore {
    fn on_part_added(&self, space: SpaceId, part: PartId, peers: &[HostAddr]) {
        if let Err(err) = self.add_part(space, part, peers) {
            warn!(space, part, error = ?err, "failed to open partition");
        }
    }

    fn on_part_removed(&self, space: SpaceId, part: PartId) {
        self.remove_part(space, part);
    }
}
