//! Partition-to-replica-set mapping.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use lattice_common::{HostAddr, PartId, SpaceId};

use crate::result::ResultCode;

/// Store-side hook invoked when partition membership changes.
pub trait PartListener: Send + Sync {
    fn on_part_added(&self, space: SpaceId, part: PartId, peers: &[HostAddr]);
    fn on_part_removed(&self, space: SpaceId, part: PartId);
}

#[derive(Default)]
struct PartMap {
    // (space, part) -> ordered replica set
    parts: HashMap<SpaceId, HashMap<PartId, Vec<HostAddr>>>,
}

/// In-memory partition manager. Lookups never block on updates; updates are
/// totally ordered per `(space, part)` by the write lock.
#[derive(Default)]
pub struct MemPartManager {
    inner: RwLock<PartMap>,
    listeners: RwLock<Vec<Arc<dyn PartListener>>>,
}

impl MemPartManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_listener(&self, listener: Arc<dyn PartListener>) {
        self.listeners.write().unwrap().push(listener);
    }

    /// Register a partition and notify listeners. Idempotent: re-adding an
    /// existing partition updates its peer list without re-notification when
    /// nothing changed.
    pub fn add_part(&self, space: SpaceId, part: PartId, peers: Vec<HostAddr>) {
        {
            let mut inner = self.inner.write().unwrap();
            let space_parts = inner.parts.entry(space).or_default();
            if space_parts.get(&part) == Some(&peers) {
                return;
            }
            space_parts.insert(part, peers.clone());
        }
        for listener in self.listeners.read().unwrap().iter() {
            listener.on_part_added(space, part, &peers);
        }
    }

    pub fn remove_part(&self, space: SpaceId, part: PartId) {
        let removed = {
            let mut inner = self.inner.write().unwrap();
            inner
                .parts
                .get_mut(&space)
                .map(|parts| parts.remove(&part).is_some())
                .unwrap_or(false)
        };
        if removed {
            for listener in self.listeners.read().unwrap().iter() {
                listener.on_part_removed(space, part);
            }
        }
    }

    /// All partition ids of a space, ascending.
    pub fn parts(&self, space: SpaceId) -> Result<Vec<PartId>, ResultCode> {
        let inner = self.inner.read().unwrap();
        let parts = inner.parts.get(&space).ok_or(ResultCode::SpaceNotFound)?;
        let mut ids: Vec<PartId> = parts.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// Ordered replica set of one partition.
    pub fn peers(&self, space: SpaceId, part: PartId) -> Result<Vec<HostAddr>, ResultCode> {
        let inner = self.inner.read().unwrap();
        let parts = inner.parts.get(&space).ok_or(ResultCode::SpaceNotFound)?;
        parts.get(&part).cloned().ok_or(ResultCode::PartNotFound)
    }

    pub fn has_part(&self, space: SpaceId, part: PartId) -> bool {
        let inner = self.inner.read().unwrap();
        inner
            .parts
            .get(&space)
            .map(|parts| parts.contains_key(&part))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener {
        added: AtomicUsize,
    }

    impl PartListener for CountingListener {
        fn on_part_added(&self, _space: SpaceId, _part: PartId, _peers: &[HostAddr]) {
            self.added.fetch_add(1, Ordering::SeqCst);
        }
        fn on_part_removed(&self, _space: SpaceId, _part: PartId) {}
    }

    #[test]
    fn add_part_is_idempotent() {
        let man = MemPartManager::new();
        let listener = Arc::new(CountingListener {
            added: AtomicUsize::new(0),
        });
        man.register_listener(listener.clone());

        let peers = vec![HostAddr::new("m1", 1), HostAddr::new("m2", 2)];
        man.add_part(0, 0, peers.clone());
        man.add_part(0, 0, peers.clone());
        assert_eq!(listener.added.load(Ordering::SeqCst), 1);
        assert_eq!(man.peers(0, 0).unwrap(), peers);
    }

    #[test]
    fn unknown_lookups_fail_with_codes() {
        let man = MemPartManager::new();
        assert_eq!(man.parts(9).unwrap_err(), ResultCode::SpaceNotFound);
        man.add_part(9, 1, vec![HostAddr::new("h", 1)]);
        assert_eq!(man.peers(9, 2).unwrap_err(), ResultCode::PartNotFound);
        assert_eq!(man.parts(9).unwrap(), vec![1]);
    }
}
