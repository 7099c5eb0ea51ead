//! Storage engine API and the two engine implementations.
//!
//! One engine instance serves exactly one partition; the store wires one up
//! per `(space, part)`. `MemEngine` backs tests and the in-process replica
//! fabric, `FjallEngine` is the on-disk engine used by the daemons.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, RwLock};

use fjall::{Keyspace, PartitionCreateOptions};
use tracing::warn;

/// Wraps a boxed fjall range/prefix iterator to assert it is `Send`.
///
/// `fjall`'s `AbstractTree::range`/`prefix` erase to `Box<dyn
/// DoubleEndedIterator<...> + 'static>` without a `Send` bound, even though
/// the concrete iterator only holds `Arc`-backed guards and `byteview`
/// slices (which are themselves `unsafe impl Send`). This newtype recovers
/// that guarantee so the iterator can cross the `Send` boundary our
/// `KvEngine` trait requires.
struct SendIter(Box<dyn DoubleEndedIterator<Item = fjall::Result<fjall::KvPair>> + 'static>);

unsafe impl Send for SendIter {}

impl Iterator for SendIter {
    type Item = fjall::Result<fjall::KvPair>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next()
    }
}

/// Engine API used by a partition state machine. All writes in one call are
/// applied atomically within the partition.
pub trait KvEngine: Send + Sync + 'static {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;
    fn multi_put(&self, kvs: &[(Vec<u8>, Vec<u8>)]) -> anyhow::Result<()>;
    fn multi_remove(&self, keys: &[Vec<u8>]) -> anyhow::Result<()>;
    /// Remove every key in the half-open range `[start, end)`.
    fn remove_range(&self, start: &[u8], end: &[u8]) -> anyhow::Result<()>;
    /// Ordered scan of keys with `prefix`, starting strictly after `after`
    /// when a bookmark is given.
    fn scan_prefix(
        &self,
        prefix: &[u8],
        after: Option<&[u8]>,
    ) -> Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + Send>;
    /// Ordered scan of the half-open range `[start, end)`, starting strictly
    /// after `after` when a bookmark is given.
    fn scan_range(
        &self,
        start: &[u8],
        end: &[u8],
        after: Option<&[u8]>,
    ) -> Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + Send>;
}

/// In-memory engine over an ordered map.
#[derive(Default)]
pub struct MemEngine {
    inner: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().is_empty()
    }
}

impl KvEngine for MemEngine {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.read().unwrap().get(key).cloned()
    }

    fn multi_put(&self, kvs: &[(Vec<u8>, Vec<u8>)]) -> anyhow::Result<()> {
        let mut inner = self.inner.write().unwrap();
        for (key, value) in kvs {
            inner.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    fn multi_remove(&self, keys: &[Vec<u8>]) -> anyhow::Result<()> {
        let mut inner = self.inner.write().unwrap();
        for key in keys {
            inner.remove(key);
        }
        Ok(())
    }

    fn remove_range(&self, start: &[u8], end: &[u8]) -> anyhow::Result<()> {
        let mut inner = self.inner.write().unwrap();
        let doomed: Vec<Vec<u8>> = inner
            .range::<[u8], _>((Bound::Included(start), Bound::Excluded(end)))
            .map(|(k, _)| k.clone())
            .collect();
        for key in doomed {
            inner.remove(&key);
        }
        Ok(())
    }

    fn scan_prefix(
        &self,
        prefix: &[u8],
        after: Option<&[u8]>,
    ) -> Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + Send> {
        let inner = self.inner.read().unwrap();
        let lower: Bound<&[u8]> = match after {
            Some(bookmark) => Bound::Excluded(bookmark),
            None => Bound::Included(prefix),
        };
        let prefix = prefix.to_vec();
        let entries: Vec<(Vec<u8>, Vec<u8>)> = inner
            .range::<[u8], _>((lower, Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Box::new(entries.into_iter())
    }

    fn scan_range(
        &self,
        start: &[u8],
        end: &[u8],
        after: Option<&[u8]>,
    ) -> Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + Send> {
        let inner = self.inner.read().unwrap();
        let lower: Bound<&[u8]> = match after {
            Some(bookmark) if bookmark >= start => Bound::Excluded(bookmark),
            _ => Bound::Included(start),
        };
        let upper: Bound<&[u8]> = if end.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Excluded(end)
        };
        let entries: Vec<(Vec<u8>, Vec<u8>)> = inner
            .range::<[u8], _>((lower, upper))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Box::new(entries.into_iter())
    }
}

/// Fjall-backed engine; one fjall partition per `(space, part)`.
pub struct FjallEngine {
    partition: fjall::PartitionHandle,
    keyspace: Arc<Keyspace>,
}

impl FjallEngine {
    /// Open (or create) the fjall partition backing one store partition.
    pub fn open(keyspace: Arc<Keyspace>, space: u32, part: u32) -> anyhow::Result<Self> {
        let name = format!("s{space}_p{part}");
        let partition = keyspace.open_partition(&name, PartitionCreateOptions::default())?;
        Ok(Self {
            partition,
            keyspace,
        })
    }
}

impl KvEngine for FjallEngine {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        match self.partition.get(key) {
            Ok(slice) => slice.map(|s| s.to_vec()),
            Err(err) => {
                warn!(error = ?err, "fjall read failed");
                None
            }
        }
    }

    fn multi_put(&self, kvs: &[(Vec<u8>, Vec<u8>)]) -> anyhow::Result<()> {
        let mut batch = self.keyspace.batch();
        for (key, value) in kvs {
            batch.insert(&self.partition, key.clone(), value.clone());
        }
        batch.commit()?;
        Ok(())
    }

    fn multi_remove(&self, keys: &[Vec<u8>]) -> anyhow::Result<()> {
        let mut batch = self.keyspace.batch();
        for key in keys {
            batch.remove(&self.partition, key.clone());
        }
        batch.commit()?;
        Ok(())
    }

    fn remove_range(&self, start: &[u8], end: &[u8]) -> anyhow::Result<()> {
        let mut batch = self.keyspace.batch();
        for item in self.partition.range(start.to_vec()..end.to_vec()) {
            let (key, _) = item?;
            batch.remove(&self.partition, key.to_vec());
        }
        batch.commit()?;
        Ok(())
    }

    fn scan_prefix(
        &self,
        prefix: &[u8],
        after: Option<&[u8]>,
    ) -> Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + Send> {
        let prefix = prefix.to_vec();
        let iter: Box<dyn Iterator<Item = fjall::Result<fjall::KvPair>> + Send> = match after {
            Some(bookmark) => {
                let mut start = bookmark.to_vec();
                // Smallest key strictly greater than the bookmark.
                start.push(0);
                Box::new(SendIter(Box::new(self.partition.range(start..))))
            }
            None => Box::new(SendIter(Box::new(self.partition.prefix(prefix.clone())))),
        };
        Box::new(
            iter.filter_map(|item| match item {
                Ok((k, v)) => Some((k.to_vec(), v.to_vec())),
                Err(err) => {
                    warn!(error = ?err, "fjall scan failed");
                    None
                }
            })
            .take_while(move |(k, _)| k.starts_with(&prefix)),
        )
    }

    fn scan_range(
        &self,
        start: &[u8],
        end: &[u8],
        after: Option<&[u8]>,
    ) -> Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + Send> {
        let mut lower = start.to_vec();
        if let Some(bookmark) = after {
            if bookmark >= start {
                lower = bookmark.to_vec();
                // Smallest key strictly greater than the bookmark.
                lower.push(0);
            }
        }
        let iter: Box<dyn Iterator<Item = fjall::Result<fjall::KvPair>> + Send> =
            if end.is_empty() {
                Box::new(SendIter(Box::new(self.partition.range(lower..))))
            } else {
                Box::new(SendIter(Box::new(self.partition.range(lower..end.to_vec()))))
            };
        Box::new(iter.filter_map(|item| match item {
            Ok((k, v)) => Some((k.to_vec(), v.to_vec())),
            Err(err) => {
                warn!(error = ?err, "fjall scan failed");
                None
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kv(key: &[u8], value: &[u8]) -> (Vec<u8>, Vec<u8>) {
        (key.to_vec(), value.to_vec())
    }

    #[test]
    fn mem_engine_prefix_scan_and_bookmark() {
        let engine = MemEngine::new();
        engine
            .multi_put(&[kv(b"a1", b"1"), kv(b"a2", b"2"), kv(b"a3", b"3"), kv(b"b1", b"4")])
            .unwrap();

        let all: Vec<_> = engine.scan_prefix(b"a", None).map(|(k, _)| k).collect();
        assert_eq!(all, vec![b"a1".to_vec(), b"a2".to_vec(), b"a3".to_vec()]);

        let resumed: Vec<_> = engine
            .scan_prefix(b"a", Some(b"a1"))
            .map(|(k, _)| k)
            .collect();
        assert_eq!(resumed, vec![b"a2".to_vec(), b"a3".to_vec()]);
    }

    #[test]
    fn mem_engine_remove_range_is_half_open() {
        let engine = MemEngine::new();
        engine
            .multi_put(&[kv(b"k1", b""), kv(b"k2", b""), kv(b"k3", b"")])
            .unwrap();
        engine.remove_range(b"k1", b"k3").unwrap();
        assert!(engine.get(b"k1").is_none());
        assert!(engine.get(b"k2").is_none());
        assert!(engine.get(b"k3").is_some());
    }

    #[test]
    fn fjall_engine_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let keyspace = Arc::new(fjall::Config::new(dir.path()).open().unwrap());
        let engine = FjallEngine::open(keyspace, 1, 2).unwrap();

        engine.multi_put(&[kv(b"x1", b"v1"), kv(b"x2", b"v2")]).unwrap();
        assert_eq!(engine.get(b"x1"), Some(b"v1".to_vec()));

        let scanned: Vec<_> = engine.scan_prefix(b"x", Some(b"x1")).collect();
        assert_eq!(scanned, vec![kv(b"x2", b"v2")]);

        engine.multi_remove(&[b"x1".to_vec()]).unwrap();
        assert!(engine.get(b"x1").is_none());
    }
}
