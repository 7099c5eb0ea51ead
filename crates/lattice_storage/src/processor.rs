//! Shared async fan-out machinery for storage processors.
//!
//! A processor dispatches work over a set of partitions, funnels every
//! completion through [`BaseProcessor::handle_async`], and resolves its
//! finish latch exactly once when the last completion lands. Successful
//! partitions are not reported; the response carries failures only.

use std::sync::{Arc, Mutex};

use lattice_common::{
    ErrorCode, HostAddr, PartId, PartitionResult, RowWriter, Schema, SpaceId, Value, WriteFault,
};
use lattice_kv::{LatticeStore, ResultCode};
use tokio::sync::oneshot;
use tracing::error;

/// Fixed KV-to-wire error translation.
pub fn to_error_code(code: ResultCode) -> ErrorCode {
    match code {
        ResultCode::Succeeded => ErrorCode::Succeeded,
        ResultCode::LeaderChanged => ErrorCode::LeaderChanged,
        ResultCode::SpaceNotFound => ErrorCode::SpaceNotFound,
        ResultCode::PartNotFound => ErrorCode::PartNotFound,
        ResultCode::ConsensusError => ErrorCode::ConsensusError,
        ResultCode::CheckpointError => ErrorCode::FailedToCheckpoint,
        ResultCode::WriteBlocked => ErrorCode::CheckpointBlocked,
        ResultCode::PartialResult => ErrorCode::PartialResult,
        _ => ErrorCode::Unknown,
    }
}

/// Fixed row-encoder fault translation; `is_edge` picks the prop-not-found
/// flavor.
pub fn write_fault_to_error(fault: WriteFault, is_edge: bool) -> ErrorCode {
    match fault {
        WriteFault::UnknownField => {
            if is_edge {
                ErrorCode::EdgePropNotFound
            } else {
                ErrorCode::TagPropNotFound
            }
        }
        WriteFault::NotNullable => ErrorCode::NotNullable,
        WriteFault::TypeMismatch => ErrorCode::DataTypeMismatch,
        WriteFault::FieldUnset => ErrorCode::FieldUnset,
        WriteFault::OutOfRange => ErrorCode::OutOfRange,
        WriteFault::IncorrectValue => ErrorCode::InvalidFieldValue,
    }
}

/// Encode one row against a schema, by request prop names when given and by
/// schema position otherwise.
pub fn encode_row_val(
    schema: &Schema,
    prop_names: &[String],
    props: &[Value],
) -> Result<Vec<u8>, WriteFault> {
    let mut writer = RowWriter::new(schema);
    if !prop_names.is_empty() {
        if prop_names.len() != props.len() {
            return Err(WriteFault::FieldUnset);
        }
        for (name, value) in prop_names.iter().zip(props) {
            writer.set(name, value.clone())?;
        }
    } else {
        for (idx, value) in props.iter().enumerate() {
            writer.set_at(idx, value.clone())?;
        }
    }
    writer.finish()
}

struct Inner {
    codes: Vec<PartitionResult>,
    calling_num: usize,
    done: Option<oneshot::Sender<()>>,
}

/// The per-request rendezvous shared by every storage processor.
pub struct BaseProcessor {
    store: Arc<LatticeStore>,
    inner: Mutex<Inner>,
    done_rx: Mutex<Option<oneshot::Receiver<()>>>,
}

impl BaseProcessor {
    pub fn new(store: Arc<LatticeStore>) -> Arc<Self> {
        let (tx, rx) = oneshot::channel();
        Arc::new(Self {
            store,
            inner: Mutex::new(Inner {
                codes: Vec::new(),
                calling_num: 0,
                done: Some(tx),
            }),
            done_rx: Mutex::new(Some(rx)),
        })
    }

    pub fn store(&self) -> &Arc<LatticeStore> {
        &self.store
    }

    /// Arm the latch with the fan-out width. A width of zero resolves the
    /// latch immediately.
    pub fn set_calling_num(&self, num: usize) {
        let mut inner = self.inner.lock().unwrap();
        inner.calling_num = num;
        if num == 0 {
            if let Some(done) = inner.done.take() {
                let _ = done.send(());
            }
        }
    }

    /// Record a failure. `Succeeded` is dropped; the response lists failures
    /// only.
    pub fn push_result_code(&self, code: ErrorCode, part: PartId) {
        if code != ErrorCode::Succeeded {
            let mut inner = self.inner.lock().unwrap();
            inner.codes.push(PartitionResult::new(code, part));
        }
    }

    pub fn push_result_code_with_leader(&self, code: ErrorCode, part: PartId, leader: HostAddr) {
        if code != ErrorCode::Succeeded {
            let mut inner = self.inner.lock().unwrap();
            inner.codes.push(PartitionResult::with_leader(code, part, leader));
        }
    }

    /// One per-partition completion with a KV result code. Decrements the
    /// latch; the last caller resolves it.
    pub fn handle_async(&self, space: SpaceId, part: PartId, code: ResultCode) {
        let mut inner = self.inner.lock().unwrap();
        self.record_kv_code(&mut inner, space, part, code);
        self.arm_down(&mut inner);
    }

    /// Record a KV failure without touching the latch. Write paths outside
    /// the fan-out (condition-checked updates, synchronous puts) use this so
    /// `LeaderChanged` still carries the suspected leader.
    pub fn push_kv_result(&self, space: SpaceId, part: PartId, code: ResultCode) {
        let mut inner = self.inner.lock().unwrap();
        self.record_kv_code(&mut inner, space, part, code);
    }

    fn record_kv_code(&self, inner: &mut Inner, space: SpaceId, part: PartId, code: ResultCode) {
        if code == ResultCode::Succeeded {
            return;
        }
        if code == ResultCode::LeaderChanged {
            self.record_leader_changed(inner, space, part);
        } else {
            inner.codes.push(PartitionResult::new(to_error_code(code), part));
        }
    }

    /// One per-partition completion with an already-translated error.
    pub fn handle_async_error(&self, part: PartId, code: ErrorCode) {
        let mut inner = self.inner.lock().unwrap();
        if code != ErrorCode::Succeeded {
            inner.codes.push(PartitionResult::new(code, part));
        }
        self.arm_down(&mut inner);
    }

    fn arm_down(&self, inner: &mut Inner) {
        inner.calling_num = inner.calling_num.saturating_sub(1);
        if inner.calling_num == 0 {
            if let Some(done) = inner.done.take() {
                let _ = done.send(());
            }
        }
    }

    /// Attach the current suspected leader when the store can supply one;
    /// otherwise fall back to the translated sub-error.
    fn record_leader_changed(&self, inner: &mut Inner, space: SpaceId, part: PartId) {
        match self.store.part_leader(space, part) {
            Ok(leader) if !leader.is_zero() => {
                inner
                    .codes
                    .push(PartitionResult::with_leader(ErrorCode::LeaderChanged, part, leader));
            }
            Ok(_) => {
                inner
                    .codes
                    .push(PartitionResult::new(ErrorCode::LeaderChanged, part));
            }
            Err(code) => {
                error!(space, part, %code, "failed to get part leader");
                inner.codes.push(PartitionResult::new(to_error_code(code), part));
            }
        }
    }

    /// Dispatch a partition write and route its completion into the latch.
    pub async fn do_put(&self, space: SpaceId, part: PartId, data: Vec<(Vec<u8>, Vec<u8>)>) {
        let code = self.store.async_multi_put(space, part, data).await;
        self.handle_async(space, part, code);
    }

    pub async fn do_remove(&self, space: SpaceId, part: PartId, keys: Vec<Vec<u8>>) {
        let code = self.store.async_multi_remove(space, part, keys).await;
        self.handle_async(space, part, code);
    }

    pub async fn do_remove_range(&self, space: SpaceId, part: PartId, start: Vec<u8>, end: Vec<u8>) {
        let code = self.store.async_remove_range(space, part, start, end).await;
        self.handle_async(space, part, code);
    }

    /// Synchronous-style put: resolves with the raw code and leaves the
    /// latch alone. Meta-style call sites that want write-then-check
    /// semantics use this instead of the fan-out path.
    pub async fn do_sync_put(
        &self,
        space: SpaceId,
        part: PartId,
        data: Vec<(Vec<u8>, Vec<u8>)>,
    ) -> ResultCode {
        self.store.async_multi_put(space, part, data).await
    }

    /// Wait for the last completion and take the collected failures.
    /// Resolves exactly once per processor.
    pub async fn finish(&self) -> Vec<PartitionResult> {
        let rx = self
            .done_rx
            .lock()
            .unwrap()
            .take()
            .expect("finish may only be awaited once");
        let _ = rx.await;
        let mut inner = self.inner.lock().unwrap();
        std::mem::take(&mut inner.codes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_kv::{ReplicaFabric, StoreOptions};

    fn store() -> Arc<LatticeStore> {
        let store = LatticeStore::in_memory(
            StoreOptions {
                local: HostAddr::new("s1", 44500),
                check_leader: true,
            },
            ReplicaFabric::new(),
        );
        for part in 1..=4 {
            store.add_part(1, part, &[HostAddr::new("s1", 44500)]).unwrap();
        }
        store
    }

    #[test]
    fn kv_translation_table_is_fixed() {
        let table = [
            (ResultCode::Succeeded, ErrorCode::Succeeded),
            (ResultCode::LeaderChanged, ErrorCode::LeaderChanged),
            (ResultCode::SpaceNotFound, ErrorCode::SpaceNotFound),
            (ResultCode::PartNotFound, ErrorCode::PartNotFound),
            (ResultCode::ConsensusError, ErrorCode::ConsensusError),
            (ResultCode::CheckpointError, ErrorCode::FailedToCheckpoint),
            (ResultCode::WriteBlocked, ErrorCode::CheckpointBlocked),
            (ResultCode::PartialResult, ErrorCode::PartialResult),
            (ResultCode::KeyNotFound, ErrorCode::Unknown),
            (ResultCode::Unknown, ErrorCode::Unknown),
        ];
        for (kv, wire) in table {
            assert_eq!(to_error_code(kv), wire);
        }
    }

    #[test]
    fn encoder_translation_distinguishes_edge_and_tag() {
        assert_eq!(
            write_fault_to_error(WriteFault::UnknownField, true),
            ErrorCode::EdgePropNotFound
        );
        assert_eq!(
            write_fault_to_error(WriteFault::UnknownField, false),
            ErrorCode::TagPropNotFound
        );
        assert_eq!(
            write_fault_to_error(WriteFault::IncorrectValue, true),
            ErrorCode::InvalidFieldValue
        );
        assert_eq!(
            write_fault_to_error(WriteFault::OutOfRange, false),
            ErrorCode::OutOfRange
        );
    }

    #[tokio::test]
    async fn successes_are_not_reported() {
        let store = store();
        let processor = BaseProcessor::new(store);
        processor.set_calling_num(2);
        processor.do_put(1, 1, vec![(b"a".to_vec(), b"1".to_vec())]).await;
        processor.do_put(1, 2, vec![(b"b".to_vec(), b"2".to_vec())]).await;
        assert!(processor.finish().await.is_empty());
    }

    #[tokio::test]
    async fn finish_fires_once_after_last_concurrent_callback() {
        let store = store();
        let processor = BaseProcessor::new(store.clone());
        processor.set_calling_num(4);

        let mut tasks = Vec::new();
        for part in 1..=4u32 {
            let processor = processor.clone();
            tasks.push(tokio::spawn(async move {
                processor
                    .do_put(1, part, vec![(vec![part as u8], b"v".to_vec())])
                    .await;
            }));
        }
        let finished = tokio::spawn({
            let processor = processor.clone();
            async move { processor.finish().await }
        });
        for task in tasks {
            task.await.unwrap();
        }
        assert!(finished.await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failures_collect_per_partition() {
        let store = store();
        store.inject_write_fault(1, 2, ResultCode::WriteBlocked);
        store.inject_write_fault(1, 3, ResultCode::ConsensusError);

        let processor = BaseProcessor::new(store);
        processor.set_calling_num(3);
        processor.do_put(1, 1, vec![]).await;
        processor.do_put(1, 2, vec![]).await;
        processor.do_put(1, 3, vec![]).await;

        let mut failed = processor.finish().await;
        failed.sort_by_key(|r| r.part_id);
        assert_eq!(failed.len(), 2);
        assert_eq!(failed[0], PartitionResult::new(ErrorCode::CheckpointBlocked, 2));
        assert_eq!(failed[1], PartitionResult::new(ErrorCode::ConsensusError, 3));
    }

    #[tokio::test]
    async fn leader_changed_attaches_suspected_leader() {
        let store = store();
        // Hand part 3's leadership to another host; writes from this store
        // then bounce and the processor reports the new leader.
        let group = store.replica_group(1, 3).unwrap();
        let new_leader = HostAddr::new("s2", 44500);
        group.set_leader(new_leader.clone());

        let processor = BaseProcessor::new(store);
        processor.set_calling_num(1);
        processor.do_put(1, 3, vec![(b"k".to_vec(), b"v".to_vec())]).await;

        let failed = processor.finish().await;
        assert_eq!(
            failed,
            vec![PartitionResult::with_leader(
                ErrorCode::LeaderChanged,
                3,
                new_leader
            )]
        );
    }

    #[tokio::test]
    async fn push_kv_result_attaches_leader_without_the_latch() {
        let store = store();
        let new_leader = HostAddr::new("s9", 44500);
        store.replica_group(1, 2).unwrap().set_leader(new_leader.clone());

        let processor = BaseProcessor::new(store);
        processor.set_calling_num(0);
        processor.push_kv_result(1, 2, ResultCode::LeaderChanged);
        assert_eq!(
            processor.finish().await,
            vec![PartitionResult::with_leader(
                ErrorCode::LeaderChanged,
                2,
                new_leader
            )]
        );
    }

    #[tokio::test]
    async fn zero_fanout_finishes_immediately() {
        let processor = BaseProcessor::new(store());
        processor.set_calling_num(0);
        assert!(processor.finish().await.is_empty());
    }
}
