//! Cross-partition atomic edge insertion.
//!
//! The request is split into chains keyed by `(local part, remote part)`;
//! each chain goes through the transaction manager so the out-edge and the
//! mirrored in-edge commit together. Any part-resolution or encoding
//! failure aborts the whole request before a single chain is submitted.

use std::collections::BTreeMap;
use std::sync::Arc;

use lattice_common::keys::edge_key;
use lattice_common::{ErrorCode, PartId, SpaceId};
use tracing::info;

use crate::env::StorageEnv;
use crate::processor::{encode_row_val, BaseProcessor};
use crate::requests::{AddEdgesRequest, ExecResponse, NewEdge};
use crate::txn::ChainTransactionManager;

// A chain routes one (local, remote) partition pair.
type ChainId = (PartId, PartId);

pub struct AddEdgesAtomicProcessor {
    env: Arc<StorageEnv>,
    /// Log every edge key routed through a chain.
    trace_atomic: bool,
}

impl AddEdgesAtomicProcessor {
    pub fn new(env: Arc<StorageEnv>) -> Self {
        Self {
            env,
            trace_atomic: false,
        }
    }

    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace_atomic = trace;
        self
    }

    pub async fn process(&self, req: AddEdgesRequest) -> ExecResponse {
        let space = req.space_id;
        let base = BaseProcessor::new(self.env.store.clone());

        let Some(vid_len) = self.env.schema_man.vid_len(space) else {
            base.set_calling_num(0);
            for part in req.parts.keys() {
                base.push_result_code(ErrorCode::InvalidSpaceVidLen, *part);
            }
            return ExecResponse {
                failed_parts: base.finish().await,
            };
        };

        match self.split_into_chains(&req, vid_len) {
            Ok(chains) => self.process_chains(space, vid_len, chains, base).await,
            Err((part, code)) => {
                // Request-level abort: no chain is submitted once any edge
                // fails to resolve or encode.
                base.set_calling_num(0);
                base.push_result_code(code, part);
                ExecResponse {
                    failed_parts: base.finish().await,
                }
            }
        }
    }

    fn split_into_chains(
        &self,
        req: &AddEdgesRequest,
        vid_len: usize,
    ) -> Result<BTreeMap<ChainId, Vec<(Vec<u8>, Vec<u8>)>>, (PartId, ErrorCode)> {
        let space = req.space_id;
        let mut chains: BTreeMap<ChainId, Vec<(Vec<u8>, Vec<u8>)>> = BTreeMap::new();

        for (&local_part, edges) in &req.parts {
            for edge in edges {
                let Some(remote_part) = self.env.schema_man.part_for_vid(space, &edge.key.dst)
                else {
                    return Err((local_part, ErrorCode::SpaceNotFound));
                };
                if self.trace_atomic {
                    info!(
                        src = %hex(&edge.key.src),
                        dst = %hex(&edge.key.dst),
                        local_part,
                        remote_part,
                        "routing edge chain"
                    );
                }

                let key = edge_key(
                    vid_len,
                    local_part,
                    &edge.key.src,
                    edge.key.edge_type,
                    edge.key.rank,
                    &edge.key.dst,
                )
                .map_err(|_| (local_part, ErrorCode::InvalidSpaceVidLen))?;
                let value = self
                    .encode_single_edge_props(space, &req.prop_names, edge)
                    .map_err(|code| (local_part, code))?;

                chains.entry((local_part, remote_part)).or_default().push((key, value));
            }
        }
        Ok(chains)
    }

    fn encode_single_edge_props(
        &self,
        space: SpaceId,
        prop_names: &[String],
        edge: &NewEdge,
    ) -> Result<Vec<u8>, ErrorCode> {
        let schema_id = edge.key.edge_type.unsigned_abs();
        let Some(schema) = self.env.schema_man.edge_schema(space, schema_id) else {
            tracing::error!(space, edge_type = edge.key.edge_type, "edge schema missing");
            return Err(ErrorCode::SpaceNotFound);
        };
        encode_row_val(&schema, prop_names, &edge.props)
            .map_err(|_| ErrorCode::DataTypeMismatch)
    }

    async fn process_chains(
        &self,
        space: SpaceId,
        vid_len: usize,
        chains: BTreeMap<ChainId, Vec<(Vec<u8>, Vec<u8>)>>,
        base: Arc<BaseProcessor>,
    ) -> ExecResponse {
        let appender = Arc::new(ChainTransactionManager::appender_for(
            &self.env.schema_man,
            &self.env.index_man,
            space,
        ));

        base.set_calling_num(chains.len());
        let mut handles = Vec::with_capacity(chains.len());
        for ((local_part, remote_part), kvs) in chains {
            let txn = self.env.txn_man.clone();
            let appender = appender.clone();
            let trace = self.trace_atomic;
            let handle = tokio::spawn(async move {
                let code = txn
                    .add_same_part_edges(
                        vid_len,
                        space,
                        local_part,
                        remote_part,
                        kvs,
                        appender.as_ref().as_ref(),
                    )
                    .await;
                if trace {
                    info!(space, local_part, remote_part, %code, "chain resolved");
                }
                code
            });
            handles.push((local_part, handle));
        }

        let results = futures_util::future::join_all(
            handles
                .into_iter()
                .map(|(part, handle)| async move { (part, handle.await) }),
        )
        .await;
        for (local_part, outcome) in results {
            match outcome {
                // Chain outcomes land against the local part; a leader
                // change picks up that partition's suspected leader for the
                // client to re-dispatch to.
                Ok(code) => base.handle_async(space, local_part, code),
                // A lost chain future is reported as unknown.
                Err(_) => base.handle_async_error(local_part, ErrorCode::Unknown),
            }
        }

        ExecResponse {
            failed_parts: base.finish().await,
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
