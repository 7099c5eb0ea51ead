//! Index lookup: plan construction and pull-based execution.

pub mod node;
pub mod plan;

use std::sync::Arc;

use lattice_common::{DataSet, ErrorCode, PartitionResult};

use crate::env::StorageEnv;
use crate::processor::to_error_code;
use crate::requests::{LookupIndexRequest, LookupIndexResponse};
use self::node::ExecError;
use self::plan::build_plan;

pub struct LookupProcessor {
    env: Arc<StorageEnv>,
}

impl LookupProcessor {
    pub fn new(env: Arc<StorageEnv>) -> Self {
        Self { env }
    }

    /// Build and run the lookup plan. Execution is synchronous on the
    /// calling worker; contexts are not parallelized.
    pub async fn process(&self, req: LookupIndexRequest) -> LookupIndexResponse {
        let mut plan = match build_plan(&self.env, &req) {
            Ok(plan) => plan,
            Err(code) => {
                return LookupIndexResponse {
                    failed_parts: vec![PartitionResult::new(code, 0)],
                    data: DataSet::default(),
                }
            }
        };

        let mut data = DataSet::with_columns(plan.col_names.clone());
        match plan.aggregate.execute(&mut data) {
            Ok(()) => LookupIndexResponse {
                failed_parts: Vec::new(),
                data,
            },
            Err(ExecError::Store { part, code }) => LookupIndexResponse {
                failed_parts: vec![self.store_failure(req.space_id, part, code)],
                data,
            },
            Err(ExecError::Decode(err)) => {
                tracing::error!(error = ?err, "lookup row decode failed");
                LookupIndexResponse {
                    failed_parts: vec![PartitionResult::new(ErrorCode::Unknown, 0)],
                    data,
                }
            }
        }
    }

    /// A leader change during the scan carries the partition's suspected
    /// leader, like every other partition result.
    fn store_failure(
        &self,
        space: lattice_common::SpaceId,
        part: lattice_common::PartId,
        code: lattice_kv::ResultCode,
    ) -> PartitionResult {
        if code == lattice_kv::ResultCode::LeaderChanged {
            if let Ok(leader) = self.env.store.part_leader(space, part) {
                if !leader.is_zero() {
                    return PartitionResult::with_leader(ErrorCode::LeaderChanged, part, leader);
                }
            }
        }
        PartitionResult::new(to_error_code(code), part)
    }
}
