//! Single-partition vertex update: read, check condition, apply props,
//! rewrite the row and its index entries.

use std::sync::Arc;

use lattice_common::keys::{index_key, vertex_key, IndexKeyTail};
use lattice_common::{DataSet, ErrorCode, RowReader, Schema, Value};
use lattice_kv::ResultCode;
use tracing::warn;

use crate::env::StorageEnv;
use crate::processor::{write_fault_to_error, BaseProcessor};
use crate::requests::{UpdateResponse, UpdateVertexRequest};

/// How an update failed: a KV write already recorded on the processor (with
/// leader resolution), or a plain code still to report.
enum UpdateFault {
    Kv,
    Code(ErrorCode),
}

impl From<ErrorCode> for UpdateFault {
    fn from(code: ErrorCode) -> Self {
        UpdateFault::Code(code)
    }
}

pub struct UpdateVertexProcessor {
    env: Arc<StorageEnv>,
}

impl UpdateVertexProcessor {
    pub fn new(env: Arc<StorageEnv>) -> Self {
        Self { env }
    }

    pub async fn process(&self, req: UpdateVertexRequest) -> UpdateResponse {
        let base = BaseProcessor::new(self.env.store.clone());
        base.set_calling_num(0);
        let data = match self.do_process(&req, &base).await {
            Ok(data) => Some(data),
            Err(fault) => {
                // KV failures were already recorded with leader resolution;
                // everything else is a plain per-partition code.
                match fault {
                    UpdateFault::Kv => {}
                    UpdateFault::Code(code) => base.push_result_code(code, req.part_id),
                }
                None
            }
        };
        UpdateResponse {
            failed_parts: base.finish().await,
            data,
        }
    }

    async fn do_process(
        &self,
        req: &UpdateVertexRequest,
        base: &BaseProcessor,
    ) -> Result<DataSet, UpdateFault> {
        let space = req.space_id;
        let vid_len = self
            .env
            .schema_man
            .vid_len(space)
            .ok_or(ErrorCode::InvalidSpaceVidLen)?;
        let schema = self
            .env
            .schema_man
            .tag_schema(space, req.tag_id)
            .ok_or(ErrorCode::SchemaNotFound)?;

        let row_key = vertex_key(vid_len, req.part_id, &req.vid, req.tag_id)
            .map_err(|_| ErrorCode::InvalidSpaceVidLen)?;

        // Read the pre-update row; a missing vertex is only acceptable for
        // insertable updates.
        let (old_values, inserted) =
            match self.env.store.get(space, req.part_id, &row_key) {
                Ok(bytes) => {
                    let reader = RowReader::new(&schema, &bytes)
                        .map_err(|_| ErrorCode::DataTypeMismatch)?;
                    let values = reader.read_all().map_err(|_| ErrorCode::DataTypeMismatch)?;
                    (Some(values), false)
                }
                Err(ResultCode::KeyNotFound) if req.insertable => (None, true),
                Err(ResultCode::KeyNotFound) => {
                    return Err(UpdateFault::Code(ErrorCode::KeyNotFound))
                }
                Err(code) => {
                    base.push_kv_result(space, req.part_id, code);
                    return Err(UpdateFault::Kv);
                }
            };

        // Condition filter runs over the pre-update values; a fresh insert
        // has no row in scope and skips the check.
        if let (Some(condition), Some(values)) = (&req.condition, &old_values) {
            let ctx: Vec<(String, Value)> = schema
                .columns
                .iter()
                .map(|c| c.name.clone())
                .zip(values.iter().cloned())
                .collect();
            if !condition.matches(&ctx) {
                return Err(UpdateFault::Code(ErrorCode::FilterOut));
            }
        }

        let new_values = self.apply_props(&schema, req, old_values.as_deref())?;
        let encoded = self.encode_row(&schema, &new_values)?;

        // Rewrite affected index entries: drop stale keys first, then land
        // the row and its fresh entries.
        let indexes = self
            .env
            .index_man
            .indexes_for_schema(space, req.tag_id, false);
        let mut stale_keys = Vec::new();
        let mut new_kvs = vec![(row_key, encoded)];
        for index in &indexes {
            let tail = IndexKeyTail::Vertex {
                vid: req.vid.clone(),
            };
            if let Some(values) = &old_values {
                let old_entry = self
                    .index_entry(&schema, index, values, vid_len, req, &tail)
                    .map_err(|_| ErrorCode::Unknown)?;
                stale_keys.push(old_entry);
            }
            let new_entry = self
                .index_entry(&schema, index, &new_values, vid_len, req, &tail)
                .map_err(|_| ErrorCode::Unknown)?;
            new_kvs.push((new_entry, Vec::new()));
        }

        if !stale_keys.is_empty() {
            let code = self
                .env
                .store
                .async_multi_remove(space, req.part_id, stale_keys)
                .await;
            if !code.ok() {
                base.push_kv_result(space, req.part_id, code);
                return Err(UpdateFault::Kv);
            }
        }
        let code = base.do_sync_put(space, req.part_id, new_kvs).await;
        if !code.ok() {
            base.push_kv_result(space, req.part_id, code);
            return Err(UpdateFault::Kv);
        }

        Ok(self.build_response_data(&schema, req, &new_values, inserted))
    }

    fn apply_props(
        &self,
        schema: &Schema,
        req: &UpdateVertexRequest,
        old_values: Option<&[Value]>,
    ) -> Result<Vec<Value>, ErrorCode> {
        let mut values: Vec<Option<Value>> = match old_values {
            Some(values) => values.iter().cloned().map(Some).collect(),
            None => vec![None; schema.columns.len()],
        };
        for prop in &req.updated_props {
            let idx = schema
                .field_index(&prop.name)
                .ok_or(ErrorCode::TagPropNotFound)?;
            values[idx] = Some(prop.value.clone());
        }
        // Unset columns of a fresh insert fall back to the column default,
        // then to null when nullable.
        values
            .into_iter()
            .zip(schema.columns.iter())
            .map(|(value, col)| match value {
                Some(value) => Ok(value),
                None => match &col.default {
                    Some(default) => Ok(default.clone()),
                    None if col.nullable => Ok(Value::Null),
                    None => Err(ErrorCode::FieldUnset),
                },
            })
            .collect()
    }

    fn encode_row(&self, schema: &Schema, values: &[Value]) -> Result<Vec<u8>, ErrorCode> {
        let mut writer = lattice_common::RowWriter::new(schema);
        for (idx, value) in values.iter().enumerate() {
            writer
                .set_at(idx, value.clone())
                .map_err(|fault| write_fault_to_error(fault, false))?;
        }
        writer
            .finish()
            .map_err(|fault| write_fault_to_error(fault, false))
    }

    fn index_entry(
        &self,
        schema: &Schema,
        index: &lattice_common::IndexItem,
        values: &[Value],
        vid_len: usize,
        req: &UpdateVertexRequest,
        tail: &IndexKeyTail,
    ) -> anyhow::Result<Vec<u8>> {
        let mut field_values = Vec::with_capacity(index.fields.len());
        for field in &index.fields {
            let idx = schema
                .field_index(&field.name)
                .ok_or_else(|| anyhow::anyhow!("indexed column {} missing", field.name))?;
            field_values.push(values[idx].clone());
        }
        index_key(vid_len, req.part_id, index, &field_values, tail)
    }

    fn build_response_data(
        &self,
        schema: &Schema,
        req: &UpdateVertexRequest,
        values: &[Value],
        inserted: bool,
    ) -> DataSet {
        let mut col_names = vec!["_inserted".to_string()];
        col_names.extend(req.return_props.iter().cloned());
        let mut data = DataSet::with_columns(col_names);

        let mut row = vec![Value::Bool(inserted)];
        for name in &req.return_props {
            let value = schema
                .field_index(name)
                .and_then(|idx| values.get(idx).cloned())
                .unwrap_or(Value::Null);
            if schema.field_index(name).is_none() {
                warn!(name, "return prop not in schema");
            }
            row.push(value);
        }
        data.push_row(row);
        data
    }
}
