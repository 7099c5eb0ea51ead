//! Tabular result container shared by lookup and update responses.

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Column-named row set. Rows are positional against `col_names`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSet {
    pub col_names: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl DataSet {
    pub fn with_columns(col_names: Vec<String>) -> Self {
        Self {
            col_names,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Value>) {
        debug_assert_eq!(row.len(), self.col_names.len());
        self.rows.push(row);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
