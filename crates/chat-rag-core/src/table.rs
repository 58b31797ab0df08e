//! In-memory row collection handed to the thread extractor.
//!
//! Loaders (CSV, Parquet) decode uploaded files into a [`Table`]; the
//! extractor only ever sees this shape. A row's position in the table is its
//! identity: documents derived from it carry that position back to the caller.

use serde_json::{Map, Value};

/// Ordered column names plus rows of JSON cells.
///
/// Every row has exactly one cell per column. Rows pushed with fewer cells
/// are padded with `null`; extra cells are dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Creates an empty table with the given schema.
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Creates a single-column table, one row per cell.
    ///
    /// ```rust
    /// use chat_rag_core::table::Table;
    /// use serde_json::json;
    ///
    /// let table = Table::from_column("messages_json", vec![json!("[]"), json!(null)]);
    /// assert_eq!(table.len(), 2);
    /// assert_eq!(table.column_index("messages_json"), Some(0));
    /// ```
    pub fn from_column(name: impl Into<String>, cells: Vec<Value>) -> Self {
        let mut table = Self::new(vec![name.into()]);
        for cell in cells {
            table.push_row(vec![cell]);
        }
        table
    }

    /// Appends a row of cells in column order.
    pub fn push_row(&mut self, mut row: Vec<Value>) {
        row.resize(self.columns.len(), Value::Null);
        self.rows.push(row);
    }

    /// Appends a row given as a field map; fields outside the schema are ignored
    /// and absent fields become `null`.
    pub fn push_record(&mut self, mut record: Map<String, Value>) {
        let row = self
            .columns
            .iter()
            .map(|column| record.remove(column).unwrap_or(Value::Null))
            .collect();
        self.rows.push(row);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Position of `name` in the schema, if present.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows in their original order.
    pub fn rows(&self) -> impl Iterator<Item = &[Value]> {
        self.rows.iter().map(Vec::as_slice)
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<&Value> {
        self.rows.get(row).and_then(|cells| cells.get(column))
    }
}
