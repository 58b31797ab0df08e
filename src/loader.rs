//! Decoding of uploaded chat exports into a [`Table`].
//!
//! CSV and Parquet both go through Arrow record batches, which are then
//! rendered to JSON rows. CSV columns are read as strings so a
//! `messages_json` column keeps its raw JSON text; Parquet columns keep
//! their native types (nested list columns become JSON arrays).

use std::io::Cursor;
use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema};
use arrow::json::ArrayWriter;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use chat_rag_core::table::Table;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::{Map, Value};
use thiserror::Error;

const BOM: char = '\u{feff}';

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Invalid file type '{0}'. Please upload a CSV or Parquet file.")]
    UnsupportedFileType(String),
    #[error("failed to read Parquet: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
    #[error("failed to decode table: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
    #[error("failed to convert rows: {0}")]
    Json(#[from] serde_json::Error),
}

/// Supported upload formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Csv,
    Parquet,
}

impl FileKind {
    /// Detects the format from a file name's extension (case-insensitive).
    pub fn from_file_name(name: &str) -> Result<Self, LoadError> {
        let extension = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "csv" => Ok(FileKind::Csv),
            "parquet" => Ok(FileKind::Parquet),
            _ => Err(LoadError::UnsupportedFileType(name.to_string())),
        }
    }
}

/// Decodes `data` as `kind` into a table.
pub fn load_table(kind: FileKind, data: Bytes) -> Result<Table, LoadError> {
    match kind {
        FileKind::Csv => load_csv(&data),
        FileKind::Parquet => load_parquet(data),
    }
}

/// Convenience wrapper that detects the format from `file_name`.
pub fn load_file(file_name: &str, data: Bytes) -> Result<Table, LoadError> {
    load_table(FileKind::from_file_name(file_name)?, data)
}

fn load_csv(data: &[u8]) -> Result<Table, LoadError> {
    let format = arrow::csv::reader::Format::default()
        .with_header(true)
        .with_truncated_rows(true);
    let (inferred, _) = format.infer_schema(Cursor::new(data), None)?;

    // Every column as text: JSON payloads must not be coerced into numbers.
    let fields: Vec<Field> = inferred
        .fields()
        .iter()
        .map(|field| Field::new(field.name().trim_start_matches(BOM), DataType::Utf8, true))
        .collect();
    let schema = Arc::new(Schema::new(fields));

    let reader = arrow::csv::ReaderBuilder::new(schema.clone())
        .with_header(true)
        .with_truncated_rows(true)
        .build(Cursor::new(data))?;

    let mut table = Table::new(column_names(&schema));
    for batch in reader {
        append_batch(&mut table, &batch?)?;
    }
    Ok(table)
}

fn load_parquet(data: Bytes) -> Result<Table, LoadError> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(data)?;
    let schema = builder.schema().clone();
    let reader = builder.build()?;

    let mut table = Table::new(column_names(&schema));
    for batch in reader {
        append_batch(&mut table, &batch?)?;
    }
    Ok(table)
}

fn column_names(schema: &Schema) -> Vec<String> {
    schema
        .fields()
        .iter()
        .map(|field| field.name().trim_start_matches(BOM).to_string())
        .collect()
}

fn append_batch(table: &mut Table, batch: &RecordBatch) -> Result<(), LoadError> {
    if batch.num_rows() == 0 {
        return Ok(());
    }

    let mut writer = ArrayWriter::new(Vec::new());
    writer.write(batch)?;
    writer.finish()?;
    let rows: Vec<Map<String, Value>> = serde_json::from_slice(&writer.into_inner())?;

    for row in rows {
        let row = row
            .into_iter()
            .map(|(key, value)| (key.trim_start_matches(BOM).to_string(), value))
            .collect();
        table.push_record(row);
    }
    Ok(())
}
