//! Thread extraction: per-row chat exports → retrievable documents.
//!
//! Each table row carries one chat thread in its messages column, either as
//! JSON text or as an already-decoded array of message objects. Extraction
//! runs in four stages:
//!
//! 1. [`parse_messages`] decodes the cell into message objects. Malformed
//!    input yields an empty list, never an error.
//! 2. [`MessageText`] resolves a message's `text` field, whatever its shape,
//!    into one string.
//! 3. [`aggregate_thread`] folds the messages into a [`ThreadDocument`]:
//!    joined content, time span, and message ids.
//! 4. [`prepare_documents`] drives the whole table in row order.
//!
//! Only a missing messages column is fatal ([`ExtractError::MissingColumn`]);
//! one bad row never aborts a batch.
//!
//! # Example
//!
//! ```rust
//! use chat_rag_core::table::Table;
//! use chat_rag_core::thread::{prepare_documents, ExtractOptions};
//! use serde_json::json;
//!
//! let table = Table::from_column(
//!     "messages_json",
//!     vec![
//!         json!("not json"),
//!         json!(r#"[{"id": 1, "date_unixtime": 100, "text": "hi"},
//!                  {"id": 2, "date_unixtime": 200, "text": [{"text": "there"}, "!"]}]"#),
//!     ],
//! );
//!
//! let docs = prepare_documents(&table, &ExtractOptions::default()).unwrap();
//! assert_eq!(docs.len(), 1);
//! assert_eq!(docs[0].row_index, 1);
//! assert_eq!(docs[0].content, "hi\nthere !");
//! assert_eq!(docs[0].message_ids, "[1, 2]");
//! ```

use std::io;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::ThreadDocument;
use crate::table::Table;

/// Column holding each row's serialized message list.
pub const DEFAULT_MESSAGES_COLUMN: &str = "messages_json";
/// Property name carrying the source row position.
pub const DEFAULT_INDEX_FIELD: &str = "original_df_index";

/// A single chat message: field name → value. All fields are optional.
pub type Message = Map<String, Value>;

/// Precondition failures of [`prepare_documents`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("input must contain a '{column}' column")]
    MissingColumn { column: String },
}

/// Which column to read and which property name receives the row index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractOptions {
    pub messages_column: String,
    pub index_field: String,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            messages_column: DEFAULT_MESSAGES_COLUMN.to_string(),
            index_field: DEFAULT_INDEX_FIELD.to_string(),
        }
    }
}

// ============ Message-field parser ============

/// Decodes a messages cell into message objects.
///
/// - JSON text: decoded; anything that is not a JSON array yields `[]`.
/// - Array: used as-is.
/// - Any other value (number, null, ...): `[]`.
///
/// Elements that are not objects are dropped.
pub fn parse_messages(cell: &Value) -> Vec<Message> {
    match cell {
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Array(items)) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Object(message) => Some(message),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        },
        Value::Array(items) => items.iter().filter_map(Value::as_object).cloned().collect(),
        _ => Vec::new(),
    }
}

// ============ Text normalizer ============

/// The shapes a message's `text` field takes in chat exports.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MessageText<'a> {
    /// No `text` field at all.
    Missing,
    /// A plain string.
    Plain(&'a str),
    /// Formatted text: strings interleaved with entity objects such as
    /// `{"type": "bold", "text": "Important:"}`.
    Segments(&'a [Value]),
    /// Anything else (number, boolean, null, object).
    Other(&'a Value),
}

impl<'a> MessageText<'a> {
    pub fn from_field(field: Option<&'a Value>) -> Self {
        match field {
            None => Self::Missing,
            Some(Value::String(text)) => Self::Plain(text),
            Some(Value::Array(segments)) => Self::Segments(segments),
            Some(other) => Self::Other(other),
        }
    }

    /// Resolves to a single untrimmed string. Segments are joined with one space.
    pub fn resolve(&self) -> String {
        match self {
            Self::Missing => String::new(),
            Self::Plain(text) => (*text).to_string(),
            Self::Segments(segments) => segments
                .iter()
                .map(segment_text)
                .collect::<Vec<_>>()
                .join(" "),
            Self::Other(value) => display_value(value),
        }
    }
}

fn segment_text(segment: &Value) -> String {
    match segment {
        Value::Object(entity) => entity.get("text").map(display_value).unwrap_or_default(),
        other => display_value(other),
    }
}

/// Textual form of a JSON value as the export tooling prints it:
/// `None`, `True`/`False`, numbers and containers as JSON text.
fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        other => other.to_string(),
    }
}

// ============ Thread aggregator ============

/// Truthiness of a JSON value: `null`, `false`, zero, and empty strings or
/// containers are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}

/// Reads a truthy `date_unixtime`. Floats truncate toward zero; decimal
/// strings (Telegram exports write them) are parsed.
fn timestamp_of(value: &Value) -> Option<i64> {
    if !is_truthy(value) {
        return None;
    }
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|n| n.trunc() as i64)),
        Value::String(text) => text.trim().parse::<i64>().ok().filter(|ts| *ts != 0),
        _ => None,
    }
}

/// Folds one thread's messages into a document.
///
/// Returns `None` when every message trims to empty text.
pub fn aggregate_thread(
    messages: &[Message],
    row_index: usize,
    index_field: &str,
) -> Option<ThreadDocument> {
    let mut texts = Vec::with_capacity(messages.len());
    // Unset until a truthy timestamp shows up; 0 is not a valid bound.
    let mut span: Option<(i64, i64)> = None;
    let mut ids = Vec::new();

    for message in messages {
        let text = MessageText::from_field(message.get("text")).resolve();
        texts.push(text.trim().to_string());

        if let Some(ts) = message.get("date_unixtime").and_then(timestamp_of) {
            span = Some(match span {
                Some((start, end)) => (start.min(ts), end.max(ts)),
                None => (ts, ts),
            });
        }

        if let Some(id) = message.get("id").filter(|id| is_truthy(id)) {
            ids.push(id.clone());
        }
    }

    let content = texts
        .iter()
        .filter(|text| !text.is_empty())
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("\n");

    if content.is_empty() {
        return None;
    }

    Some(ThreadDocument {
        content,
        index_field: index_field.to_string(),
        row_index,
        start_time: span.map(|(start, _)| start),
        end_time: span.map(|(_, end)| end),
        message_ids: encode_message_ids(&ids),
    })
}

/// JSON formatter with `", "` and `": "` separators, so id lists read
/// `[1, 2]` exactly as upstream consumers expect.
struct SpacedFormatter;

impl serde_json::ser::Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

/// Serializes collected message ids as a JSON array string.
pub fn encode_message_ids(ids: &[Value]) -> String {
    let mut buf = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, SpacedFormatter);
    if ids.serialize(&mut serializer).is_err() {
        return "[]".to_string();
    }
    String::from_utf8(buf).unwrap_or_else(|_| "[]".to_string())
}

// ============ Row driver ============

/// Extracts one document per non-empty thread, in row order.
///
/// # Errors
///
/// [`ExtractError::MissingColumn`] when the table has no messages column.
/// This is checked before any row is read.
pub fn prepare_documents(
    table: &Table,
    options: &ExtractOptions,
) -> Result<Vec<ThreadDocument>, ExtractError> {
    let column =
        table
            .column_index(&options.messages_column)
            .ok_or_else(|| ExtractError::MissingColumn {
                column: options.messages_column.clone(),
            })?;

    let mut documents = Vec::new();

    for (row_index, row) in table.rows().enumerate() {
        let messages = row.get(column).map(parse_messages).unwrap_or_default();
        if messages.is_empty() {
            continue;
        }
        if let Some(doc) = aggregate_thread(&messages, row_index, &options.index_field) {
            documents.push(doc);
        }
    }

    Ok(documents)
}
