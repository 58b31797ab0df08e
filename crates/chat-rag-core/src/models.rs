//! Core data models used throughout Chat RAG.
//!
//! These types represent the thread documents produced by extraction and
//! the hits returned by nearest-vector retrieval.

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

/// One retrievable document per non-empty chat thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadDocument {
    /// Trimmed message texts joined with `\n`, in message order.
    pub content: String,
    /// Property name under which [`row_index`](Self::row_index) is stored.
    pub index_field: String,
    /// Position of the source row in the input table.
    pub row_index: usize,
    /// Earliest truthy `date_unixtime` in the thread.
    pub start_time: Option<i64>,
    /// Latest truthy `date_unixtime` in the thread.
    pub end_time: Option<i64>,
    /// JSON array text of the thread's truthy message ids, e.g. `"[1, 2]"`.
    pub message_ids: String,
}

impl ThreadDocument {
    /// Property map as stored in the vector index.
    ///
    /// Missing time bounds are `null`, never a sentinel.
    pub fn properties(&self) -> Map<String, Value> {
        let mut props = Map::new();
        props.insert("content".to_string(), Value::from(self.content.as_str()));
        props.insert(self.index_field.clone(), Value::from(self.row_index));
        props.insert(
            "start_time".to_string(),
            self.start_time.map_or(Value::Null, Value::from),
        );
        props.insert(
            "end_time".to_string(),
            self.end_time.map_or(Value::Null, Value::from),
        );
        props.insert(
            "message_ids".to_string(),
            Value::from(self.message_ids.as_str()),
        );
        props
    }
}

impl Serialize for ThreadDocument {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.properties().serialize(serializer)
    }
}

/// A document returned from nearest-vector retrieval.
///
/// Every field is optional except `content` because remote stores may omit
/// properties that were never written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub content: String,
    pub row_index: Option<i64>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub message_ids: Option<String>,
    /// Cosine distance to the query vector (`0.0` = same direction).
    pub distance: Option<f64>,
}

/// Result of writing one or more batches to a vector store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub stored: usize,
    pub failed: usize,
}

impl BatchOutcome {
    pub fn merge(&mut self, other: BatchOutcome) {
        self.stored += other.stored;
        self.failed += other.failed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> ThreadDocument {
        ThreadDocument {
            content: "hello".to_string(),
            index_field: "original_df_index".to_string(),
            row_index: 4,
            start_time: Some(100),
            end_time: None,
            message_ids: "[1]".to_string(),
        }
    }

    #[test]
    fn test_serializes_with_configured_index_field() {
        let value = serde_json::to_value(doc()).unwrap();
        assert_eq!(
            value,
            json!({
                "content": "hello",
                "original_df_index": 4,
                "start_time": 100,
                "end_time": null,
                "message_ids": "[1]"
            })
        );
    }

    #[test]
    fn test_custom_index_field() {
        let mut d = doc();
        d.index_field = "row".to_string();
        let props = d.properties();
        assert_eq!(props.get("row"), Some(&json!(4)));
        assert!(!props.contains_key("original_df_index"));
    }
}
