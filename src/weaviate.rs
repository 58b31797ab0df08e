//! [`VectorStore`] backed by a Weaviate instance over its REST and GraphQL API.
//!
//! The class is created on demand with `vectorizer: none`; vectors always
//! come from the configured [`Embedder`](crate::embedding::Embedder).
//!
//! | Operation | Request |
//! |-----------|---------|
//! | readiness | `GET /v1/.well-known/ready` |
//! | schema | `GET /v1/schema/{class}`, then `POST /v1/schema` on 404 |
//! | write | `POST /v1/batch/objects` |
//! | search | `POST /v1/graphql` with a `nearVector` query |
//! | clear | `DELETE /v1/schema/{class}` |

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chat_rag_core::models::{BatchOutcome, SearchHit, ThreadDocument};
use chat_rag_core::store::VectorStore;
use reqwest::StatusCode;
use serde_json::{json, Map, Value};

use crate::config::VectorStoreConfig;

pub struct WeaviateStore {
    client: reqwest::Client,
    base_url: String,
    class_name: String,
    index_field: String,
    ready_timeout: Duration,
}

impl WeaviateStore {
    pub fn new(config: &VectorStoreConfig, index_field: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            class_name: config.class_name.clone(),
            index_field: index_field.to_string(),
            ready_timeout: Duration::from_secs(config.ready_timeout_secs),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Weaviate rejects `Get` on a class that was never created (or was
    /// cleared) with a GraphQL validation error naming the class.
    fn is_missing_class_error(&self, message: &str) -> bool {
        message.contains(&format!("Cannot query field \"{}\"", self.class_name))
    }

    /// Class definition with the five thread properties.
    pub fn class_definition(&self) -> Value {
        json!({
            "class": self.class_name,
            "vectorizer": "none",
            "properties": [
                {
                    "name": "content",
                    "dataType": ["text"],
                    "description": "The concatenated text of the chat thread"
                },
                {
                    "name": self.index_field,
                    "dataType": ["int"],
                    "description": "Original row index in the uploaded table"
                },
                {
                    "name": "start_time",
                    "dataType": ["int"],
                    "description": "Unixtime of the first message in the thread"
                },
                {
                    "name": "end_time",
                    "dataType": ["int"],
                    "description": "Unixtime of the last message in the thread"
                },
                {
                    "name": "message_ids",
                    "dataType": ["text"],
                    "description": "JSON array of message IDs in the thread"
                }
            ]
        })
    }

    /// GraphQL `Get` query for the `limit` nearest neighbours of `vector`.
    pub fn near_vector_query(&self, vector: &[f32], limit: usize) -> Result<String> {
        let vector = serde_json::to_string(vector)?;
        Ok(format!(
            "{{ Get {{ {class}(nearVector: {{vector: {vector}}}, limit: {limit}) \
             {{ content {index} start_time end_time message_ids _additional {{ distance }} }} }} }}",
            class = self.class_name,
            vector = vector,
            limit = limit,
            index = self.index_field,
        ))
    }
}

/// Converts one GraphQL result object into a [`SearchHit`].
pub fn hit_from_json(value: &Value, index_field: &str) -> SearchHit {
    SearchHit {
        content: value
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        row_index: value.get(index_field).and_then(Value::as_i64),
        start_time: value.get("start_time").and_then(Value::as_i64),
        end_time: value.get("end_time").and_then(Value::as_i64),
        message_ids: value
            .get("message_ids")
            .and_then(Value::as_str)
            .map(str::to_string),
        distance: value.pointer("/_additional/distance").and_then(Value::as_f64),
    }
}

/// Object properties with `null` values removed; Weaviate rejects nulls on
/// typed properties.
fn object_properties(document: &ThreadDocument) -> Map<String, Value> {
    document
        .properties()
        .into_iter()
        .filter(|(_, value)| !value.is_null())
        .collect()
}

async fn error_text(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    format!("Weaviate error {}: {}", status, body)
}

#[async_trait]
impl VectorStore for WeaviateStore {
    fn name(&self) -> &str {
        "weaviate"
    }

    async fn is_ready(&self) -> bool {
        let response = self
            .client
            .get(self.url("/v1/.well-known/ready"))
            .timeout(self.ready_timeout)
            .send()
            .await;
        match response {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::warn!(url = %self.base_url, error = %e, "weaviate readiness probe failed");
                false
            }
        }
    }

    async fn ensure_schema(&self) -> Result<()> {
        let response = self
            .client
            .get(self.url(&format!("/v1/schema/{}", self.class_name)))
            .send()
            .await
            .context("failed to read weaviate schema")?;

        match response.status() {
            status if status.is_success() => {
                tracing::debug!(class = %self.class_name, "schema already exists");
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                let response = self
                    .client
                    .post(self.url("/v1/schema"))
                    .json(&self.class_definition())
                    .send()
                    .await
                    .context("failed to create weaviate class")?;
                if !response.status().is_success() {
                    bail!(error_text(response).await);
                }
                tracing::info!(class = %self.class_name, "schema created");
                Ok(())
            }
            _ => bail!(error_text(response).await),
        }
    }

    async fn add_documents(
        &self,
        documents: &[ThreadDocument],
        vectors: &[Vec<f32>],
    ) -> Result<BatchOutcome> {
        if documents.len() != vectors.len() {
            bail!(
                "got {} documents but {} vectors",
                documents.len(),
                vectors.len()
            );
        }
        if documents.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let objects: Vec<Value> = documents
            .iter()
            .zip(vectors)
            .map(|(document, vector)| {
                json!({
                    "class": self.class_name,
                    "id": uuid::Uuid::new_v4().to_string(),
                    "properties": object_properties(document),
                    "vector": vector,
                })
            })
            .collect();

        let response = self
            .client
            .post(self.url("/v1/batch/objects"))
            .json(&json!({ "objects": objects }))
            .send()
            .await
            .context("failed to send weaviate batch")?;
        if !response.status().is_success() {
            bail!(error_text(response).await);
        }

        let results: Vec<Value> = response.json().await?;
        let mut outcome = BatchOutcome::default();
        for result in &results {
            match result.pointer("/result/errors/error").and_then(Value::as_array) {
                Some(errors) if !errors.is_empty() => {
                    outcome.failed += 1;
                    let message = errors
                        .first()
                        .and_then(|e| e.get("message"))
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error");
                    tracing::warn!(class = %self.class_name, %message, "object rejected by weaviate");
                }
                _ => outcome.stored += 1,
            }
        }
        Ok(outcome)
    }

    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<SearchHit>> {
        let query = self.near_vector_query(vector, limit)?;
        let response = self
            .client
            .post(self.url("/v1/graphql"))
            .json(&json!({ "query": query }))
            .send()
            .await
            .context("failed to query weaviate")?;
        if !response.status().is_success() {
            bail!(error_text(response).await);
        }

        let body: Value = response.json().await?;
        if let Some(errors) = body.get("errors").and_then(Value::as_array) {
            if !errors.is_empty() {
                let message = errors
                    .iter()
                    .filter_map(|e| e.get("message").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("; ");
                if self.is_missing_class_error(&message) {
                    tracing::info!(class = %self.class_name, "class does not exist yet, no hits");
                    return Ok(Vec::new());
                }
                return Err(anyhow!("Weaviate GraphQL error: {}", message));
            }
        }

        let hits = body
            .pointer(&format!("/data/Get/{}", self.class_name))
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|item| hit_from_json(item, &self.index_field))
                    .collect()
            })
            .unwrap_or_default();
        Ok(hits)
    }

    async fn clear(&self) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("/v1/schema/{}", self.class_name)))
            .send()
            .await
            .context("failed to delete weaviate class")?;
        match response.status() {
            status if status.is_success() => {
                tracing::info!(class = %self.class_name, "class and all its data deleted");
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                tracing::info!(class = %self.class_name, "class does not exist, nothing to delete");
                Ok(())
            }
            _ => bail!(error_text(response).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> WeaviateStore {
        WeaviateStore::new(&VectorStoreConfig::default(), "original_df_index").unwrap()
    }

    #[test]
    fn test_missing_class_error_detection() {
        let store = store();
        assert!(store.is_missing_class_error(
            "Cannot query field \"ChatThread\" on type \"GetObjectsObj\"."
        ));
        assert!(!store.is_missing_class_error(
            "Cannot query field \"Other\" on type \"GetObjectsObj\"."
        ));
        assert!(!store.is_missing_class_error("vector lengths don't match"));
    }

    #[test]
    fn test_class_definition() {
        let class = store().class_definition();
        assert_eq!(class["class"], "ChatThread");
        assert_eq!(class["vectorizer"], "none");
        let names: Vec<&str> = class["properties"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["name"].as_str().unwrap())
            .collect();
        assert_eq!(
            names,
            ["content", "original_df_index", "start_time", "end_time", "message_ids"]
        );
    }

    #[test]
    fn test_near_vector_query() {
        let query = store().near_vector_query(&[0.5, 1.0], 3).unwrap();
        assert!(query.contains("ChatThread(nearVector: {vector: [0.5,1.0]}, limit: 3)"));
        assert!(query.contains("original_df_index"));
        assert!(query.contains("_additional { distance }"));
    }

    #[test]
    fn test_hit_from_json() {
        let item = json!({
            "content": "hello",
            "original_df_index": 7,
            "start_time": 100,
            "end_time": null,
            "message_ids": "[1, 2]",
            "_additional": {"distance": 0.25}
        });
        let hit = hit_from_json(&item, "original_df_index");
        assert_eq!(hit.content, "hello");
        assert_eq!(hit.row_index, Some(7));
        assert_eq!(hit.start_time, Some(100));
        assert_eq!(hit.end_time, None);
        assert_eq!(hit.message_ids.as_deref(), Some("[1, 2]"));
        assert_eq!(hit.distance, Some(0.25));
    }

    #[test]
    fn test_object_properties_drop_nulls() {
        let document = ThreadDocument {
            content: "a".to_string(),
            index_field: "original_df_index".to_string(),
            row_index: 0,
            start_time: None,
            end_time: Some(5),
            message_ids: "[]".to_string(),
        };
        let props = object_properties(&document);
        assert!(!props.contains_key("start_time"));
        assert_eq!(props.get("end_time"), Some(&json!(5)));
    }
}
