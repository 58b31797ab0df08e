//! In-memory [`VectorStore`] implementation for tests and local runs.
//!
//! Documents live in a `Vec` behind `std::sync::RwLock`. Search is
//! brute-force cosine distance over every stored vector.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::embedding::cosine_distance;
use crate::models::{BatchOutcome, SearchHit, ThreadDocument};

use super::VectorStore;

struct StoredDocument {
    document: ThreadDocument,
    vector: Vec<f32>,
}

/// In-memory vector store.
pub struct InMemoryStore {
    documents: RwLock<Vec<StoredDocument>>,
    schema_created: AtomicBool,
    ready: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(Vec::new()),
            schema_created: AtomicBool::new(false),
            ready: AtomicBool::new(true),
        }
    }

    /// Toggles the readiness probe result.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Whether [`ensure_schema`](VectorStore::ensure_schema) ran since the last clear.
    pub fn has_schema(&self) -> bool {
        self.schema_created.load(Ordering::SeqCst)
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.documents.read().map(|docs| docs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of stored documents in insertion order.
    pub fn documents(&self) -> Vec<ThreadDocument> {
        self.documents
            .read()
            .map(|docs| docs.iter().map(|s| s.document.clone()).collect())
            .unwrap_or_default()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_created.store(true, Ordering::SeqCst);
        Ok(())
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
        let mut stored = self
            .documents
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))?;
        for (document, vector) in documents.iter().zip(vectors) {
            stored.push(StoredDocument {
                document: document.clone(),
                vector: vector.clone(),
            });
        }
        Ok(BatchOutcome {
            stored: documents.len(),
            failed: 0,
        })
    }

    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<SearchHit>> {
        let stored = self
            .documents
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))?;
        let mut hits: Vec<SearchHit> = stored
            .iter()
            .map(|s| SearchHit {
                content: s.document.content.clone(),
                row_index: i64::try_from(s.document.row_index).ok(),
                start_time: s.document.start_time,
                end_time: s.document.end_time,
                message_ids: Some(s.document.message_ids.clone()),
                distance: Some(cosine_distance(vector, &s.vector)),
            })
            .collect();
        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn clear(&self) -> Result<()> {
        self.documents
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))?
            .clear();
        self.schema_created.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(row_index: usize, content: &str) -> ThreadDocument {
        ThreadDocument {
            content: content.to_string(),
            index_field: "original_df_index".to_string(),
            row_index,
            start_time: None,
            end_time: None,
            message_ids: "[]".to_string(),
        }
    }

    #[tokio::test]
    async fn test_search_orders_by_distance() {
        let store = InMemoryStore::new();
        store.ensure_schema().await.unwrap();
        store
            .add_documents(
                &[doc(0, "east"), doc(1, "north"), doc(2, "north-east")],
                &[vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]],
            )
            .await
            .unwrap();

        let hits = store.search(&[0.0, 1.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].content, "north");
        assert_eq!(hits[0].row_index, Some(1));
        assert_eq!(hits[1].content, "north-east");
        assert!(hits[0].distance.unwrap() < hits[1].distance.unwrap());
    }

    #[tokio::test]
    async fn test_add_rejects_mismatched_vectors() {
        let store = InMemoryStore::new();
        let err = store.add_documents(&[doc(0, "a")], &[]).await.unwrap_err();
        assert!(err.to_string().contains("1 documents but 0 vectors"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_clear_removes_everything() {
        let store = InMemoryStore::new();
        store.ensure_schema().await.unwrap();
        store
            .add_documents(&[doc(0, "a")], &[vec![1.0]])
            .await
            .unwrap();
        assert_eq!(store.len(), 1);

        store.clear().await.unwrap();
        assert!(store.is_empty());
        assert!(!store.has_schema());
        // Clearing twice is fine
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_readiness_toggle() {
        let store = InMemoryStore::new();
        assert!(store.is_ready().await);
        store.set_ready(false);
        assert!(!store.is_ready().await);
    }
}
