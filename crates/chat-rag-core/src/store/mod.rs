//! Vector store abstraction for Chat RAG.
//!
//! The [`VectorStore`] trait covers everything the indexing and query
//! pipelines need from a vector database: schema setup, batched writes of
//! documents with externally computed vectors, nearest-vector retrieval,
//! whole-index deletion, and a readiness probe.
//!
//! Implementations must be `Send + Sync` so a single handle can be shared by
//! every request of an async server.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{BatchOutcome, SearchHit, ThreadDocument};

/// Abstract vector database backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`is_ready`](VectorStore::is_ready) | Liveness/readiness probe |
/// | [`ensure_schema`](VectorStore::ensure_schema) | Create the document schema if missing |
/// | [`add_documents`](VectorStore::add_documents) | Write documents with their vectors |
/// | [`search`](VectorStore::search) | Nearest documents to a query vector |
/// | [`clear`](VectorStore::clear) | Delete the schema and all documents |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Backend name for logs (e.g. `"weaviate"`).
    fn name(&self) -> &str;

    /// Returns `true` when the backend accepts requests.
    async fn is_ready(&self) -> bool;

    /// Creates the document schema unless it already exists.
    async fn ensure_schema(&self) -> Result<()>;

    /// Stores `documents[i]` with `vectors[i]`.
    ///
    /// Individual objects rejected by the backend are counted in
    /// [`BatchOutcome::failed`] rather than failing the call.
    async fn add_documents(
        &self,
        documents: &[ThreadDocument],
        vectors: &[Vec<f32>],
    ) -> Result<BatchOutcome>;

    /// Returns at most `limit` documents, nearest first.
    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<SearchHit>>;

    /// Deletes the schema together with every stored document.
    /// Clearing an absent schema succeeds.
    async fn clear(&self) -> Result<()>;
}
