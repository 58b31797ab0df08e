//! Indexing and retrieval-augmented answering.
//!
//! Both the HTTP server and the CLI go through these functions, with the
//! providers injected as trait objects held in [`Services`].

use std::sync::Arc;

use anyhow::{Context, Result};
use chat_rag_core::models::{SearchHit, ThreadDocument};
use chat_rag_core::store::memory::InMemoryStore;
use chat_rag_core::store::VectorStore;
use chat_rag_core::table::Table;
use chat_rag_core::thread::{prepare_documents, ExtractOptions};
use serde::Serialize;

use crate::completion::{answer_question, create_chat_model, ChatModel};
use crate::config::{Config, VectorStoreConfig};
use crate::embedding::{create_embedder, embed_query, Embedder};
use crate::weaviate::WeaviateStore;

/// Answer returned when retrieval finds nothing; the chat model is not called.
pub const NO_CONTEXT_ANSWER: &str =
    "No relevant context found in the indexed chats to answer your question.";

const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Provider handles shared by every request.
///
/// `store` is `None` when the vector store was not ready at startup.
#[derive(Clone)]
pub struct Services {
    pub embedder: Arc<dyn Embedder>,
    pub chat: Arc<dyn ChatModel>,
    pub store: Option<Arc<dyn VectorStore>>,
}

impl Services {
    /// Builds providers from configuration and probes the vector store.
    pub async fn connect(config: &Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let chat = create_chat_model(&config.completion)?;
        let store = connect_store(config).await?;
        Ok(Self {
            embedder,
            chat,
            store,
        })
    }
}

/// Instantiates the configured vector store backend without probing it.
pub fn create_store(config: &VectorStoreConfig, index_field: &str) -> Result<Arc<dyn VectorStore>> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(InMemoryStore::new())),
        "weaviate" => Ok(Arc::new(WeaviateStore::new(config, index_field)?)),
        other => anyhow::bail!("Unknown vector store backend: '{}'", other),
    }
}

/// Creates the store and returns it only if its readiness probe passes.
pub async fn connect_store(config: &Config) -> Result<Option<Arc<dyn VectorStore>>> {
    let store = create_store(&config.vector_store, &config.ingest.index_field)?;
    if store.is_ready().await {
        tracing::info!(
            backend = store.name(),
            url = %config.vector_store.url,
            "vector store ready"
        );
        Ok(Some(store))
    } else {
        tracing::warn!(
            backend = store.name(),
            url = %config.vector_store.url,
            "vector store not ready; store-dependent operations are unavailable"
        );
        Ok(None)
    }
}

/// Counters for one indexing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    /// Rows in the uploaded table.
    pub rows: usize,
    /// Thread documents extracted from those rows.
    pub documents: usize,
    pub indexed: usize,
    pub failed: usize,
}

/// Batch sizes for [`index_documents`].
#[derive(Debug, Clone, Copy)]
pub struct BatchSizes {
    pub embedding: usize,
    pub store: usize,
}

/// Extracts thread documents from `table` and indexes them.
pub async fn index_table(
    store: &dyn VectorStore,
    embedder: &dyn Embedder,
    table: &Table,
    options: &ExtractOptions,
    sizes: BatchSizes,
) -> Result<IndexReport> {
    let documents = prepare_documents(table, options)?;
    tracing::info!(
        rows = table.len(),
        documents = documents.len(),
        "prepared thread documents"
    );
    let mut report = index_documents(store, embedder, &documents, sizes).await?;
    report.rows = table.len();
    Ok(report)
}

/// Embeds and stores `documents`, creating the schema first.
///
/// A failed embedding call marks its batch as failed and moves on; store
/// errors abort the run.
pub async fn index_documents(
    store: &dyn VectorStore,
    embedder: &dyn Embedder,
    documents: &[ThreadDocument],
    sizes: BatchSizes,
) -> Result<IndexReport> {
    store
        .ensure_schema()
        .await
        .context("failed to prepare vector store schema")?;

    let mut report = IndexReport {
        documents: documents.len(),
        ..Default::default()
    };
    if documents.is_empty() {
        return Ok(report);
    }

    for store_batch in documents.chunks(sizes.store.max(1)) {
        let mut ready_docs = Vec::with_capacity(store_batch.len());
        let mut vectors = Vec::with_capacity(store_batch.len());

        for embed_batch in store_batch.chunks(sizes.embedding.max(1)) {
            let texts: Vec<String> = embed_batch.iter().map(|d| d.content.clone()).collect();
            match embedder.embed(&texts).await {
                Ok(batch_vectors) => {
                    ready_docs.extend(embed_batch.iter().cloned());
                    vectors.extend(batch_vectors);
                }
                Err(e) => {
                    tracing::warn!(
                        documents = embed_batch.len(),
                        first_row = embed_batch[0].row_index,
                        error = %e,
                        "embedding batch failed"
                    );
                    report.failed += embed_batch.len();
                }
            }
        }

        if ready_docs.is_empty() {
            continue;
        }
        let outcome = store
            .add_documents(&ready_docs, &vectors)
            .await
            .context("failed to write documents to vector store")?;
        report.indexed += outcome.stored;
        report.failed += outcome.failed;
        tracing::info!(
            indexed = report.indexed,
            total = report.documents,
            "indexing progress"
        );
    }

    if report.failed > 0 {
        tracing::warn!(failed = report.failed, "some documents were not indexed");
    }
    Ok(report)
}

/// Drops every indexed thread along with the store's schema.
pub async fn clear_index(store: &dyn VectorStore) -> Result<()> {
    store
        .clear()
        .await
        .context("failed to clear vector store")?;
    tracing::info!(backend = store.name(), "index cleared");
    Ok(())
}

/// One retrieved document as shown to API clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedContext {
    pub content_preview: String,
    #[serde(rename = "original_df_index")]
    pub row_index: Option<i64>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub message_ids: Option<String>,
    pub distance: Option<f64>,
}

impl RetrievedContext {
    pub fn from_hit(hit: &SearchHit, preview_chars: usize) -> Self {
        Self {
            content_preview: preview(&hit.content, preview_chars),
            row_index: hit.row_index,
            start_time: hit.start_time,
            end_time: hit.end_time,
            message_ids: hit.message_ids.clone(),
            distance: hit.distance,
        }
    }
}

/// First `max_chars` characters of `content`, with `...` appended when cut.
pub fn preview(content: &str, max_chars: usize) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub answer: String,
    pub retrieved_contexts: Vec<RetrievedContext>,
}

/// Per-query settings.
#[derive(Debug, Clone, Copy)]
pub struct QueryOptions<'a> {
    pub top_k: usize,
    pub preview_chars: usize,
    pub reply_language: &'a str,
}

/// Retrieves the `top_k` nearest threads and asks the chat model to answer
/// from them.
pub async fn ask(
    services: &Services,
    store: &dyn VectorStore,
    query: &str,
    options: QueryOptions<'_>,
) -> Result<Answer> {
    let vector = embed_query(services.embedder.as_ref(), query)
        .await
        .context("failed to embed query")?;
    let hits = store
        .search(&vector, options.top_k)
        .await
        .context("vector search failed")?;
    tracing::info!(hits = hits.len(), top_k = options.top_k, "retrieved contexts");

    if hits.is_empty() {
        return Ok(Answer {
            answer: NO_CONTEXT_ANSWER.to_string(),
            retrieved_contexts: Vec::new(),
        });
    }

    let context = hits
        .iter()
        .map(|hit| hit.content.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR);
    let answer = answer_question(
        services.chat.as_ref(),
        query,
        Some(&context),
        options.reply_language,
    )
    .await;

    Ok(Answer {
        answer,
        retrieved_contexts: hits
            .iter()
            .map(|hit| RetrievedContext::from_hit(hit, options.preview_chars))
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::ChatMessage;
    use async_trait::async_trait;
    use chat_rag_core::thread::DEFAULT_MESSAGES_COLUMN;
    use serde_json::json;
    use std::sync::Mutex;

    /// Two-dimensional vectors: (letter count, 1.0).
    struct LengthEmbedder {
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl Embedder for LengthEmbedder {
        fn model_name(&self) -> &str {
            "length"
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if let Some(marker) = self.fail_on {
                if texts.iter().any(|t| t.contains(marker)) {
                    anyhow::bail!("provider rejected batch");
                }
            }
            Ok(texts
                .iter()
                .map(|t| vec![t.chars().count() as f32, 1.0])
                .collect())
        }
    }

    #[derive(Default)]
    struct RecordingChat {
        calls: Mutex<Vec<Vec<ChatMessage>>>,
    }

    #[async_trait]
    impl ChatModel for RecordingChat {
        fn model_name(&self) -> &str {
            "recording"
        }

        async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
            self.calls.lock().unwrap().push(messages.to_vec());
            Ok("grounded answer".to_string())
        }
    }

    fn table(cells: Vec<serde_json::Value>) -> Table {
        Table::from_column(DEFAULT_MESSAGES_COLUMN, cells)
    }

    fn sizes() -> BatchSizes {
        BatchSizes {
            embedding: 2,
            store: 100,
        }
    }

    #[test]
    fn test_preview_truncates_on_chars() {
        assert_eq!(preview("привет", 3), "при...");
        assert_eq!(preview("hi", 3), "hi");
        assert_eq!(preview("abc", 3), "abc");
    }

    #[tokio::test]
    async fn test_connect_without_providers_needs_no_api_key() {
        let mut config = Config::default();
        config.vector_store.backend = "memory".to_string();
        config.embedding.provider = "disabled".to_string();
        config.completion.provider = "disabled".to_string();

        let services = Services::connect(&config).await.unwrap();
        assert_eq!(services.embedder.model_name(), "disabled");
        assert_eq!(services.chat.model_name(), "disabled");
        assert!(services.store.is_some());
    }

    #[tokio::test]
    async fn test_index_table_counts() {
        let store = InMemoryStore::new();
        let embedder = LengthEmbedder { fail_on: None };
        let t = table(vec![
            json!(r#"[{"id": 1, "text": "first thread"}]"#),
            json!("not json"),
            json!(r#"[{"id": 2, "text": "  "}]"#),
            json!(r#"[{"id": 3, "text": "second"}, {"id": 4, "text": "reply"}]"#),
        ]);

        let report = index_table(&store, &embedder, &t, &ExtractOptions::default(), sizes())
            .await
            .unwrap();

        assert_eq!(
            report,
            IndexReport {
                rows: 4,
                documents: 2,
                indexed: 2,
                failed: 0
            }
        );
        assert!(store.has_schema());
        let rows: Vec<usize> = store.documents().iter().map(|d| d.row_index).collect();
        assert_eq!(rows, vec![0, 3]);
    }

    #[tokio::test]
    async fn test_failed_embedding_batch_is_counted() {
        let store = InMemoryStore::new();
        let embedder = LengthEmbedder {
            fail_on: Some("poison"),
        };
        let docs: Vec<ThreadDocument> = ["a", "poison", "c"]
            .iter()
            .enumerate()
            .map(|(i, text)| ThreadDocument {
                content: text.to_string(),
                index_field: "original_df_index".to_string(),
                row_index: i,
                start_time: None,
                end_time: None,
                message_ids: "[]".to_string(),
            })
            .collect();

        let report = index_documents(&store, &embedder, &docs, sizes()).await.unwrap();
        // First embedding batch ("a", "poison") fails as a whole.
        assert_eq!(report.indexed, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(store.documents()[0].content, "c");
    }

    #[tokio::test]
    async fn test_missing_column_is_error() {
        let store = InMemoryStore::new();
        let embedder = LengthEmbedder { fail_on: None };
        let t = Table::from_column("other_col", vec![json!("test")]);
        let err = index_table(&store, &embedder, &t, &ExtractOptions::default(), sizes())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("'messages_json'"));
    }

    #[tokio::test]
    async fn test_ask_without_hits_skips_model() {
        let store = InMemoryStore::new();
        let chat = Arc::new(RecordingChat::default());
        let services = Services {
            embedder: Arc::new(LengthEmbedder { fail_on: None }),
            chat: chat.clone(),
            store: None,
        };
        let options = QueryOptions {
            top_k: 3,
            preview_chars: 500,
            reply_language: "Russian",
        };

        let answer = ask(&services, &store, "anything", options).await.unwrap();
        assert_eq!(answer.answer, NO_CONTEXT_ANSWER);
        assert!(answer.retrieved_contexts.is_empty());
        assert!(chat.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ask_joins_contexts() {
        let store = InMemoryStore::new();
        let embedder = Arc::new(LengthEmbedder { fail_on: None });
        let t = table(vec![
            json!(r#"[{"text": "rent is 400$"}]"#),
            json!(r#"[{"text": "plumber"}]"#),
        ]);
        index_table(&store, embedder.as_ref(), &t, &ExtractOptions::default(), sizes())
            .await
            .unwrap();

        let chat = Arc::new(RecordingChat::default());
        let services = Services {
            embedder,
            chat: chat.clone(),
            store: None,
        };
        let options = QueryOptions {
            top_k: 2,
            preview_chars: 4,
            reply_language: "Russian",
        };
        let answer = ask(&services, &store, "rent?", options).await.unwrap();

        assert_eq!(answer.answer, "grounded answer");
        assert_eq!(answer.retrieved_contexts.len(), 2);
        assert!(answer
            .retrieved_contexts
            .iter()
            .all(|c| c.content_preview.ends_with("...")));

        let calls = chat.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let system = &calls[0][0].content;
        assert!(system.contains("\n\n---\n\n"));
        assert!(system.contains("rent is 400$"));
        assert!(system.contains("plumber"));
        assert_eq!(calls[0][1].content, "rent?");
    }

    #[tokio::test]
    async fn test_clear_index_empties_store() {
        let store = InMemoryStore::new();
        let embedder = LengthEmbedder { fail_on: None };
        let t = table(vec![json!(r#"[{"text": "hello"}]"#)]);
        index_table(&store, &embedder, &t, &ExtractOptions::default(), sizes())
            .await
            .unwrap();
        assert_eq!(store.len(), 1);

        clear_index(&store).await.unwrap();
        assert!(store.is_empty());
        assert!(!store.has_schema());
    }

    #[test]
    fn test_retrieved_context_json_shape() {
        let hit = SearchHit {
            content: "hello".to_string(),
            row_index: Some(2),
            start_time: Some(1),
            end_time: Some(9),
            message_ids: Some("[1]".to_string()),
            distance: Some(0.5),
        };
        let value = serde_json::to_value(RetrievedContext::from_hit(&hit, 500)).unwrap();
        assert_eq!(value["original_df_index"], 2);
        assert_eq!(value["content_preview"], "hello");
        assert_eq!(value["distance"], 0.5);
    }
}
