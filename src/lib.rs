//! # Chat RAG
//!
//! Retrieval-augmented question answering over exported chat threads.
//!
//! Uploaded tables (CSV or Parquet) carry one chat thread per row in a
//! `messages_json` column. Each non-empty thread becomes one document that is
//! embedded, stored in a vector index, and later retrieved as context for a
//! chat-completion answer.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌──────────┐   ┌────────────┐
//! │  Loader  │──▶│ Extractor │──▶│ Embedder │──▶│  Weaviate  │
//! │ CSV/Parq │   │ (core)    │   │ (OpenAI) │   │ / memory   │
//! └──────────┘   └───────────┘   └──────────┘   └─────┬──────┘
//!                                                     │
//!                      ┌──────────────────────────────┤
//!                      ▼                              ▼
//!                 ┌──────────┐                  ┌──────────┐
//!                 │   CLI    │                  │   HTTP   │
//!                 │(chat-rag)│                  │  (axum)  │
//!                 └──────────┘                  └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`logging`] | Tracing subscriber setup |
//! | [`loader`] | CSV / Parquet decoding into a row table |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`completion`] | Chat completion and prompt construction |
//! | [`weaviate`] | Weaviate vector store |
//! | [`pipeline`] | Indexing and retrieval-augmented answering |
//! | [`server`] | HTTP API |
//!
//! Thread extraction, the row table, and the [`VectorStore`](chat_rag_core::store::VectorStore)
//! trait live in the `chat-rag-core` crate.

pub mod completion;
pub mod config;
pub mod embedding;
pub mod loader;
pub mod logging;
pub mod pipeline;
pub mod server;
pub mod weaviate;
