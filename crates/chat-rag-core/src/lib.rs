//! # Chat RAG Core
//!
//! Shared, I/O-free logic for Chat RAG: the row table handed in by loaders,
//! thread extraction, document models, the vector store abstraction, and
//! vector helpers.
//!
//! This crate contains no tokio, HTTP clients, or filesystem access. The
//! application crate supplies materialized tables and concrete store and
//! provider implementations.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`table`] | In-memory rows of JSON cells |
//! | [`thread`] | Message parsing, text normalization, thread aggregation |
//! | [`models`] | Documents and search hits |
//! | [`store`] | [`VectorStore`](store::VectorStore) trait and in-memory backend |
//! | [`embedding`] | Vector similarity helpers |

pub mod embedding;
pub mod models;
pub mod store;
pub mod table;
pub mod thread;
