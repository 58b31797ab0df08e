//! TOML configuration with environment overrides.
//!
//! Every section and field has a default, so an empty file (or no file at
//! all) yields a working local setup:
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:8000"
//!
//! [vector_store]
//! backend = "weaviate"          # or "memory"
//! url = "http://localhost:8080"
//! class_name = "ChatThread"
//!
//! [embedding]
//! provider = "openai"           # or "disabled"
//! model = "text-embedding-3-small"
//!
//! [completion]
//! provider = "openai"           # or "disabled"
//! model = "gpt-4o-mini"
//! reply_language = "Russian"
//!
//! [retrieval]
//! default_top_k = 3
//!
//! [ingest]
//! messages_column = "messages_json"
//! index_field = "original_df_index"
//! ```
//!
//! Environment variables override the file: `WEAVIATE_URL`,
//! `WEAVIATE_CLASS_NAME`, `OPENAI_EMBEDDING_MODEL`, `OPENAI_CHAT_MODEL`,
//! `OPENAI_BASE_URL`. The OpenAI key is only ever read from `OPENAI_API_KEY`.

use anyhow::{bail, Context, Result};
use chat_rag_core::thread::{ExtractOptions, DEFAULT_INDEX_FIELD, DEFAULT_MESSAGES_COLUMN};
use serde::Deserialize;
use std::path::Path;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Upper bound for uploaded files, in megabytes.
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_mb: default_max_upload_mb(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}
fn default_max_upload_mb() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorStoreConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_weaviate_url")]
    pub url: String,
    #[serde(default = "default_class_name")]
    pub class_name: String,
    /// Objects per batch write.
    #[serde(default = "default_store_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_store_timeout_secs")]
    pub timeout_secs: u64,
    /// Timeout of the readiness probe, kept short so `/health` answers fast.
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: default_weaviate_url(),
            class_name: default_class_name(),
            batch_size: default_store_batch_size(),
            timeout_secs: default_store_timeout_secs(),
            ready_timeout_secs: default_ready_timeout_secs(),
        }
    }
}

fn default_backend() -> String {
    "weaviate".to_string()
}
fn default_weaviate_url() -> String {
    "http://localhost:8080".to_string()
}
fn default_class_name() -> String {
    "ChatThread".to_string()
}
fn default_store_batch_size() -> usize {
    100
}
fn default_store_timeout_secs() -> u64 {
    30
}
fn default_ready_timeout_secs() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    /// Texts per embeddings API call.
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            base_url: default_openai_base_url(),
            batch_size: default_embedding_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_openai_base_url() -> String {
    DEFAULT_OPENAI_BASE_URL.to_string()
}
fn default_embedding_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub temperature: f32,
    /// Language the assistant is told to answer in.
    #[serde(default = "default_reply_language")]
    pub reply_language: String,
    #[serde(default = "default_completion_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_chat_model(),
            base_url: default_openai_base_url(),
            temperature: 0.0,
            reply_language: default_reply_language(),
            timeout_secs: default_completion_timeout_secs(),
        }
    }
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_reply_language() -> String {
    "Russian".to_string()
}
fn default_completion_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
    /// Characters of each retrieved document returned as a preview.
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: default_top_k(),
            max_top_k: default_max_top_k(),
            preview_chars: default_preview_chars(),
        }
    }
}

fn default_top_k() -> usize {
    3
}
fn default_max_top_k() -> usize {
    50
}
fn default_preview_chars() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_messages_column")]
    pub messages_column: String,
    #[serde(default = "default_index_field")]
    pub index_field: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            messages_column: default_messages_column(),
            index_field: default_index_field(),
        }
    }
}

impl IngestConfig {
    pub fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            messages_column: self.messages_column.clone(),
            index_field: self.index_field.clone(),
        }
    }
}

fn default_messages_column() -> String {
    DEFAULT_MESSAGES_COLUMN.to_string()
}
fn default_index_field() -> String {
    DEFAULT_INDEX_FIELD.to_string()
}

impl Config {
    /// Applies environment overrides using `lookup` to read variables.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("WEAVIATE_URL") {
            self.vector_store.url = url;
        }
        if let Some(class_name) = lookup("WEAVIATE_CLASS_NAME") {
            self.vector_store.class_name = class_name;
        }
        if let Some(model) = lookup("OPENAI_EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
        if let Some(model) = lookup("OPENAI_CHAT_MODEL") {
            self.completion.model = model;
        }
        if let Some(base_url) = lookup("OPENAI_BASE_URL") {
            self.embedding.base_url = base_url.clone();
            self.completion.base_url = base_url;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.retrieval.default_top_k == 0 {
            bail!("retrieval.default_top_k must be >= 1");
        }
        if self.retrieval.max_top_k < self.retrieval.default_top_k {
            bail!("retrieval.max_top_k must be >= retrieval.default_top_k");
        }
        if self.vector_store.batch_size == 0 {
            bail!("vector_store.batch_size must be > 0");
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
        if !(0.0..=2.0).contains(&self.completion.temperature) {
            bail!("completion.temperature must be in [0.0, 2.0]");
        }
        if self.ingest.messages_column.trim().is_empty() {
            bail!("ingest.messages_column must not be empty");
        }
        if !is_graphql_name(&self.ingest.index_field) {
            bail!(
                "ingest.index_field '{}' must be a GraphQL name ([A-Za-z_][A-Za-z0-9_]*)",
                self.ingest.index_field
            );
        }
        if !is_graphql_name(&self.vector_store.class_name)
            || !self
                .vector_store
                .class_name
                .starts_with(|c: char| c.is_ascii_uppercase())
        {
            bail!(
                "vector_store.class_name '{}' must start with an uppercase letter and \
                 contain only letters, digits and '_'",
                self.vector_store.class_name
            );
        }

        match self.embedding.provider.as_str() {
            "disabled" | "openai" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled or openai.",
                other
            ),
        }

        match self.completion.provider.as_str() {
            "disabled" | "openai" => {}
            other => bail!(
                "Unknown completion provider: '{}'. Must be disabled or openai.",
                other
            ),
        }

        match self.vector_store.backend.as_str() {
            "weaviate" | "memory" => {}
            other => bail!(
                "Unknown vector store backend: '{}'. Must be weaviate or memory.",
                other
            ),
        }

        Ok(())
    }
}

/// Weaviate class and property names are interpolated into GraphQL queries.
fn is_graphql_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Parses and validates a configuration document without touching the
/// environment.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

/// Loads the config file at `path`, applies environment overrides, and
/// validates the result.
///
/// A missing file is not an error: defaults plus environment apply, which
/// is how container deployments run.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        tracing::info!(path = %path.display(), "config file not found, using defaults");
        Config::default()
    };

    config.apply_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}
