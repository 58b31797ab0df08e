//! Chat completion for grounded answers.
//!
//! [`build_messages`] renders the system and user turns; [`answer_question`]
//! sends them to a [`ChatModel`] and never fails: provider errors degrade to
//! a fixed apology so a broken completion backend does not break `/query`.
//! [`create_chat_model`] picks the backend from `[completion] provider`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::Serialize;

use crate::config::CompletionConfig;

/// Returned when the completion call fails.
pub const APOLOGY: &str = "Sorry, I encountered an error while generating a response.";

/// Returned when the model answers with empty content.
pub const EMPTY_COMPLETION: &str = "No response received.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Builds the conversation for `prompt`, grounding it in `context` when one
/// is given. An empty context counts as none.
pub fn build_messages(
    prompt: &str,
    context: Option<&str>,
    reply_language: &str,
) -> Vec<ChatMessage> {
    let system = match context.filter(|c| !c.is_empty()) {
        Some(context) => format!(
            "You are a helpful assistant. Wrap up based the following context and answer \
             the user's question in a detailed, nuanced and helpful way:\n\n{}\n\n\
             If the context doesn't provide an answer, say you don't know. Reply in {}.",
            context, reply_language
        ),
        None => format!("You are a helpful assistant. Reply in {}.", reply_language),
    };
    vec![ChatMessage::system(system), ChatMessage::user(prompt)]
}

/// A chat completion backend.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Returns the assistant's reply, possibly empty.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Asks `model` to answer `prompt`, falling back to fixed replies on empty
/// output or failure.
pub async fn answer_question(
    model: &dyn ChatModel,
    prompt: &str,
    context: Option<&str>,
    reply_language: &str,
) -> String {
    let messages = build_messages(prompt, context, reply_language);
    match model.complete(&messages).await {
        Ok(content) => {
            let content = content.trim();
            if content.is_empty() {
                EMPTY_COMPLETION.to_string()
            } else {
                content.to_string()
            }
        }
        Err(e) => {
            tracing::error!(model = model.model_name(), error = %e, "chat completion failed");
            APOLOGY.to_string()
        }
    }
}

/// Chat model used when `[completion] provider = "disabled"`; every call
/// fails, so answers degrade to [`APOLOGY`].
pub struct DisabledChatModel;

#[async_trait]
impl ChatModel for DisabledChatModel {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
        bail!("Completion provider is disabled. Set [completion] provider = \"openai\" in config.")
    }
}

/// Picks the chat model named by `config.provider`.
pub fn create_chat_model(config: &CompletionConfig) -> Result<Arc<dyn ChatModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledChatModel)),
        "openai" => Ok(Arc::new(OpenAIChatModel::new(config)?)),
        other => bail!("Unknown completion provider: '{}'", other),
    }
}

/// Chat model backed by `POST {base_url}/chat/completions`.
pub struct OpenAIChatModel {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
}

impl OpenAIChatModel {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &CompletionConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAIChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("OpenAI API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        let content = json
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .unwrap_or_default();
        Ok(content.to_string())
    }
}
