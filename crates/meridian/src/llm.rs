//! Chat-completion provider interface.
//!
//! Distinct from [`crate::embedding_provider`]: this is the
//! conversational model a pipeline sends a turn to, not the embedding
//! backend the chunk index uses. [`LlmProvider::send_stream`] defaults
//! to calling [`LlmProvider::send`] and replaying its content as one
//! delta — only [`OpenAiChatProvider`] overrides it with true
//! token-by-token streaming.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub tools: Vec<ToolDefinition>,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
}

#[derive(Debug, Clone)]
pub enum StreamEvent {
    TextDelta(String),
    ToolCallRequested(ToolCall),
    Done { tokens_in: u32, tokens_out: u32, stop_reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("parse error: {0}")]
    Parse(String),
    #[error("provider cancelled")]
    Cancelled,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;

    async fn send_stream(&self, req: &ChatRequest, tx: mpsc::Sender<StreamEvent>) -> Result<(), ProviderError> {
        let resp = self.send(req).await?;
        if !resp.content.is_empty() {
            let _ = tx.send(StreamEvent::TextDelta(resp.content)).await;
        }
        for call in resp.tool_calls {
            let _ = tx.send(StreamEvent::ToolCallRequested(call)).await;
        }
        let _ = tx
            .send(StreamEvent::Done { tokens_in: resp.tokens_in, tokens_out: resp.tokens_out, stop_reason: resp.stop_reason })
            .await;
        Ok(())
    }
}

pub struct OpenAiChatProvider {
    model_name: String,
    client: reqwest::Client,
    api_base: String,
}

impl OpenAiChatProvider {
    pub fn new(model_name: String) -> Self {
        let api_base = std::env::var("OPENAI_API_BASE").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        Self { model_name, client: reqwest::Client::new(), api_base }
    }

    fn auth_header(&self) -> String {
        std::env::var("OPENAI_API_KEY").unwrap_or_default()
    }
}

#[async_trait]
impl LlmProvider for OpenAiChatProvider {
    fn name(&self) -> &str {
        &self.model_name
    }

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let body = serde_json::json!({
            "model": req.model,
            "messages": req.messages.iter().map(|m| serde_json::json!({
                "role": match m.role { Role::User => "user", Role::Assistant => "assistant", Role::System => "system" },
                "content": m.content,
            })).collect::<Vec<_>>(),
            "temperature": req.temperature,
            "top_p": req.top_p,
            "max_tokens": req.max_tokens,
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(self.auth_header())
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status: status.as_u16(), message });
        }

        let parsed: OpenAiChatCompletion = resp.json().await.map_err(|e| ProviderError::Parse(e.to_string()))?;
        let choice = parsed.choices.into_iter().next().ok_or_else(|| ProviderError::Parse("no choices returned".to_string()))?;

        Ok(ChatResponse {
            content: choice.message.content,
            tool_calls: Vec::new(),
            stop_reason: choice.finish_reason,
            tokens_in: parsed.usage.prompt_tokens,
            tokens_out: parsed.usage.completion_tokens,
        })
    }
}

#[derive(Deserialize)]
struct OpenAiChatCompletion {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: OpenAiUsage,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
    finish_reason: String,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: String,
}

#[derive(Deserialize, Default)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}
