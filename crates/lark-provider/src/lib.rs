mod openai_compat;

pub use openai_compat::{openrouter, OpenAiCompatClient};

use async_trait::async_trait;
use lark_schema::{Message, Role};
use thiserror::Error;

/// Failure talking to the model backend. Decode failures of the *reply
/// text* are not represented here — that is interpreter territory; these
/// are transport- and envelope-level faults only.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm api error ({status}): {message}")]
    Upstream { status: u16, message: String },
    #[error("llm network error: {0}")]
    Network(String),
    #[error("llm response malformed: {0}")]
    Malformed(String),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Upstream { status, .. } => *status == 429 || (500..=599).contains(status),
            LlmError::Network(_) => true,
            LlmError::Malformed(_) => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
}

fn default_max_tokens() -> u32 {
    1024
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, system: Option<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            system,
            messages,
            max_tokens: default_max_tokens(),
        }
    }
}

/// Stateless request/response client for a language-model backend. No
/// internal retries; callers own retry policy. Implementations must not
/// mutate the request.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError>;
}

/// Offline client for tests and keyless runs: echoes the last user message.
pub struct StubClient;

#[async_trait]
impl LlmClient for StubClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(format!("[stub:{}] {}", request.model, last_user))
    }
}
