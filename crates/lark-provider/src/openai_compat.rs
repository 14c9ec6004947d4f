use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::{CompletionRequest, LlmClient, LlmError};

/// Chat-completions client for any OpenAI-compatible backend.
#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
}

/// OpenRouter - multi-model router, OpenAI compatible
/// https://openrouter.ai/docs
pub fn openrouter(api_key: impl Into<String>) -> OpenAiCompatClient {
    OpenAiCompatClient::new(api_key, "https://openrouter.ai/api/v1")
}

impl OpenAiCompatClient {
    pub fn new(api_key: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_env(api_key_env: &str, api_base: impl Into<String>) -> Result<Self> {
        let api_key =
            std::env::var(api_key_env).map_err(|_| anyhow!("{api_key_env} is not set"))?;
        Ok(Self::new(api_key, api_base))
    }

    pub(crate) fn to_api_request(request: &CompletionRequest) -> ApiRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system {
            messages.push(ApiMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        for message in &request.messages {
            messages.push(ApiMessage {
                role: message.role.as_str().to_string(),
                content: message.content.clone(),
            });
        }
        ApiRequest {
            model: request.model.clone(),
            messages,
            max_tokens: request.max_tokens,
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.api_base);
        let payload = Self::to_api_request(&request);
        tracing::debug!(model = %request.model, messages = payload.messages.len(), "dispatching chat completion");

        let resp = match self
            .client
            .post(url)
            .header("authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&payload)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return Err(LlmError::Network(
                    "request timed out after 60s".to_string(),
                ));
            }
            Err(e) if e.is_connect() => {
                return Err(LlmError::Network(e.to_string()));
            }
            Err(e) => return Err(LlmError::Network(e.to_string())),
        };

        let status = resp.status();
        if status != StatusCode::OK {
            let text = resp
                .text()
                .await
                .map_err(|e| LlmError::Network(e.to_string()))?;
            let message = serde_json::from_str::<ApiErrorEnvelope>(&text)
                .map(|envelope| envelope.error.message)
                .unwrap_or(text);
            return Err(LlmError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let body: ApiResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;
        extract_reply(body)
    }
}

fn extract_reply(body: ApiResponse) -> Result<String, LlmError> {
    let choice = body
        .choices
        .first()
        .ok_or_else(|| LlmError::Malformed("empty choices".to_string()))?;
    choice
        .message
        .content
        .clone()
        .filter(|content| !content.is_empty())
        .ok_or_else(|| LlmError::Malformed("reply content missing".to_string()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiRequest {
    pub model: String,
    pub messages: Vec<ApiMessage>,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiResponse {
    pub choices: Vec<ApiChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiChoice {
    pub message: ApiAssistantMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiAssistantMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiErrorEnvelope {
    pub error: ApiErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiErrorBody {
    pub message: String,
    #[serde(rename = "type", default)]
    pub r#type: Option<String>,
}
