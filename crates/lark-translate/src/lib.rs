//! Pass-through to an external translation service. A failed translation
//! falls back to the source text, so callers always get something usable.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate `text` into `target_language`; on any failure the source
    /// text comes back unchanged.
    async fn translate(&self, text: &str, target_language: &str) -> String;
}

/// Client for a Google-Translate-v2-style endpoint.
#[derive(Debug, Clone)]
pub struct HttpTranslator {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
}

pub const GOOGLE_TRANSLATE_BASE: &str = "https://translation.googleapis.com/language/translate/v2";

impl HttpTranslator {
    pub fn new(api_key: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_env(api_key_env: &str) -> Result<Self> {
        let api_key =
            std::env::var(api_key_env).map_err(|_| anyhow!("{api_key_env} is not set"))?;
        Ok(Self::new(api_key, GOOGLE_TRANSLATE_BASE))
    }

    async fn try_translate(&self, text: &str, target_language: &str) -> Result<String> {
        let payload = ApiRequest {
            q: text.to_string(),
            target: target_language.to_string(),
            format: "text".to_string(),
        };
        let resp = self
            .client
            .post(format!("{}?key={}", self.api_base, self.api_key))
            .json(&payload)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("translation api error ({status})"));
        }

        let body: ApiResponse = resp.json().await?;
        body.data
            .translations
            .into_iter()
            .next()
            .map(|t| t.translated_text)
            .ok_or_else(|| anyhow!("translation response had no translations"))
    }
}

#[async_trait]
impl Translator for HttpTranslator {
    async fn translate(&self, text: &str, target_language: &str) -> String {
        match self.try_translate(text, target_language).await {
            Ok(translated) => translated,
            Err(err) => {
                tracing::warn!(
                    target_language,
                    error = %err,
                    "translation failed; falling back to source text"
                );
                text.to_string()
            }
        }
    }
}

/// Deterministic translator for tests: tags the text with the target
/// language instead of calling anything.
pub struct StubTranslator;

#[async_trait]
impl Translator for StubTranslator {
    async fn translate(&self, text: &str, target_language: &str) -> String {
        format!("[{target_language}] {text}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiRequest {
    q: String,
    target: String,
    format: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiResponse {
    data: ApiData,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiData {
    translations: Vec<ApiTranslation>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiTranslation {
    #[serde(rename = "translatedText")]
    translated_text: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn translate_returns_translated_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(query_param("key", "k-test"))
            .and(body_partial_json(serde_json::json!({
                "q": "You have the right to remain silent...",
                "target": "es"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"translations": [{"translatedText": "Tiene derecho a guardar silencio..."}]}
            })))
            .mount(&server)
            .await;

        let translator = HttpTranslator::new("k-test", server.uri());
        let out = translator
            .translate("You have the right to remain silent...", "es")
            .await;
        assert_eq!(out, "Tiene derecho a guardar silencio...");
    }

    #[tokio::test]
    async fn translate_falls_back_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let translator = HttpTranslator::new("k-test", server.uri());
        let out = translator.translate("original text", "es").await;
        assert_eq!(out, "original text");
    }

    #[tokio::test]
    async fn translate_falls_back_on_empty_translations() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"translations": []}
            })))
            .mount(&server)
            .await;

        let translator = HttpTranslator::new("k-test", server.uri());
        let out = translator.translate("keep me", "fr").await;
        assert_eq!(out, "keep me");
    }

    #[tokio::test]
    async fn stub_translator_tags_target() {
        let out = StubTranslator.translate("hello", "vi").await;
        assert_eq!(out, "[vi] hello");
    }

    #[test]
    fn from_env_missing_key_errors() {
        std::env::remove_var("LARK_TRANSLATE_KEY_TEST");
        assert!(HttpTranslator::from_env("LARK_TRANSLATE_KEY_TEST").is_err());
    }
}
