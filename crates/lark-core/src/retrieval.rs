use anyhow::Result;
use async_trait::async_trait;

/// Source of context snippets injected into the system prompt to ground
/// the model's reply. Where snippets come from is deployment policy; the
/// orchestrator only needs this seam.
#[async_trait]
pub trait SnippetRetriever: Send + Sync {
    async fn retrieve(&self, query: &str) -> Result<Vec<String>>;
}

/// Retriever backed by a fixed snippet list, for configuration-driven
/// grounding and tests.
pub struct StaticRetriever {
    snippets: Vec<String>,
}

impl StaticRetriever {
    pub fn new(snippets: Vec<String>) -> Self {
        Self { snippets }
    }
}

#[async_trait]
impl SnippetRetriever for StaticRetriever {
    async fn retrieve(&self, _query: &str) -> Result<Vec<String>> {
        Ok(self.snippets.clone())
    }
}
