use std::path::Path;

use anyhow::{Context, Result};

/// Default behavioral constraints prepended to every model request.
pub const LARK_PERSONA: &str = "You are LARK (Law Enforcement Assistance and Response Kit), \
a voice-activated AI assistant designed for solo police officers in Louisiana. You act as an \
autonomous conversational agent, managing all system functionality through natural, \
context-aware conversation. Your primary goal is to enhance officer safety and efficiency by \
automating critical tasks, anticipating needs, and providing proactive support during \
high-pressure situations. Respond in a professional, concise, and authoritative tone, keeping \
responses to 1\u{2013}2 sentences.";

const SNIPPET_PREAMBLE: &str = "Use the following information to answer:";

/// Fixed system-role text establishing the assistant's behavior, plus the
/// assembly of retrieved context snippets into the final system prompt.
#[derive(Debug, Clone)]
pub struct Persona {
    pub name: String,
    pub base_prompt: String,
}

impl Persona {
    pub fn new(name: impl Into<String>, base_prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_prompt: base_prompt.into(),
        }
    }

    pub fn lark() -> Self {
        Self::new("lark", LARK_PERSONA)
    }

    pub fn from_file(name: impl Into<String>, path: &Path) -> Result<Self> {
        let base_prompt = std::fs::read_to_string(path)
            .with_context(|| format!("loading persona from {}", path.display()))?;
        Ok(Self::new(name, base_prompt.trim()))
    }

    /// Persona text, with retrieval snippets appended newline-joined when
    /// any were supplied.
    pub fn system_prompt(&self, snippets: &[String]) -> String {
        if snippets.is_empty() {
            return self.base_prompt.clone();
        }
        format!(
            "{}\n{}\n{}",
            self.base_prompt,
            SNIPPET_PREAMBLE,
            snippets.join("\n")
        )
    }
}

impl Default for Persona {
    fn default() -> Self {
        Self::lark()
    }
}
