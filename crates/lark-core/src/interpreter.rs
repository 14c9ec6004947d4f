//! Decoding of model replies into structured commands.
//!
//! The model's output is untrusted free text, so decoding is total: every
//! input maps to a `CommandResponse`, with parse and shape failures
//! represented as the `Unknown`/`executed = false` value rather than an
//! error. Action tags outside the closed enum deserialize to `Unknown`.

use lark_schema::{CommandAction, CommandResponse};
use serde::Deserialize;

const DECODE_FAILED: &str = "decode failed";

#[derive(Debug, Deserialize)]
struct RawCommand {
    action: CommandAction,
    #[serde(default)]
    parameters: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    result: Option<String>,
}

/// Decode `raw_text` as a single JSON object carrying `action` and
/// `parameters`. Never fails past this boundary.
pub fn interpret(raw_text: &str, original_command: &str) -> CommandResponse {
    match parse(raw_text) {
        Some(raw) => CommandResponse {
            command: original_command.to_string(),
            action: raw.action,
            parameters: raw.parameters,
            executed: true,
            result: raw.result,
            error: None,
        },
        None => CommandResponse {
            command: original_command.to_string(),
            action: CommandAction::Unknown,
            parameters: serde_json::Map::new(),
            executed: false,
            result: None,
            error: Some(DECODE_FAILED.to_string()),
        },
    }
}

fn parse(raw_text: &str) -> Option<RawCommand> {
    let trimmed = strip_code_fence(raw_text.trim());
    serde_json::from_str(trimmed).ok()
}

/// Models often wrap JSON in a ```json fence; accept that shape too.
fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    match rest.trim_start().strip_suffix("```") {
        Some(inner) => inner.trim_end(),
        None => text,
    }
}
