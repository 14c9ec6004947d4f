use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque key partitioning all conversation state. Typically a user id or a
/// UI session id; the core never looks inside it.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ConversationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// One entry in a conversation's append-only history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub at: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            at: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            at: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    Text,
    Voice,
}

/// A single piece of user input, produced by a UI adapter and consumed
/// exactly once by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputEvent {
    pub conversation_id: ConversationId,
    pub kind: InputKind,
    pub content: String,
    /// Whether the submitting adapter wants the reply decoded as a
    /// structured command.
    #[serde(default)]
    pub expects_command: bool,
}

impl InputEvent {
    pub fn text(conversation_id: impl Into<ConversationId>, content: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            kind: InputKind::Text,
            content: content.into(),
            expects_command: false,
        }
    }

    pub fn voice(conversation_id: impl Into<ConversationId>, content: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            kind: InputKind::Voice,
            content: content.into(),
            expects_command: false,
        }
    }

    pub fn with_command_decoding(mut self) -> Self {
        self.expects_command = true;
        self
    }
}

/// Closed set of actions a model reply may be decoded into. Tags outside
/// this set deserialize to `Unknown`; model output can never mint a new
/// variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandAction {
    Miranda,
    Statute,
    Threat,
    Tactical,
    GeneralQuery,
    #[serde(other)]
    Unknown,
}

/// Outcome of decoding a model reply as a structured command.
///
/// `executed == false` with `error` set means the reply did not decode;
/// that is a recoverable value, not a fault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub command: String,
    pub action: CommandAction,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    pub executed: bool,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Payload fanned out to conversation subscribers after a turn resolves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponseEvent {
    Reply {
        content: String,
        command: Option<CommandResponse>,
    },
    Failed {
        error: String,
    },
}

impl ResponseEvent {
    pub fn is_error(&self) -> bool {
        matches!(self, ResponseEvent::Failed { .. })
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            ResponseEvent::Reply { content, .. } => Some(content),
            ResponseEvent::Failed { .. } => None,
        }
    }
}

/// Emitted by a speech-to-text adapter. The core only consumes final
/// transcripts; partials are display-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEvent {
    pub transcript: String,
    pub is_final: bool,
}

/// Record of a completed Miranda advisement, handed to the persistence
/// sink fire-and-forget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirandaLog {
    pub id: Uuid,
    pub suspect_name: String,
    pub dob: String,
    pub case_number: String,
    pub officer: String,
    pub language: String,
    pub at: DateTime<Utc>,
}

impl MirandaLog {
    pub fn new(
        suspect_name: impl Into<String>,
        dob: impl Into<String>,
        case_number: impl Into<String>,
        officer: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            suspect_name: suspect_name.into(),
            dob: dob.into(),
            case_number: case_number.into(),
            officer: officer.into(),
            language: language.into(),
            at: Utc::now(),
        }
    }
}
