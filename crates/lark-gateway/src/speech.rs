//! Adapter between a speech-to-text stream and the gateway. Partial
//! transcripts are display-only; only final, non-empty transcripts become
//! voice input events.

use std::sync::Arc;

use anyhow::Result;
use lark_schema::{ConversationId, InputEvent, TranscriptEvent};

use crate::Gateway;

pub struct SpeechAdapter {
    gateway: Arc<Gateway>,
    conversation_id: ConversationId,
    client_ip: String,
}

impl SpeechAdapter {
    pub fn new(
        gateway: Arc<Gateway>,
        conversation_id: ConversationId,
        client_ip: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            conversation_id,
            client_ip: client_ip.into(),
        }
    }

    /// Returns whether the transcript was forwarded to the core.
    pub async fn on_transcript(&self, event: TranscriptEvent) -> Result<bool> {
        if !event.is_final {
            return Ok(false);
        }
        let transcript = event.transcript.trim();
        if transcript.is_empty() {
            return Ok(false);
        }
        self.gateway
            .submit(
                &self.client_ip,
                InputEvent::voice(self.conversation_id.clone(), transcript),
            )
            .await?;
        Ok(true)
    }
}
