//! Per-conversation state: append-only message history plus opaque
//! preference/task metadata.
//!
//! Serialization is per conversation, never global: the outer map lock is
//! held only long enough to hand out the entry's own mutex, so writes to
//! different conversations proceed in parallel while writes to the same
//! conversation queue behind each other.

mod sink;

pub use sink::{LogSink, PersistenceSink};

use std::collections::HashMap;
use std::sync::Arc;

use lark_schema::{ConversationId, Message};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct ConversationState {
    history: Vec<Message>,
    preferences: Option<serde_json::Value>,
    tasks: Option<serde_json::Value>,
}

#[derive(Clone, Default)]
pub struct ConversationStore {
    entries: Arc<Mutex<HashMap<ConversationId, Arc<Mutex<ConversationState>>>>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn entry(&self, id: &ConversationId) -> Arc<Mutex<ConversationState>> {
        let mut entries = self.entries.lock().await;
        entries.entry(id.clone()).or_default().clone()
    }

    pub async fn append(&self, id: &ConversationId, message: Message) {
        let entry = self.entry(id).await;
        let mut state = entry.lock().await;
        state.history.push(message);
    }

    /// Commit one complete exchange. Both messages land under a single
    /// hold of the conversation's lock, so no other writer can interleave
    /// between the user message and its reply.
    pub async fn append_turn(&self, id: &ConversationId, user: Message, assistant: Message) {
        let entry = self.entry(id).await;
        let mut state = entry.lock().await;
        state.history.push(user);
        state.history.push(assistant);
    }

    /// Snapshot of the history at the time of the call, not a live view.
    pub async fn history(&self, id: &ConversationId) -> Vec<Message> {
        let entry = self.entry(id).await;
        let state = entry.lock().await;
        state.history.clone()
    }

    pub async fn clear(&self, id: &ConversationId) {
        let entry = self.entry(id).await;
        let mut state = entry.lock().await;
        state.history.clear();
        state.preferences = None;
        state.tasks = None;
    }

    pub async fn set_preferences(&self, id: &ConversationId, preferences: serde_json::Value) {
        let entry = self.entry(id).await;
        entry.lock().await.preferences = Some(preferences);
    }

    pub async fn preferences(&self, id: &ConversationId) -> Option<serde_json::Value> {
        let entry = self.entry(id).await;
        let state = entry.lock().await;
        state.preferences.clone()
    }

    pub async fn set_tasks(&self, id: &ConversationId, tasks: serde_json::Value) {
        let entry = self.entry(id).await;
        entry.lock().await.tasks = Some(tasks);
    }

    pub async fn tasks(&self, id: &ConversationId) -> Option<serde_json::Value> {
        let entry = self.entry(id).await;
        let state = entry.lock().await;
        state.tasks.clone()
    }
}
