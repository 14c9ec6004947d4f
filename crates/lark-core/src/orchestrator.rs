//! The façade over the conversation pipeline: input events in, published
//! replies out.
//!
//! Each conversation gets its own worker task draining a FIFO queue, so a
//! conversation has at most one completion request in flight while events
//! for other conversations proceed in parallel. `receive_input` only
//! enqueues; completion and publish happen on the worker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use lark_bus::{Listener, SubscriptionHandle, SubscriptionRegistry};
use lark_provider::{CompletionRequest, LlmClient, LlmError};
use lark_schema::{ConversationId, InputEvent, Message, ResponseEvent};
use lark_store::ConversationStore;
use tokio::sync::{mpsc, Mutex};

use crate::interpreter;
use crate::persona::Persona;
use crate::retrieval::SnippetRetriever;

/// How the orchestrator reacts to retryable upstream failures. The
/// default performs no retries; deployments opt in.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Everything a worker needs to run turns for its conversation.
#[derive(Clone)]
struct TurnContext {
    client: Arc<dyn LlmClient>,
    store: ConversationStore,
    registry: SubscriptionRegistry,
    persona: Persona,
    retriever: Option<Arc<dyn SnippetRetriever>>,
    model: String,
    max_tokens: u32,
    retry: RetryPolicy,
}

pub struct Orchestrator {
    context: TurnContext,
    workers: Mutex<HashMap<ConversationId, mpsc::UnboundedSender<InputEvent>>>,
}

impl Orchestrator {
    pub fn new(
        client: Arc<dyn LlmClient>,
        store: ConversationStore,
        registry: SubscriptionRegistry,
        persona: Persona,
        model: impl Into<String>,
    ) -> Self {
        Self {
            context: TurnContext {
                client,
                store,
                registry,
                persona,
                retriever: None,
                model: model.into(),
                max_tokens: 1024,
                retry: RetryPolicy::default(),
            },
            workers: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn SnippetRetriever>) -> Self {
        self.context.retriever = Some(retriever);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.context.retry = retry;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.context.max_tokens = max_tokens;
        self
    }

    /// Enqueue one input event and return. The event is processed on the
    /// conversation's worker, after everything already queued for it.
    pub async fn receive_input(&self, event: InputEvent) {
        let sender = self.worker_for(&event.conversation_id).await;
        if sender.send(event).is_err() {
            // Worker task died; the conversation gets a fresh one on the
            // next event.
            tracing::error!("conversation worker unavailable; event dropped");
        }
    }

    async fn worker_for(&self, id: &ConversationId) -> mpsc::UnboundedSender<InputEvent> {
        let mut workers = self.workers.lock().await;
        if let Some(sender) = workers.get(id) {
            if !sender.is_closed() {
                return sender.clone();
            }
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(drain_loop(self.context.clone(), id.clone(), receiver));
        workers.insert(id.clone(), sender.clone());
        sender
    }

    /// UI teardown for one conversation: all listeners are unsubscribed
    /// immediately. An in-flight completion is not cancelled; its result
    /// is published to whoever is still subscribed then, possibly nobody.
    pub async fn close(&self, id: &ConversationId) {
        self.context.registry.unsubscribe_all(id);
        self.workers.lock().await.remove(id);
    }

    pub fn subscribe(&self, id: &ConversationId, listener: Listener) -> SubscriptionHandle {
        self.context.registry.subscribe(id, listener)
    }

    pub fn subscribe_channel(
        &self,
        id: &ConversationId,
    ) -> (SubscriptionHandle, mpsc::UnboundedReceiver<ResponseEvent>) {
        self.context.registry.subscribe_channel(id)
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        self.context.registry.unsubscribe(handle)
    }

    pub async fn history(&self, id: &ConversationId) -> Vec<Message> {
        self.context.store.history(id).await
    }

    pub async fn clear_history(&self, id: &ConversationId) {
        self.context.store.clear(id).await
    }

    pub async fn update_preferences(&self, id: &ConversationId, preferences: serde_json::Value) {
        self.context.store.set_preferences(id, preferences).await
    }

    pub async fn preferences(&self, id: &ConversationId) -> Option<serde_json::Value> {
        self.context.store.preferences(id).await
    }

    pub async fn update_tasks(&self, id: &ConversationId, tasks: serde_json::Value) {
        self.context.store.set_tasks(id, tasks).await
    }

    pub async fn tasks(&self, id: &ConversationId) -> Option<serde_json::Value> {
        self.context.store.tasks(id).await
    }
}

async fn drain_loop(
    context: TurnContext,
    id: ConversationId,
    mut receiver: mpsc::UnboundedReceiver<InputEvent>,
) {
    while let Some(event) = receiver.recv().await {
        process_turn(&context, &id, event).await;
    }
}

async fn process_turn(context: &TurnContext, id: &ConversationId, event: InputEvent) {
    let user_message = Message::user(&event.content);
    let mut messages = context.store.history(id).await;
    messages.push(user_message.clone());

    let snippets = match &context.retriever {
        Some(retriever) => match retriever.retrieve(&event.content).await {
            Ok(snippets) => snippets,
            Err(err) => {
                tracing::warn!(
                    conversation_id = %id,
                    error = %err,
                    "snippet retrieval failed; continuing without context"
                );
                Vec::new()
            }
        },
        None => Vec::new(),
    };
    let system = context.persona.system_prompt(&snippets);

    let request = CompletionRequest {
        model: context.model.clone(),
        system: Some(system),
        messages,
        max_tokens: context.max_tokens,
    };

    match complete_with_retry(context, request).await {
        Ok(raw_text) => {
            let command = event
                .expects_command
                .then(|| interpreter::interpret(&raw_text, &event.content));
            let assistant_message = Message::assistant(&raw_text);
            // One atomic commit per successful exchange: a failed turn
            // leaves no history entry and turns never interleave.
            context
                .store
                .append_turn(id, user_message, assistant_message)
                .await;
            context.registry.publish(
                id,
                ResponseEvent::Reply {
                    content: raw_text,
                    command,
                },
            );
        }
        Err(err) => {
            tracing::warn!(conversation_id = %id, error = %err, "completion failed");
            context.registry.publish(
                id,
                ResponseEvent::Failed {
                    error: err.to_string(),
                },
            );
        }
    }
}

async fn complete_with_retry(
    context: &TurnContext,
    request: CompletionRequest,
) -> Result<String, LlmError> {
    let mut attempt = 0;
    loop {
        match context.client.complete(request.clone()).await {
            Ok(text) => return Ok(text),
            Err(err) if err.is_retryable() && attempt < context.retry.max_retries => {
                attempt += 1;
                tracing::debug!(attempt, error = %err, "retrying completion");
                tokio::time::sleep(context.retry.backoff * attempt).await;
            }
            Err(err) => return Err(err),
        }
    }
}
