//! Fan-out of turn results to conversation subscribers.
//!
//! Listeners are keyed by conversation. `publish` snapshots the listener
//! set before iterating, so unsubscribing mid-delivery neither skips nor
//! duplicates anyone, and a listener that fails is logged and isolated
//! rather than propagated.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use lark_schema::{ConversationId, ResponseEvent};
use tokio::sync::mpsc;
use uuid::Uuid;

pub type Listener = Arc<dyn Fn(ResponseEvent) -> anyhow::Result<()> + Send + Sync>;

/// Identity of one subscription. Unsubscribing requires the handle, so
/// two registrations of the same callback are distinct subscriptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    id: Uuid,
    conversation_id: ConversationId,
}

impl SubscriptionHandle {
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }
}

#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    listeners: Arc<RwLock<HashMap<ConversationId, Vec<(Uuid, Listener)>>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, id: &ConversationId, listener: Listener) -> SubscriptionHandle {
        let handle = SubscriptionHandle {
            id: Uuid::new_v4(),
            conversation_id: id.clone(),
        };
        let mut listeners = self.listeners.write().unwrap();
        listeners
            .entry(id.clone())
            .or_default()
            .push((handle.id, listener));
        handle
    }

    pub fn subscribe_fn<F>(&self, id: &ConversationId, listener: F) -> SubscriptionHandle
    where
        F: Fn(ResponseEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(id, Arc::new(listener))
    }

    /// Subscribe via a channel instead of a callback. The receiver sees
    /// events in publish order; once it is dropped, sends become no-ops
    /// until the handle is unsubscribed.
    pub fn subscribe_channel(
        &self,
        id: &ConversationId,
    ) -> (SubscriptionHandle, mpsc::UnboundedReceiver<ResponseEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.subscribe_fn(id, move |event| {
            let _ = tx.send(event);
            Ok(())
        });
        (handle, rx)
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let mut listeners = self.listeners.write().unwrap();
        if let Some(entries) = listeners.get_mut(&handle.conversation_id) {
            entries.retain(|(id, _)| *id != handle.id);
            if entries.is_empty() {
                listeners.remove(&handle.conversation_id);
            }
        }
    }

    pub fn unsubscribe_all(&self, id: &ConversationId) {
        self.listeners.write().unwrap().remove(id);
    }

    pub fn subscriber_count(&self, id: &ConversationId) -> usize {
        self.listeners
            .read()
            .unwrap()
            .get(id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Deliver to every listener subscribed at the time of the call.
    /// Publishing to a conversation with no listeners is a no-op.
    pub fn publish(&self, id: &ConversationId, event: ResponseEvent) {
        let snapshot: Vec<Listener> = {
            let listeners = self.listeners.read().unwrap();
            match listeners.get(id) {
                Some(entries) => entries.iter().map(|(_, l)| l.clone()).collect(),
                None => return,
            }
        };
        for listener in snapshot {
            if let Err(err) = listener(event.clone()) {
                tracing::warn!(
                    conversation_id = %id,
                    error = %err,
                    "subscriber failed; continuing delivery"
                );
            }
        }
    }
}
