use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use lark_bus::SubscriptionRegistry;
use lark_core::{Orchestrator, Persona, RetryPolicy, SnippetRetriever, StaticRetriever};
use lark_provider::{CompletionRequest, LlmClient, LlmError};
use lark_schema::{CommandAction, ConversationId, InputEvent, ResponseEvent, Role};
use lark_store::ConversationStore;
use tokio::sync::Semaphore;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_millis(500);

/// Scriptable client: records every request, optionally waits on a gate
/// before responding, and can fail the first N calls.
#[derive(Default)]
struct TestClient {
    reply: Option<String>,
    gate: Option<Arc<Semaphore>>,
    failures_remaining: AtomicU32,
    fail_status: u16,
    requests: StdMutex<Vec<CompletionRequest>>,
    calls: AtomicU32,
}

impl TestClient {
    fn echoing() -> Self {
        Self::default()
    }

    fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    fn failing(times: u32, status: u16) -> Self {
        Self {
            failures_remaining: AtomicU32::new(times),
            fail_status: status,
            ..Self::default()
        }
    }

    fn replying(text: &str) -> Self {
        Self {
            reply: Some(text.to_string()),
            ..Self::default()
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn request(&self, index: usize) -> CompletionRequest {
        self.requests.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl LlmClient for TestClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| LlmError::Network("gate closed".into()))?;
            permit.forget();
        }

        let should_fail = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(LlmError::Upstream {
                status: self.fail_status,
                message: "injected failure".into(),
            });
        }

        Ok(self.reply.clone().unwrap_or_else(|| {
            let last = request
                .messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            format!("ack: {last}")
        }))
    }
}

struct Harness {
    orchestrator: Orchestrator,
    client: Arc<TestClient>,
    registry: SubscriptionRegistry,
    store: ConversationStore,
}

fn harness(client: TestClient) -> Harness {
    let client = Arc::new(client);
    let registry = SubscriptionRegistry::new();
    let store = ConversationStore::new();
    let orchestrator = Orchestrator::new(
        client.clone(),
        store.clone(),
        registry.clone(),
        Persona::lark(),
        "test-model",
    );
    Harness {
        orchestrator,
        client,
        registry,
        store,
    }
}

fn conv(raw: &str) -> ConversationId {
    ConversationId::new(raw)
}

async fn wait_for_history(store: &ConversationStore, id: &ConversationId, len: usize) {
    timeout(WAIT, async {
        loop {
            if store.history(id).await.len() >= len {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("history never reached expected length");
}

#[tokio::test]
async fn single_turn_appends_history_and_publishes_once() {
    let h = harness(TestClient::echoing());
    let id = conv("u1");
    let (_h1, mut rx1) = h.orchestrator.subscribe_channel(&id);
    let (_h2, mut rx2) = h.orchestrator.subscribe_channel(&id);

    h.orchestrator
        .receive_input(InputEvent::text("u1", "Mirandize in Spanish"))
        .await;

    let event = timeout(WAIT, rx1.recv()).await.unwrap().unwrap();
    assert_eq!(event.content(), Some("ack: Mirandize in Spanish"));
    let event2 = timeout(WAIT, rx2.recv()).await.unwrap().unwrap();
    assert_eq!(event2.content(), Some("ack: Mirandize in Spanish"));

    // Exactly one publish per listener.
    assert!(timeout(Duration::from_millis(50), rx1.recv()).await.is_err());

    let history = h.store.history(&id).await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[0].content, "Mirandize in Spanish");
    assert_eq!(history[1].role, Role::Assistant);

    // The client saw the full history up to and including the new event.
    let request = h.client.request(0);
    assert_eq!(request.messages.len(), 1);
    assert_eq!(request.messages[0].content, "Mirandize in Spanish");
    assert!(request.system.as_deref().unwrap_or("").contains("LARK"));
}

#[tokio::test]
async fn rapid_inputs_queue_and_never_interleave() {
    let gate = Arc::new(Semaphore::new(0));
    let h = harness(TestClient::gated(gate.clone()));
    let id = conv("u1");
    let (_handle, mut rx) = h.orchestrator.subscribe_channel(&id);

    h.orchestrator
        .receive_input(InputEvent::text("u1", "one"))
        .await;
    h.orchestrator
        .receive_input(InputEvent::text("u1", "two"))
        .await;

    tokio::time::sleep(Duration::from_millis(30)).await;
    // Only the first request went out; nothing committed yet.
    assert_eq!(h.client.calls(), 1);
    assert!(h.store.history(&id).await.is_empty());

    gate.add_permits(1);
    let first = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(first.content(), Some("ack: one"));
    wait_for_history(&h.store, &id, 2).await;

    gate.add_permits(1);
    let second = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(second.content(), Some("ack: two"));
    wait_for_history(&h.store, &id, 4).await;

    let contents: Vec<String> = h
        .store
        .history(&id)
        .await
        .into_iter()
        .map(|m| m.content)
        .collect();
    assert_eq!(contents, vec!["one", "ack: one", "two", "ack: two"]);

    // The second request replayed the first completed exchange.
    let second_request = h.client.request(1);
    let roles: Vec<Role> = second_request.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
}

#[tokio::test]
async fn different_conversations_run_in_parallel() {
    let gate = Arc::new(Semaphore::new(0));
    let h = harness(TestClient::gated(gate.clone()));

    h.orchestrator
        .receive_input(InputEvent::text("a", "from a"))
        .await;
    h.orchestrator
        .receive_input(InputEvent::text("b", "from b"))
        .await;

    // Both requests are in flight at once; neither blocked the other.
    timeout(WAIT, async {
        while h.client.calls() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("second conversation was blocked behind the first");

    gate.add_permits(2);
    wait_for_history(&h.store, &conv("a"), 2).await;
    wait_for_history(&h.store, &conv("b"), 2).await;

    assert_eq!(h.store.history(&conv("a")).await[0].content, "from a");
    assert_eq!(h.store.history(&conv("b")).await[0].content, "from b");
}

#[tokio::test]
async fn failed_turn_publishes_error_and_leaves_no_history() {
    let h = harness(TestClient::failing(1, 500));
    let id = conv("u1");
    let (_handle, mut rx) = h.orchestrator.subscribe_channel(&id);

    h.orchestrator
        .receive_input(InputEvent::text("u1", "doomed"))
        .await;

    let event = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    match event {
        ResponseEvent::Failed { error } => assert!(error.contains("injected failure")),
        other => panic!("expected Failed, got {other:?}"),
    }
    assert!(h.store.history(&id).await.is_empty());

    // The conversation keeps working after a failed turn.
    h.orchestrator
        .receive_input(InputEvent::text("u1", "retry me"))
        .await;
    let event = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(event.content(), Some("ack: retry me"));

    let history = h.store.history(&id).await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].content, "retry me");
}

#[tokio::test]
async fn close_unsubscribes_but_inflight_turn_completes() {
    let gate = Arc::new(Semaphore::new(0));
    let h = harness(TestClient::gated(gate.clone()));
    let id = conv("u1");
    let (_handle, mut rx) = h.orchestrator.subscribe_channel(&id);

    h.orchestrator
        .receive_input(InputEvent::text("u1", "still working"))
        .await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    h.orchestrator.close(&id).await;
    assert_eq!(h.registry.subscriber_count(&id), 0);

    gate.add_permits(1);
    // The turn still completes and commits; publish goes to nobody.
    wait_for_history(&h.store, &id, 2).await;
    let got = timeout(Duration::from_millis(50), rx.recv()).await;
    assert!(matches!(got, Err(_) | Ok(None)));

    // A conversation can resume after close with a fresh worker.
    gate.add_permits(1);
    h.orchestrator
        .receive_input(InputEvent::text("u1", "back again"))
        .await;
    wait_for_history(&h.store, &id, 4).await;
}

#[tokio::test]
async fn retrieval_snippets_are_prefixed_into_system_prompt() {
    let client = Arc::new(TestClient::echoing());
    let registry = SubscriptionRegistry::new();
    let store = ConversationStore::new();
    let orchestrator = Orchestrator::new(
        client.clone(),
        store.clone(),
        registry.clone(),
        Persona::lark(),
        "test-model",
    )
    .with_retriever(Arc::new(StaticRetriever::new(vec![
        "La. R.S. 14:30 - First degree murder".to_string(),
    ])));

    let id = conv("u1");
    let (_handle, mut rx) = registry.subscribe_channel(&id);
    orchestrator
        .receive_input(InputEvent::text("u1", "what is 14:30"))
        .await;
    timeout(WAIT, rx.recv()).await.unwrap().unwrap();

    let system = client.request(0).system.unwrap();
    assert!(system.contains("LARK"));
    assert!(system.contains("Use the following information to answer:"));
    assert!(system.contains("La. R.S. 14:30"));
}

struct FailingRetriever;

#[async_trait]
impl SnippetRetriever for FailingRetriever {
    async fn retrieve(&self, _query: &str) -> anyhow::Result<Vec<String>> {
        anyhow::bail!("index offline")
    }
}

#[tokio::test]
async fn retrieval_failure_degrades_to_plain_prompt() {
    let client = Arc::new(TestClient::echoing());
    let registry = SubscriptionRegistry::new();
    let orchestrator = Orchestrator::new(
        client.clone(),
        ConversationStore::new(),
        registry.clone(),
        Persona::lark(),
        "test-model",
    )
    .with_retriever(Arc::new(FailingRetriever));

    let id = conv("u1");
    let (_handle, mut rx) = registry.subscribe_channel(&id);
    orchestrator
        .receive_input(InputEvent::text("u1", "hello"))
        .await;

    let event = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert!(!event.is_error());
    let system = client.request(0).system.unwrap();
    assert!(!system.contains("Use the following information"));
}

#[tokio::test]
async fn command_decoding_runs_only_when_requested() {
    let raw = r#"{"action":"miranda","parameters":{"language":"spanish"}}"#;
    let h = harness(TestClient::replying(raw));
    let id = conv("u1");
    let (_handle, mut rx) = h.orchestrator.subscribe_channel(&id);

    h.orchestrator
        .receive_input(InputEvent::voice("u1", "Mirandize in Spanish").with_command_decoding())
        .await;

    let event = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    match event {
        ResponseEvent::Reply { content, command } => {
            assert_eq!(content, raw);
            let command = command.expect("command decoding was requested");
            assert_eq!(command.action, CommandAction::Miranda);
            assert!(command.executed);
            assert_eq!(command.command, "Mirandize in Spanish");
            assert_eq!(
                command.parameters.get("language"),
                Some(&serde_json::json!("spanish"))
            );
        }
        other => panic!("expected Reply, got {other:?}"),
    }

    // Without the flag the same reply passes through undecoded.
    h.orchestrator
        .receive_input(InputEvent::text("u1", "again"))
        .await;
    let event = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    match event {
        ResponseEvent::Reply { command, .. } => assert!(command.is_none()),
        other => panic!("expected Reply, got {other:?}"),
    }
}

#[tokio::test]
async fn retry_policy_retries_retryable_failures() {
    let client = Arc::new(TestClient::failing(1, 503));
    let registry = SubscriptionRegistry::new();
    let orchestrator = Orchestrator::new(
        client.clone(),
        ConversationStore::new(),
        registry.clone(),
        Persona::lark(),
        "test-model",
    )
    .with_retry_policy(RetryPolicy {
        max_retries: 2,
        backoff: Duration::from_millis(1),
    });

    let id = conv("u1");
    let (_handle, mut rx) = registry.subscribe_channel(&id);
    orchestrator
        .receive_input(InputEvent::text("u1", "flaky"))
        .await;

    let event = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(event.content(), Some("ack: flaky"));
    assert_eq!(client.calls(), 2);
}

#[tokio::test]
async fn default_policy_does_not_retry() {
    let h = harness(TestClient::failing(1, 503));
    let id = conv("u1");
    let (_handle, mut rx) = h.orchestrator.subscribe_channel(&id);

    h.orchestrator
        .receive_input(InputEvent::text("u1", "flaky"))
        .await;

    let event = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert!(event.is_error());
    assert_eq!(h.client.calls(), 1);
}

#[tokio::test]
async fn non_retryable_failures_are_never_retried() {
    let client = Arc::new(TestClient::failing(1, 401));
    let registry = SubscriptionRegistry::new();
    let orchestrator = Orchestrator::new(
        client.clone(),
        ConversationStore::new(),
        registry.clone(),
        Persona::lark(),
        "test-model",
    )
    .with_retry_policy(RetryPolicy {
        max_retries: 3,
        backoff: Duration::from_millis(1),
    });

    let id = conv("u1");
    let (_handle, mut rx) = registry.subscribe_channel(&id);
    orchestrator
        .receive_input(InputEvent::text("u1", "bad auth"))
        .await;

    let event = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert!(event.is_error());
    assert_eq!(client.calls(), 1);
}

#[tokio::test]
async fn preference_and_task_metadata_pass_through() {
    let h = harness(TestClient::echoing());
    let id = conv("u1");

    let preferences = serde_json::json!({"language": "spanish", "voice": true});
    let tasks = serde_json::json!([{"case": "24-1187", "due": "tonight"}]);
    h.orchestrator
        .update_preferences(&id, preferences.clone())
        .await;
    h.orchestrator.update_tasks(&id, tasks.clone()).await;

    assert_eq!(h.orchestrator.preferences(&id).await, Some(preferences));
    assert_eq!(h.orchestrator.tasks(&id).await, Some(tasks));
    assert!(h.orchestrator.preferences(&conv("other")).await.is_none());
}
