// ABOUTME: End-to-end session tests with a fake container runtime and a mocked sandbox service
// ABOUTME: Create, message, stream and stop flows through the orchestrator

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use warden_agent::{
    AgentError, DecisionStep, KeywordPlanner, Plan, SessionOrchestrator, SessionState,
    ToolDispatcher, ToolInvocation,
};
use warden_events::{
    Event, EventBus, EventHub, EventPayload, EventStream, LogLevel, SqliteEventLog,
};
use warden_sandbox::fake::FakeRuntime;
use warden_sandbox::{
    PortAllocator, ProvisioningError, RegistryConfig, RuntimeError, SandboxError, SandboxRegistry,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    orchestrator: Arc<SessionOrchestrator>,
    runtime: Arc<FakeRuntime>,
}

/// Shared so tests running in parallel never get the same sandbox ports
fn shared_allocator() -> PortAllocator {
    static ALLOCATOR: OnceLock<PortAllocator> = OnceLock::new();
    ALLOCATOR.get_or_init(PortAllocator::default).clone()
}

async fn harness_with(planner: Arc<dyn DecisionStep>) -> Harness {
    let runtime = Arc::new(FakeRuntime::new());
    let registry = Arc::new(SandboxRegistry::new(
        runtime.clone(),
        shared_allocator(),
        RegistryConfig::default(),
    ));
    let log = SqliteEventLog::in_memory().await.unwrap();
    let hub = Arc::new(EventHub::new(Arc::new(log), EventBus::new(64)));
    let dispatcher = Arc::new(ToolDispatcher::new(Duration::from_secs(5)).unwrap());

    Harness {
        orchestrator: Arc::new(SessionOrchestrator::new(registry, hub, dispatcher, planner)),
        runtime,
    }
}

async fn harness() -> Harness {
    harness_with(Arc::new(KeywordPlanner)).await
}

/// Serve the sandbox API on the port the registry assigned to the session
async fn sandbox_service(api_port: u16) -> MockServer {
    let listener = std::net::TcpListener::bind(("127.0.0.1", api_port)).unwrap();
    MockServer::builder().listener(listener).start().await
}

async fn next_event(stream: &mut EventStream) -> Event {
    tokio::time::timeout(Duration::from_secs(10), stream.next())
        .await
        .expect("timed out waiting for event")
        .expect("event stream ended")
}

async fn wait_for_tool_result(stream: &mut EventStream) -> Event {
    loop {
        let event = next_event(stream).await;
        if matches!(event.payload, EventPayload::ToolResult { .. }) {
            return event;
        }
    }
}

#[tokio::test]
async fn test_create_message_stream_stop() {
    let h = harness().await;

    let info = h.orchestrator.create_session("alice").await.unwrap();
    assert_eq!(info.state, SessionState::Active);
    let ports = info.ports.unwrap();
    let distinct: HashSet<u16> = ports.to_vec().into_iter().collect();
    assert_eq!(distinct.len(), 4);

    let server = sandbox_service(ports.api).await;
    Mock::given(method("GET"))
        .and(path("/files/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"name": "README.md"}])))
        .mount(&server)
        .await;

    let mut stream = h.orchestrator.events(&info.session_id).await.unwrap();
    h.orchestrator
        .send_message(&info.session_id, "list files")
        .await
        .unwrap();

    let first = next_event(&mut stream).await;
    assert_eq!(first.seq, 1);
    assert_eq!(first.payload, EventPayload::user_message("list files"));

    let result = wait_for_tool_result(&mut stream).await;
    match result.payload {
        EventPayload::ToolResult { tool, params, result } => {
            assert_eq!(tool, "list_files");
            assert_eq!(params, json!({"path": "."}));
            assert!(result.is_ok());
        }
        other => panic!("unexpected payload {:?}", other),
    }

    h.orchestrator.stop_session(&info.session_id).await;
    assert_eq!(h.runtime.running(), 0);

    let err = h
        .orchestrator
        .send_message(&info.session_id, "list files")
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::SessionNotFound(_)));
    assert!(h.orchestrator.events(&info.session_id).await.is_err());
}

#[tokio::test]
async fn test_unreachable_sandbox_yields_error_result() {
    let h = harness().await;
    let info = h.orchestrator.create_session("bob").await.unwrap();

    let mut stream = h.orchestrator.events(&info.session_id).await.unwrap();
    h.orchestrator
        .send_message(&info.session_id, "open the browser")
        .await
        .unwrap();

    let event = wait_for_tool_result(&mut stream).await;
    match event.payload {
        EventPayload::ToolResult { tool, result, .. } => {
            assert_eq!(tool, "browser_goto");
            assert!(!result.is_ok());
        }
        other => panic!("unexpected payload {:?}", other),
    }

    // Session survives a failed tool call
    assert_eq!(
        h.orchestrator.session(&info.session_id).await.unwrap().state,
        SessionState::Active
    );
}

#[tokio::test]
async fn test_late_subscriber_sees_full_history() {
    let h = harness().await;
    let info = h.orchestrator.create_session("carol").await.unwrap();

    {
        let mut early = h.orchestrator.events(&info.session_id).await.unwrap();
        h.orchestrator
            .send_message(&info.session_id, "hello there")
            .await
            .unwrap();
        // user_message, thinking, reply
        for _ in 0..3 {
            next_event(&mut early).await;
        }
    }

    let mut late = h.orchestrator.events(&info.session_id).await.unwrap();
    let seqs: Vec<u64> = vec![
        next_event(&mut late).await.seq,
        next_event(&mut late).await.seq,
        next_event(&mut late).await.seq,
    ];
    assert_eq!(seqs, vec![1, 2, 3]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_messages_in_one_session_are_processed_in_order() {
    let h = harness().await;
    let info = h.orchestrator.create_session("dave").await.unwrap();
    let mut stream = h.orchestrator.events(&info.session_id).await.unwrap();

    h.orchestrator
        .send_message(&info.session_id, "first")
        .await
        .unwrap();
    h.orchestrator
        .send_message(&info.session_id, "second")
        .await
        .unwrap();
    h.orchestrator
        .send_message(&info.session_id, "third")
        .await
        .unwrap();

    let mut user_messages = Vec::new();
    let mut last_seq = 0;
    while user_messages.len() < 3 || last_seq < 9 {
        let event = next_event(&mut stream).await;
        assert_eq!(event.seq, last_seq + 1);
        last_seq = event.seq;
        if let EventPayload::UserMessage { content } = event.payload {
            user_messages.push((event.seq, content));
        }
    }

    // Each turn writes user_message, thinking and reply before the next starts
    assert_eq!(
        user_messages,
        vec![
            (1, "first".to_string()),
            (4, "second".to_string()),
            (7, "third".to_string())
        ]
    );
}

#[tokio::test]
async fn test_provisioning_failure_leaves_no_session() {
    let h = harness().await;
    h.runtime
        .fail_next_create(RuntimeError::ImageNotFound("warden-sandbox:latest".to_string()));

    let err = h.orchestrator.create_session("erin").await.unwrap_err();
    assert!(matches!(
        err,
        AgentError::Sandbox(SandboxError::Provisioning(ProvisioningError::ImageMissing(_)))
    ));
    assert_eq!(h.orchestrator.session_count().await, 0);
    assert_eq!(h.runtime.running(), 0);
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let h = harness().await;
    let info = h.orchestrator.create_session("frank").await.unwrap();

    h.orchestrator.stop_session(&info.session_id).await;
    h.orchestrator.stop_session(&info.session_id).await;
    h.orchestrator.stop_session("never-existed").await;

    assert_eq!(h.runtime.stopped_count(), 1);
    assert!(h.orchestrator.session(&info.session_id).await.is_err());
}

#[tokio::test]
async fn test_stop_ends_open_streams() {
    let h = harness().await;
    let info = h.orchestrator.create_session("gina").await.unwrap();
    let mut stream = h.orchestrator.events(&info.session_id).await.unwrap();

    h.orchestrator.stop_session(&info.session_id).await;

    let end = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .unwrap();
    assert!(end.is_none());
}

struct MultiStepPlanner;

#[async_trait]
impl DecisionStep for MultiStepPlanner {
    async fn decide(&self, _history: &[Event]) -> Plan {
        Plan {
            invocations: vec![
                ToolInvocation::new("write_file", json!({"path": "a.txt", "content": "x"})),
                ToolInvocation::new("read_file", json!({"path": "a.txt"})),
            ],
            reply: Some("done".to_string()),
        }
    }
}

#[tokio::test]
async fn test_custom_planner_runs_every_invocation() {
    let h = harness_with(Arc::new(MultiStepPlanner)).await;
    let info = h.orchestrator.create_session("hank").await.unwrap();
    let server = sandbox_service(info.ports.unwrap().api).await;
    Mock::given(method("POST"))
        .and(path("/files/write"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/read"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"content": "x"})))
        .mount(&server)
        .await;

    let mut stream = h.orchestrator.events(&info.session_id).await.unwrap();
    h.orchestrator
        .send_message(&info.session_id, "do it")
        .await
        .unwrap();

    let write = wait_for_tool_result(&mut stream).await;
    let read = wait_for_tool_result(&mut stream).await;
    assert!(write.seq < read.seq);
    match read.payload {
        EventPayload::ToolResult { tool, result, .. } => {
            assert_eq!(tool, "read_file");
            assert!(result.is_ok());
        }
        other => panic!("unexpected payload {:?}", other),
    }
    assert_eq!(
        next_event(&mut stream).await.payload,
        EventPayload::agent_log("done")
    );
}

#[tokio::test]
async fn test_shutdown_stops_all_sessions() {
    let h = harness().await;
    h.orchestrator.create_session("a").await.unwrap();
    h.orchestrator.create_session("b").await.unwrap();
    assert_eq!(h.runtime.running(), 2);

    h.orchestrator.shutdown().await;

    assert_eq!(h.runtime.running(), 0);
    assert_eq!(h.orchestrator.session_count().await, 0);
}

struct PanickingPlanner;

#[async_trait]
impl DecisionStep for PanickingPlanner {
    async fn decide(&self, _history: &[Event]) -> Plan {
        panic!("planner exploded");
    }
}

#[tokio::test]
async fn test_planner_panic_is_reported_as_error_event() {
    let h = harness_with(Arc::new(PanickingPlanner)).await;
    let info = h.orchestrator.create_session("ivy").await.unwrap();
    let mut stream = h.orchestrator.events(&info.session_id).await.unwrap();

    h.orchestrator
        .send_message(&info.session_id, "hi")
        .await
        .unwrap();

    assert_eq!(next_event(&mut stream).await.payload, EventPayload::user_message("hi"));
    assert_eq!(
        next_event(&mut stream).await.payload,
        EventPayload::agent_log("Thinking about the task...")
    );
    match next_event(&mut stream).await.payload {
        EventPayload::AgentLog { level, content } => {
            assert_eq!(level, LogLevel::Error);
            assert!(content.contains("planner exploded"), "{}", content);
        }
        other => panic!("unexpected payload {:?}", other),
    }

    // The session keeps accepting messages after a failed turn
    h.orchestrator
        .send_message(&info.session_id, "again")
        .await
        .unwrap();
    assert_eq!(
        next_event(&mut stream).await.payload,
        EventPayload::user_message("again")
    );
}
