// ABOUTME: Integration tests for tool dispatch against a mocked sandbox service
// ABOUTME: Covers verb/payload routing and normalization of every failure mode

use chrono::Utc;
use serde_json::json;
use std::time::Duration;
use warden_agent::ToolDispatcher;
use warden_events::ToolResult;
use warden_sandbox::{ContainerHandle, SandboxBinding, SandboxPorts};
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn binding_for(base_url: String) -> SandboxBinding {
    SandboxBinding {
        session_id: "test-session".to_string(),
        container: ContainerHandle {
            id: "c1".to_string(),
            name: "sandbox-test-session".to_string(),
        },
        base_url,
        ports: SandboxPorts {
            api: 8080,
            vnc: 5900,
            novnc: 6080,
            cdp: 9222,
        },
        created_at: Utc::now(),
    }
}

fn dispatcher() -> ToolDispatcher {
    ToolDispatcher::new(Duration::from_secs(5)).unwrap()
}

fn assert_error(result: &ToolResult) -> String {
    match result {
        ToolResult::Error { message } => {
            assert!(!message.is_empty());
            message.clone()
        }
        other => panic!("expected error result, got {:?}", other),
    }
}

#[tokio::test]
async fn test_list_files_sends_query_string() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/list"))
        .and(query_param("path", "."))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"name": "main.rs"}])))
        .expect(1)
        .mount(&server)
        .await;

    let result = dispatcher()
        .invoke(&binding_for(server.uri()), "list_files", &json!({"path": "."}))
        .await;

    assert_eq!(result, ToolResult::ok(json!([{"name": "main.rs"}])));
}

#[tokio::test]
async fn test_write_file_posts_json_body() {
    let server = MockServer::start().await;
    let params = json!({"path": "notes.txt", "content": "hi"});
    Mock::given(method("POST"))
        .and(path("/files/write"))
        .and(body_json(params.clone()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"written": true})))
        .expect(1)
        .mount(&server)
        .await;

    let result = dispatcher()
        .invoke(&binding_for(server.uri()), "write_file", &params)
        .await;

    assert!(result.is_ok());
}

#[tokio::test]
async fn test_delete_file_uses_delete_verb() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/files/delete"))
        .and(query_param("path", "old.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"deleted": true})))
        .expect(1)
        .mount(&server)
        .await;

    let result = dispatcher()
        .invoke(&binding_for(server.uri()), "delete_file", &json!({"path": "old.txt"}))
        .await;

    assert!(result.is_ok());
}

#[tokio::test]
async fn test_unknown_tool_posts_to_tool_path() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
        .expect(1)
        .mount(&server)
        .await;

    let result = dispatcher()
        .invoke(&binding_for(server.uri()), "search", &json!({"query": "rust"}))
        .await;

    assert!(result.is_ok());
}

#[tokio::test]
async fn test_unknown_tool_with_dotted_or_nested_name_is_dispatched() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/plugins/web.fetch"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": 200})))
        .expect(1)
        .mount(&server)
        .await;

    let result = dispatcher()
        .invoke(
            &binding_for(server.uri()),
            "plugins/web.fetch",
            &json!({"url": "https://example.com"}),
        )
        .await;

    assert!(result.is_ok());
}

#[tokio::test]
async fn test_non_json_body_is_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/read"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let result = dispatcher()
        .invoke(&binding_for(server.uri()), "read_file", &json!({"path": "a"}))
        .await;

    let message = assert_error(&result);
    assert!(message.contains("non-JSON"));
}

#[tokio::test]
async fn test_server_error_status_is_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/browser/goto"))
        .respond_with(ResponseTemplate::new(500).set_body_string("browser crashed"))
        .mount(&server)
        .await;

    let result = dispatcher()
        .invoke(
            &binding_for(server.uri()),
            "browser_goto",
            &json!({"url": "https://example.com"}),
        )
        .await;

    let message = assert_error(&result);
    assert!(message.contains("500"));
    assert!(message.contains("browser crashed"));
}

#[tokio::test]
async fn test_command_timeout_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/shell/execute"))
        .respond_with(ResponseTemplate::new(408).set_body_json(json!({"detail": "timeout"})))
        .mount(&server)
        .await;

    let result = dispatcher()
        .invoke(
            &binding_for(server.uri()),
            "execute_command",
            &json!({"command": "sleep 100", "timeout": 1}),
        )
        .await;

    let message = assert_error(&result);
    assert!(message.contains("timed out"));
}

#[tokio::test]
async fn test_slow_sandbox_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/browser/screenshot"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"image": ""}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let dispatcher = ToolDispatcher::new(Duration::from_millis(200)).unwrap();
    let result = dispatcher
        .invoke(&binding_for(server.uri()), "browser_screenshot", &json!({}))
        .await;

    let message = assert_error(&result);
    assert!(message.contains("timed out"));
}

#[tokio::test]
async fn test_unreachable_sandbox_is_error() {
    // Nothing listens on port 9 of localhost in test environments
    let result = dispatcher()
        .invoke(
            &binding_for("http://127.0.0.1:9".to_string()),
            "list_files",
            &json!({"path": "."}),
        )
        .await;

    assert_error(&result);
}

#[tokio::test]
async fn test_invalid_tool_name_is_rejected_without_request() {
    let server = MockServer::start().await;

    let result = dispatcher()
        .invoke(&binding_for(server.uri()), "../admin", &json!({}))
        .await;

    assert_error(&result);
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_health_probe() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .mount(&server)
        .await;

    assert!(dispatcher().health(&binding_for(server.uri())).await);
    assert!(
        !dispatcher()
            .health(&binding_for("http://127.0.0.1:9".to_string()))
            .await
    );
}
