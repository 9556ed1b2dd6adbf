//! Integration tests for the termpoll MCP tools.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::CallToolResult;
use rmcp::ErrorData as McpError;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use termpoll::TermpollServer;
use termpoll_session::SessionRegistry;

fn bash_available() -> bool {
    Path::new("/bin/bash").exists()
}

fn server() -> TermpollServer {
    TermpollServer::new(Arc::new(SessionRegistry::new()))
}

fn params<T: DeserializeOwned>(value: Value) -> Parameters<T> {
    Parameters(serde_json::from_value(value).unwrap())
}

/// The JSON document carried in a tool result's text content.
fn body(result: Result<CallToolResult, McpError>) -> Value {
    let result = result.unwrap_or_else(|e| panic!("tool call failed: {}", e.message));
    let value = serde_json::to_value(&result).unwrap();
    serde_json::from_str(value["content"][0]["text"].as_str().unwrap()).unwrap()
}

/// Poll `session_updates` until a message of type `kind` shows up; returns all messages seen.
async fn poll_until(server: &TermpollServer, session_id: &str, kind: &str) -> Vec<Value> {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut cursor = Value::Null;
    let mut seen = Vec::new();
    while Instant::now() < deadline {
        let updates = body(
            server
                .session_updates(params(json!({
                    "session_id": session_id,
                    "since": cursor,
                    "wait_ms": 500
                })))
                .await,
        );
        let messages = updates["messages"].as_array().unwrap().clone();
        cursor = updates["cursor"].clone();
        let found = messages.iter().any(|m| m["payload"]["type"] == kind);
        seen.extend(messages);
        if found {
            break;
        }
    }
    seen
}

#[tokio::test]
async fn test_full_session_over_tools() {
    if !bash_available() {
        return;
    }
    let server = server();

    let created = body(server.session_create(params(json!({}))).await);
    let session_id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["state"], "starting");

    let first = poll_until(&server, &session_id, "prompt_ready").await;
    assert!(first.iter().any(|m| m["payload"]["type"] == "prompt_ready"));

    let written = body(
        server
            .session_write(params(
                json!({"session_id": session_id, "data": "echo via-$((2+3))\n"}),
            ))
            .await,
    );
    assert_eq!(written["bytes_written"], 18);

    let messages = poll_until(&server, &session_id, "stop_mark").await;
    let output: String = messages
        .iter()
        .filter(|m| m["payload"]["type"] == "output")
        .filter_map(|m| m["payload"]["text"].as_str())
        .collect();
    assert!(output.contains("via-5"), "output was {output:?}");

    let listed = body(server.session_list(params(json!({}))).await);
    assert_eq!(listed["count"], 1);

    let closed = body(
        server
            .session_close(params(json!({"session_id": session_id})))
            .await,
    );
    assert_eq!(closed["session"]["state"], "reaped");
    assert!(["hangup", "terminate", "kill"].contains(&closed["escalation"].as_str().unwrap()));

    // Input after close is refused, but the log is still readable.
    let refused = server
        .session_write(params(json!({"session_id": session_id, "data": "ls\n"})))
        .await
        .unwrap_err();
    assert!(refused.message.starts_with("Session terminated"));

    let all = body(
        server
            .session_updates(params(json!({"session_id": session_id})))
            .await,
    );
    let last = all["messages"].as_array().unwrap().last().unwrap().clone();
    assert_eq!(last["payload"]["type"], "state_change");
    assert_eq!(last["payload"]["to"], "reaped");
}

#[tokio::test]
async fn test_resize_rejects_other_geometry() {
    if !bash_available() {
        return;
    }
    let server = server();
    let created = body(server.session_create(params(json!({}))).await);
    let session_id = created["id"].as_str().unwrap().to_string();

    let ok = body(
        server
            .session_resize(params(
                json!({"session_id": session_id, "rows": 24, "cols": 80}),
            ))
            .await,
    );
    assert_eq!(ok["rows"], 24);

    let rejected = server
        .session_resize(params(
            json!({"session_id": session_id, "rows": 40, "cols": 100}),
        ))
        .await
        .unwrap_err();
    assert_eq!(rejected.message, "Invalid dimensions: 40x100");

    body(
        server
            .session_close(params(json!({"session_id": session_id})))
            .await,
    );
}

#[tokio::test]
async fn test_long_poll_times_out_with_cursor_unchanged() {
    if !bash_available() {
        return;
    }
    let server = server();
    let created = body(server.session_create(params(json!({}))).await);
    let session_id = created["id"].as_str().unwrap().to_string();

    poll_until(&server, &session_id, "prompt_ready").await;
    // Let the Starting -> Ready change land before taking the cursor.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let latest = body(
        server
            .session_updates(params(json!({"session_id": session_id})))
            .await,
    );
    let cursor = latest["cursor"].clone();
    assert!(!cursor.is_null());

    let started = Instant::now();
    let updates = body(
        server
            .session_updates(params(json!({
                "session_id": session_id,
                "since": cursor,
                "wait_ms": 300
            })))
            .await,
    );
    assert!(started.elapsed() >= Duration::from_millis(250));
    assert!(updates["messages"].as_array().unwrap().is_empty());
    assert_eq!(updates["cursor"], cursor);

    body(
        server
            .session_close(params(json!({"session_id": session_id})))
            .await,
    );
}
