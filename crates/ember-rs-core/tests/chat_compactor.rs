//! Chat compactor tests against a local mock completions server.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use ember_rs_config::CompactorConfig;
use ember_rs_core::{ChatCompactor, Compactor, CompactorError};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::sync::Arc;

#[derive(Clone)]
struct MockState {
    status: StatusCode,
    reply: Value,
    seen: Arc<Mutex<Vec<(Option<String>, Value)>>>,
}

async fn completions(
    State(state): State<MockState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let auth = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    state.seen.lock().push((auth, body));
    (state.status, Json(state.reply.clone()))
}

/// Serve the mock on an ephemeral port and return its endpoint.
async fn spawn_mock(state: MockState) -> String {
    let app = Router::new()
        .route("/v4/chat/completions", post(completions))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}/v4/chat/completions")
}

fn mock_state(status: StatusCode, reply: Value) -> MockState {
    MockState {
        status,
        reply,
        seen: Arc::new(Mutex::new(Vec::new())),
    }
}

fn compactor_for(endpoint: String) -> ChatCompactor {
    let config = CompactorConfig {
        endpoint,
        timeout_secs: 5,
        ..CompactorConfig::default()
    };
    ChatCompactor::new(&config, "test-key", 5 * 1024).expect("compactor")
}

#[tokio::test]
async fn returns_first_choice_content() {
    let state = mock_state(
        StatusCode::OK,
        json!({ "choices": [{ "message": { "role": "assistant", "content": "{\"version\":\"1.0\"}" } }] }),
    );
    let endpoint = spawn_mock(state.clone()).await;
    let compactor = compactor_for(endpoint);

    let content = compactor
        .compact("{\"version\":\"1.0\"}", "Conversation log:\n\nUser: hi\n")
        .await
        .expect("compact");
    assert_eq!(content, "{\"version\":\"1.0\"}");

    let seen = state.seen.lock().clone();
    assert_eq!(seen.len(), 1);
    let (auth, body) = &seen[0];
    assert_eq!(auth.as_deref(), Some("Bearer test-key"));
    assert_eq!(body["model"], json!("glm-4.7-flash"));
    assert_eq!(body["max_tokens"], json!(4096));
    assert_eq!(body["messages"][0]["role"], json!("user"));
    let prompt = body["messages"][0]["content"].as_str().expect("prompt");
    assert!(prompt.contains("User: hi"));
}

#[tokio::test]
async fn non_success_status_is_reported_with_body() {
    let state = mock_state(
        StatusCode::UNAUTHORIZED,
        json!({ "error": { "message": "bad key" } }),
    );
    let endpoint = spawn_mock(state).await;
    let err = compactor_for(endpoint)
        .compact("{}", "User: hi\n")
        .await
        .unwrap_err();
    match err {
        CompactorError::Status { status, body } => {
            assert_eq!(status, 401);
            assert!(body.contains("bad key"));
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn empty_content_is_an_error() {
    let state = mock_state(
        StatusCode::OK,
        json!({ "choices": [{ "message": { "content": "  " } }] }),
    );
    let endpoint = spawn_mock(state).await;
    let err = compactor_for(endpoint)
        .compact("{}", "User: hi\n")
        .await
        .unwrap_err();
    assert!(matches!(err, CompactorError::EmptyResponse));
}

#[tokio::test]
async fn missing_choices_is_malformed() {
    let state = mock_state(StatusCode::OK, json!({ "id": "x" }));
    let endpoint = spawn_mock(state).await;
    let err = compactor_for(endpoint)
        .compact("{}", "User: hi\n")
        .await
        .unwrap_err();
    assert!(matches!(err, CompactorError::Malformed(_)));
}

#[tokio::test]
async fn unreachable_endpoint_is_transport_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let err = compactor_for(format!("http://{addr}/v4/chat/completions"))
        .compact("{}", "User: hi\n")
        .await
        .unwrap_err();
    assert!(matches!(err, CompactorError::Transport(_)));
}
