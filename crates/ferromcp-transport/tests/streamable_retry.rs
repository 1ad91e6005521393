//! Conformance tests for the Streamable HTTP client's retry and failure
//! semantics, against hand-rolled misbehaving servers.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use serde_json::json;

use ferromcp_protocol::jsonrpc::JsonRpcRequest;
use ferromcp_protocol::{JsonRpcMessage, RequestId};
use ferromcp_transport::{
    StreamableHttpClient, StreamableHttpClientConfig, Transport,
};

/// What the fake server does with request POSTs and resumption GETs.
#[derive(Clone, Copy)]
enum Behavior {
    /// SSE body with one identified (non-response) event, then closed;
    /// every resumption GET closes without events.
    StallAfterOneEvent,
    /// SSE body that closes before any event.
    CloseImmediately,
    /// Always answer this status.
    Status(u16),
}

#[derive(Clone)]
struct FakeState {
    behavior: Behavior,
    gets: Arc<AtomicU32>,
}

fn initialize_response(id: u64) -> String {
    json!({
        "jsonrpc": "2.0",
        "result": {
            "protocolVersion": "2025-06-18",
            "capabilities": {},
            "serverInfo": {"name": "fake", "version": "0"}
        },
        "id": id
    })
    .to_string()
}

fn sse_body(content: &str) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(Body::from(content.to_string()))
        .unwrap()
}

async fn handle(
    State(state): State<FakeState>,
    method: Method,
    body: axum::body::Bytes,
) -> Response {
    match method {
        Method::POST => {
            let text = String::from_utf8_lossy(&body);
            if text.contains("\"initialize\"") {
                return Response::builder()
                    .status(StatusCode::OK)
                    .header(header::CONTENT_TYPE, "application/json")
                    .header("Mcp-Session-Id", "123")
                    .body(Body::from(initialize_response(1)))
                    .unwrap();
            }
            if !text.contains("\"id\"") {
                return StatusCode::ACCEPTED.into_response();
            }
            match state.behavior {
                Behavior::StallAfterOneEvent => {
                    let event = json!({
                        "jsonrpc": "2.0",
                        "method": "notifications/message",
                        "params": {"level": "info", "data": "partial"}
                    });
                    sse_body(&format!("id: 1\ndata: {event}\n\n"))
                }
                Behavior::CloseImmediately => sse_body(""),
                Behavior::Status(code) => StatusCode::from_u16(code).unwrap().into_response(),
            }
        }
        Method::GET => {
            state.gets.fetch_add(1, Ordering::SeqCst);
            // Never advances Last-Event-ID: no events, stream just ends.
            sse_body("")
        }
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

async fn spawn_fake(behavior: Behavior) -> (String, Arc<AtomicU32>) {
    let gets = Arc::new(AtomicU32::new(0));
    let state = FakeState {
        behavior,
        gets: gets.clone(),
    };
    let router = Router::new().route("/", any(handle)).with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{addr}/"), gets)
}

fn fast_config(url: &str, max_retries: u32) -> StreamableHttpClientConfig {
    StreamableHttpClientConfig {
        max_retries,
        reconnect_initial_delay: std::time::Duration::from_millis(5),
        reconnect_max_delay: std::time::Duration::from_millis(20),
        ..StreamableHttpClientConfig::new(url)
    }
}

async fn initialize(client: &StreamableHttpClient) {
    let request = JsonRpcRequest::with_params(
        "initialize",
        &json!({
            "protocolVersion": "2025-06-18",
            "capabilities": {},
            "clientInfo": {"name": "t", "version": "0"}
        }),
        RequestId::Number(1),
    )
    .unwrap();
    client.send(request.into()).await.unwrap();
    // Consume the initialize response.
    let message = client.receive().await.unwrap().unwrap();
    assert!(matches!(message, JsonRpcMessage::Response(_)));
}

/// Drain incoming messages until the response for `id` arrives.
async fn response_for(client: &StreamableHttpClient, id: i64) -> ferromcp_protocol::JsonRpcResponse {
    loop {
        match client.receive().await.unwrap().unwrap() {
            JsonRpcMessage::Response(response) if response.id == RequestId::Number(id) => {
                return response;
            }
            _ => continue,
        }
    }
}

#[tokio::test]
async fn no_progress_fails_after_max_retries_plus_one_attempts() {
    let (url, gets) = spawn_fake(Behavior::StallAfterOneEvent).await;
    let client = StreamableHttpClient::new(fast_config(&url, 2));
    initialize(&client).await;

    client
        .send(JsonRpcRequest::new("tools/list", Some(json!({})), RequestId::Number(2)).into())
        .await
        .unwrap();

    let response = response_for(&client, 2).await;
    let error = response.error_object().expect("call must fail");
    assert!(error.message.contains("exceeded retries"), "{}", error.message);
    // Exactly MaxRetries + 1 reconnect attempts were made.
    assert_eq!(gets.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn stream_dying_before_any_event_fails_fast_without_resumption() {
    let (url, gets) = spawn_fake(Behavior::CloseImmediately).await;
    let client = StreamableHttpClient::new(fast_config(&url, 5));
    initialize(&client).await;

    client
        .send(JsonRpcRequest::new("tools/list", Some(json!({})), RequestId::Number(2)).into())
        .await
        .unwrap();

    let response = response_for(&client, 2).await;
    let error = response.error_object().expect("call must fail");
    assert!(
        error.message.contains("terminated without response"),
        "{}",
        error.message
    );
    assert_eq!(gets.load(Ordering::SeqCst), 0, "no resumption may be attempted");
}

#[tokio::test]
async fn transient_statuses_error_without_breaking_the_session() {
    let (url, _gets) = spawn_fake(Behavior::Status(503)).await;
    let client = StreamableHttpClient::new(fast_config(&url, 1));
    initialize(&client).await;

    let err = client
        .send(JsonRpcRequest::new("tools/list", Some(json!({})), RequestId::Number(2)).into())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ferromcp_protocol::ErrorKind::Transient);

    // The session is still usable: the next send reaches the wire (and is
    // rejected by the fake with the same transient status, not fail-fast).
    let err = client
        .send(JsonRpcRequest::new("tools/list", Some(json!({})), RequestId::Number(3)).into())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ferromcp_protocol::ErrorKind::Transient);
}

#[tokio::test]
async fn unauthorized_marks_the_session_broken() {
    let (url, _gets) = spawn_fake(Behavior::Status(401)).await;
    let client = StreamableHttpClient::new(fast_config(&url, 1));
    initialize(&client).await;

    let err = client
        .send(JsonRpcRequest::new("tools/list", Some(json!({})), RequestId::Number(2)).into())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ferromcp_protocol::ErrorKind::Fatal);

    // Subsequent sends fail fast.
    let err = client
        .send(JsonRpcRequest::new("ping", Some(json!({})), RequestId::Number(3)).into())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("session broken"), "{err}");
}
