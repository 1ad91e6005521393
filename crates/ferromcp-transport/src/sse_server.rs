//! HTTP+SSE server transport (the predecessor of Streamable HTTP).
//!
//! `GET` on the endpoint opens an SSE stream whose first event is an
//! `endpoint` event naming the message POST URL; the client then POSTs
//! JSON-RPC there, and all server traffic flows back as `message` events on
//! the open stream. Unsupported verbs answer `405` with `Allow: GET, POST`.

use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use dashmap::DashMap;
use parking_lot::Mutex as SyncMutex;
use serde::Deserialize;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;
use uuid::Uuid;

use ferromcp_protocol::{Error, JsonRpcMessage, Result};

use crate::sse::SseEvent;
use crate::Transport;

/// SSE server configuration.
#[derive(Clone, Debug)]
pub struct SseServerConfig {
    /// Maximum accepted POST body, in bytes
    pub max_body_bytes: usize,
}

impl Default for SseServerConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Accepts MCP sessions arriving over HTTP+SSE.
pub struct SseServer {
    state: Arc<SseServerState>,
    accepted: Mutex<mpsc::UnboundedReceiver<SseServerTransport>>,
}

struct SseServerState {
    config: SseServerConfig,
    sessions: DashMap<String, Arc<SseSession>>,
    accept_tx: mpsc::UnboundedSender<SseServerTransport>,
}

struct SseSession {
    id: String,
    next_event_id: AtomicU64,
    outgoing: SyncMutex<Option<mpsc::UnboundedSender<SseEvent>>>,
    incoming_tx: SyncMutex<Option<mpsc::UnboundedSender<JsonRpcMessage>>>,
}

impl SseSession {
    fn push_incoming(&self, message: JsonRpcMessage) -> bool {
        match self.incoming_tx.lock().as_ref() {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    fn terminate(&self) {
        self.outgoing.lock().take();
        self.incoming_tx.lock().take();
    }
}

impl SseServer {
    /// Create a server with the given config.
    pub fn new(config: SseServerConfig) -> Self {
        let (accept_tx, accepted) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(SseServerState {
                config,
                sessions: DashMap::new(),
                accept_tx,
            }),
            accepted: Mutex::new(accepted),
        }
    }

    /// Axum router serving the SSE endpoint at `/`.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", any(handle))
            .with_state(self.state.clone())
    }

    /// Next incoming session, or `None` when the server is dropped.
    pub async fn accept(&self) -> Option<SseServerTransport> {
        self.accepted.lock().await.recv().await
    }
}

/// The server-side [`Transport`] for one SSE session.
pub struct SseServerTransport {
    session: Arc<SseSession>,
    state: Arc<SseServerState>,
    incoming: Mutex<mpsc::UnboundedReceiver<JsonRpcMessage>>,
}

#[async_trait]
impl Transport for SseServerTransport {
    async fn send(&self, message: JsonRpcMessage) -> Result<()> {
        let payload = message.encode()?;
        let id = self.session.next_event_id.fetch_add(1, Ordering::SeqCst);
        let event = SseEvent {
            id: Some(id.to_string()),
            event: Some("message".to_string()),
            data: payload,
        };
        match self.session.outgoing.lock().as_ref() {
            Some(tx) => tx.send(event).map_err(|_| Error::Closed),
            None => Err(Error::Closed),
        }
    }

    async fn receive(&self) -> Result<Option<JsonRpcMessage>> {
        Ok(self.incoming.lock().await.recv().await)
    }

    async fn close(&self) -> Result<()> {
        self.session.terminate();
        self.state.sessions.remove(&self.session.id);
        Ok(())
    }
}

#[derive(Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

const ALLOW_VERBS: &str = "GET, POST";

async fn handle(
    State(state): State<Arc<SseServerState>>,
    method: Method,
    Query(query): Query<MessageQuery>,
    _headers: HeaderMap,
    body: Bytes,
) -> Response {
    match method {
        Method::GET => handle_stream(state),
        Method::POST => handle_message(state, query, body),
        _ => (
            StatusCode::METHOD_NOT_ALLOWED,
            [(header::ALLOW, ALLOW_VERBS)],
            "method not allowed",
        )
            .into_response(),
    }
}

fn handle_stream(state: Arc<SseServerState>) -> Response {
    let session_id = Uuid::new_v4().simple().to_string();
    let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel();
    let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();

    let session = Arc::new(SseSession {
        id: session_id.clone(),
        next_event_id: AtomicU64::new(1),
        outgoing: SyncMutex::new(Some(outgoing_tx)),
        incoming_tx: SyncMutex::new(Some(incoming_tx)),
    });
    state.sessions.insert(session_id.clone(), session.clone());

    let transport = SseServerTransport {
        session,
        state: state.clone(),
        incoming: Mutex::new(incoming_rx),
    };
    if state.accept_tx.send(transport).is_err() {
        state.sessions.remove(&session_id);
        return (StatusCode::INTERNAL_SERVER_ERROR, "server shutting down").into_response();
    }
    debug!(session_id, "sse stream opened");

    let endpoint = SseEvent::typed("endpoint", format!("/?sessionId={session_id}"));
    let stream = async_stream::stream! {
        yield Ok::<_, Infallible>(Bytes::from(endpoint.encode()));
        while let Some(event) = outgoing_rx.recv().await {
            yield Ok(Bytes::from(event.encode()));
        }
    };
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-store")
        .body(Body::from_stream(stream))
        .expect("static header set is valid")
}

fn handle_message(state: Arc<SseServerState>, query: MessageQuery, body: Bytes) -> Response {
    if body.len() > state.config.max_body_bytes {
        return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response();
    }
    let Some(session_id) = query.session_id else {
        return (StatusCode::BAD_REQUEST, "missing sessionId").into_response();
    };
    let Some(session) = state.sessions.get(&session_id).map(|s| s.value().clone()) else {
        return (StatusCode::NOT_FOUND, "session not found").into_response();
    };
    let message = match JsonRpcMessage::decode(&body) {
        Ok(message) => message,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    if !session.push_incoming(message) {
        return (StatusCode::BAD_REQUEST, "message not handled").into_response();
    }
    (StatusCode::ACCEPTED, "").into_response()
}
