//! Streamable HTTP server transport.
//!
//! A single URL serves `POST`, `GET`, and `DELETE`:
//!
//! - `POST initialize` creates a session and answers with an
//!   `application/json` body plus the `Mcp-Session-Id` header;
//! - subsequent `POST`s carry the session header: requests answer with an
//!   SSE body whose events have monotonic ids, notifications/responses get
//!   `202 Accepted`;
//! - `GET` opens the standalone stream for server-initiated traffic; with a
//!   `Last-Event-ID` header it resumes a broken stream by replaying events strictly
//!   after that id;
//! - `DELETE` terminates the session.
//!
//! Oversize bodies get `413`, malformed bodies `400` with a diagnostic,
//! unknown sessions `404`, and unsupported verbs `405` with an `Allow` header.

use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use dashmap::DashMap;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use ferromcp_protocol::{methods, Error, JsonRpcMessage, RequestId, Result};

use crate::sse::SseEvent;
use crate::{Transport, LAST_EVENT_ID_HEADER, SESSION_ID_HEADER};

/// Streamable HTTP server configuration.
#[derive(Clone, Debug)]
pub struct StreamableHttpServerConfig {
    /// Maximum accepted request body, in bytes
    pub max_body_bytes: usize,
    /// Events retained per session for `Last-Event-ID` replay
    pub replay_buffer: usize,
    /// How long the initialize POST waits for the serving side to answer
    pub initialize_timeout: std::time::Duration,
}

impl Default for StreamableHttpServerConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 4 * 1024 * 1024,
            replay_buffer: 256,
            initialize_timeout: std::time::Duration::from_secs(30),
        }
    }
}

/// Accepts MCP sessions arriving over Streamable HTTP.
///
/// Mount [`StreamableHttpServer::router`] into an HTTP listener and drain
/// [`StreamableHttpServer::accept`]: each `initialize` POST yields one
/// [`StreamableServerTransport`] to serve.
pub struct StreamableHttpServer {
    state: Arc<HttpServerState>,
    accepted: Mutex<mpsc::UnboundedReceiver<StreamableServerTransport>>,
}

struct HttpServerState {
    config: StreamableHttpServerConfig,
    sessions: DashMap<String, Arc<HttpSession>>,
    accept_tx: mpsc::UnboundedSender<StreamableServerTransport>,
}

impl StreamableHttpServer {
    /// Create a server with the given config.
    pub fn new(config: StreamableHttpServerConfig) -> Self {
        let (accept_tx, accepted) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(HttpServerState {
                config,
                sessions: DashMap::new(),
                accept_tx,
            }),
            accepted: Mutex::new(accepted),
        }
    }

    /// Axum router serving the MCP endpoint at `/`.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", any(handle))
            .with_state(self.state.clone())
    }

    /// Next incoming session, or `None` when the server is dropped.
    pub async fn accept(&self) -> Option<StreamableServerTransport> {
        self.accepted.lock().await.recv().await
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.state.sessions.len()
    }
}

/// One event retained for replay.
struct StoredEvent {
    id: u64,
    payload: String,
}

/// Live delivery targets of a session.
#[derive(Default)]
struct SessionSinks {
    /// Per-request SSE streams, keyed by the request id they answer
    requests: HashMap<RequestId, mpsc::UnboundedSender<SseEvent>>,
    /// Standalone GET stream (also serves resumption catch-up)
    standalone: Option<mpsc::UnboundedSender<SseEvent>>,
    terminated: bool,
}

struct HttpSession {
    id: String,
    next_event_id: AtomicU64,
    replay_buffer: usize,
    replay: SyncMutex<VecDeque<StoredEvent>>,
    sinks: SyncMutex<SessionSinks>,
    /// Sender feeding the transport's read loop; dropped on terminate so the
    /// session observes end-of-stream.
    incoming_tx: SyncMutex<Option<mpsc::UnboundedSender<JsonRpcMessage>>>,
}

impl HttpSession {
    fn new(id: String, replay_buffer: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<JsonRpcMessage>) {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            id,
            next_event_id: AtomicU64::new(1),
            replay_buffer,
            replay: SyncMutex::new(VecDeque::new()),
            sinks: SyncMutex::new(SessionSinks::default()),
            incoming_tx: SyncMutex::new(Some(incoming_tx)),
        });
        (session, incoming_rx)
    }

    /// Feed one inbound message to the session. `false` once terminated.
    fn push_incoming(&self, message: JsonRpcMessage) -> bool {
        match self.incoming_tx.lock().as_ref() {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    /// Stamp a message with the next event id and remember it for replay.
    fn store(&self, message: &JsonRpcMessage) -> Result<SseEvent> {
        let payload = message.encode()?;
        let id = self.next_event_id.fetch_add(1, Ordering::SeqCst);
        let mut replay = self.replay.lock();
        replay.push_back(StoredEvent {
            id,
            payload: payload.clone(),
        });
        while replay.len() > self.replay_buffer {
            replay.pop_front();
        }
        Ok(SseEvent::with_id(id.to_string(), payload))
    }

    /// Route one outbound message to the stream it belongs to.
    fn deliver(&self, message: JsonRpcMessage) -> Result<()> {
        let event = self.store(&message)?;
        let mut sinks = self.sinks.lock();
        if sinks.terminated {
            return Err(Error::Closed);
        }
        match &message {
            JsonRpcMessage::Response(response) => {
                // The response closes its request stream; a resumed client
                // picks it up from the standalone/replay path instead.
                if let Some(stream) = sinks.requests.remove(&response.id) {
                    let _ = stream.send(event);
                } else if let Some(standalone) = &sinks.standalone {
                    let _ = standalone.send(event);
                }
            }
            _ => {
                if let Some(standalone) = &sinks.standalone {
                    if standalone.send(event).is_err() {
                        sinks.standalone = None;
                    }
                }
            }
        }
        Ok(())
    }

    /// Events stored strictly after `last`, for resumption.
    fn replay_after(&self, last: u64) -> Vec<SseEvent> {
        self.replay
            .lock()
            .iter()
            .filter(|stored| stored.id > last)
            .map(|stored| SseEvent::with_id(stored.id.to_string(), stored.payload.clone()))
            .collect()
    }

    fn terminate(&self) {
        let mut sinks = self.sinks.lock();
        sinks.terminated = true;
        sinks.requests.clear();
        sinks.standalone = None;
        drop(sinks);
        // Closing the incoming channel ends the session's read loop.
        self.incoming_tx.lock().take();
    }
}

/// The server-side [`Transport`] for one Streamable HTTP session.
pub struct StreamableServerTransport {
    session: Arc<HttpSession>,
    state: Arc<HttpServerState>,
    incoming: Mutex<mpsc::UnboundedReceiver<JsonRpcMessage>>,
}

impl StreamableServerTransport {
    /// The session id the client echoes in `Mcp-Session-Id`.
    pub fn session_id(&self) -> &str {
        &self.session.id
    }
}

#[async_trait]
impl Transport for StreamableServerTransport {
    async fn send(&self, message: JsonRpcMessage) -> Result<()> {
        self.session.deliver(message)
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

const ALLOW_VERBS: &str = "GET, POST, DELETE";

async fn handle(
    State(state): State<Arc<HttpServerState>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match method {
        Method::POST => handle_post(state, headers, body).await,
        Method::GET => handle_get(state, headers),
        Method::DELETE => handle_delete(state, headers),
        _ => method_not_allowed(),
    }
}

fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, ALLOW_VERBS)],
        "method not allowed",
    )
        .into_response()
}

fn header_value<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn session_of(
    state: &HttpServerState,
    headers: &HeaderMap,
) -> std::result::Result<Arc<HttpSession>, Response> {
    let id = header_value(headers, SESSION_ID_HEADER).ok_or_else(|| {
        (StatusCode::BAD_REQUEST, "missing Mcp-Session-Id header").into_response()
    })?;
    state
        .sessions
        .get(id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| (StatusCode::NOT_FOUND, "session not found").into_response())
}

async fn handle_post(state: Arc<HttpServerState>, headers: HeaderMap, body: Bytes) -> Response {
    if body.len() > state.config.max_body_bytes {
        return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response();
    }
    let message = match JsonRpcMessage::decode(&body) {
        Ok(message) => message,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    let is_initialize = matches!(
        &message,
        JsonRpcMessage::Request(r) if r.method == methods::INITIALIZE
    );
    if is_initialize {
        return handle_initialize(state, message).await;
    }

    let session = match session_of(&state, &headers) {
        Ok(session) => session,
        Err(response) => return response,
    };

    match message {
        JsonRpcMessage::Request(request) => {
            let (tx, rx) = mpsc::unbounded_channel();
            {
                let mut sinks = session.sinks.lock();
                if sinks.terminated {
                    return (StatusCode::NOT_FOUND, "session terminated").into_response();
                }
                sinks.requests.insert(request.id.clone(), tx);
            }
            if !session.push_incoming(JsonRpcMessage::Request(request)) {
                return (StatusCode::NOT_FOUND, "session terminated").into_response();
            }
            sse_response(&session.id, Vec::new(), rx)
        }
        other => {
            if !session.push_incoming(other) {
                return (StatusCode::BAD_REQUEST, "message not handled").into_response();
            }
            (StatusCode::ACCEPTED, "").into_response()
        }
    }
}

async fn handle_initialize(state: Arc<HttpServerState>, message: JsonRpcMessage) -> Response {
    let request_id = match message.id() {
        Some(id) => id.clone(),
        None => return (StatusCode::BAD_REQUEST, "missing id").into_response(),
    };

    let session_id = Uuid::new_v4().simple().to_string();
    let (session, incoming_rx) =
        HttpSession::new(session_id.clone(), state.config.replay_buffer);

    // The initialize POST answers with a plain JSON body, so register a
    // request sink and wait for the serving side to produce the response.
    let (tx, mut rx) = mpsc::unbounded_channel();
    session
        .sinks
        .lock()
        .requests
        .insert(request_id.clone(), tx);
    session.push_incoming(message);

    state.sessions.insert(session_id.clone(), session.clone());
    let transport = StreamableServerTransport {
        session: session.clone(),
        state: state.clone(),
        incoming: Mutex::new(incoming_rx),
    };
    if state.accept_tx.send(transport).is_err() {
        state.sessions.remove(&session_id);
        return (StatusCode::INTERNAL_SERVER_ERROR, "server shutting down").into_response();
    }

    let response = tokio::time::timeout(state.config.initialize_timeout, rx.recv()).await;
    match response {
        Ok(Some(event)) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE.as_str(), "application/json"),
                (SESSION_ID_HEADER, session_id.as_str()),
            ],
            event.data,
        )
            .into_response(),
        Ok(None) | Err(_) => {
            warn!(session_id, "initialize produced no response");
            session.terminate();
            state.sessions.remove(&session_id);
            (StatusCode::INTERNAL_SERVER_ERROR, "initialize failed").into_response()
        }
    }
}

fn handle_get(state: Arc<HttpServerState>, headers: HeaderMap) -> Response {
    let session = match session_of(&state, &headers) {
        Ok(session) => session,
        Err(response) => return response,
    };

    let last_event_id = header_value(&headers, LAST_EVENT_ID_HEADER)
        .and_then(|value| value.parse::<u64>().ok());

    let (tx, rx) = mpsc::unbounded_channel();
    let backlog = match last_event_id {
        Some(last) => session.replay_after(last),
        None => Vec::new(),
    };
    {
        let mut sinks = session.sinks.lock();
        if sinks.terminated {
            return (StatusCode::NOT_FOUND, "session terminated").into_response();
        }
        sinks.standalone = Some(tx);
    }
    debug!(
        session_id = session.id,
        resumed = last_event_id.is_some(),
        replayed = backlog.len(),
        "standalone stream attached"
    );
    sse_response(&session.id, backlog, rx)
}

fn handle_delete(state: Arc<HttpServerState>, headers: HeaderMap) -> Response {
    let session = match session_of(&state, &headers) {
        Ok(session) => session,
        Err(response) => return response,
    };
    session.terminate();
    state.sessions.remove(&session.id);
    debug!(session_id = session.id, "session deleted");
    StatusCode::OK.into_response()
}

/// Build a `text/event-stream` response from a backlog plus a live channel.
fn sse_response(
    session_id: &str,
    backlog: Vec<SseEvent>,
    mut live: mpsc::UnboundedReceiver<SseEvent>,
) -> Response {
    let stream = async_stream::stream! {
        for event in backlog {
            yield Ok::<_, Infallible>(Bytes::from(event.encode()));
        }
        while let Some(event) = live.recv().await {
            yield Ok(Bytes::from(event.encode()));
        }
    };
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-store")
        .header(SESSION_ID_HEADER, session_id)
        .body(Body::from_stream(stream))
        .expect("static header set is valid")
}
