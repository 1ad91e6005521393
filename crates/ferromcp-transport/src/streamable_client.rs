//! Streamable HTTP client transport.
//!
//! One URL, three interaction patterns: request POSTs answered with JSON or
//! SSE bodies, notification POSTs answered `202`, and a standalone GET
//! stream for server-initiated traffic. Broken SSE streams are resumed with
//! `Last-Event-ID` under an exponential backoff whose retry budget only
//! spends on attempts that make no progress; a stream that dies before its
//! first event fails fast instead of resuming.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex as SyncMutex;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Response, StatusCode};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use ferromcp_protocol::jsonrpc::{JsonRpcError, JsonRpcErrorCode, JsonRpcResponse};
use ferromcp_protocol::{methods, Error, JsonRpcMessage, RequestId, Result};

use crate::sse::SseParser;
use crate::{Transport, LAST_EVENT_ID_HEADER, PROTOCOL_VERSION_HEADER, SESSION_ID_HEADER};

/// Streamable HTTP client configuration.
#[derive(Clone, Debug)]
pub struct StreamableHttpClientConfig {
    /// The MCP endpoint URL
    pub url: String,
    /// Strict conformance mode (see module docs on `202` and GET statuses)
    pub strict: bool,
    /// Reconnect attempts allowed without Last-Event-ID progress is
    /// `max_retries + 1`
    pub max_retries: u32,
    /// First reconnect delay; doubles per attempt
    pub reconnect_initial_delay: Duration,
    /// Ceiling for the reconnect delay
    pub reconnect_max_delay: Duration,
}

impl StreamableHttpClientConfig {
    /// Config for the given endpoint with lenient defaults.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            strict: false,
            max_retries: 3,
            reconnect_initial_delay: Duration::from_millis(500),
            reconnect_max_delay: Duration::from_secs(30),
        }
    }

    /// Enable strict conformance mode.
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }
}

/// Client-side Streamable HTTP [`Transport`].
pub struct StreamableHttpClient {
    inner: Arc<ClientInner>,
    incoming: Mutex<mpsc::UnboundedReceiver<JsonRpcMessage>>,
}

struct ClientInner {
    http: reqwest::Client,
    config: StreamableHttpClientConfig,
    session_id: SyncMutex<Option<String>>,
    protocol_version: SyncMutex<Option<String>>,
    incoming_tx: mpsc::UnboundedSender<JsonRpcMessage>,
    broken: AtomicBool,
    standalone_started: AtomicBool,
    closed: CancellationToken,
}

impl StreamableHttpClient {
    /// Create a client for the given endpoint. No traffic flows until the
    /// session layer sends `initialize`.
    pub fn new(config: StreamableHttpClientConfig) -> Self {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(ClientInner {
                http: reqwest::Client::new(),
                config,
                session_id: SyncMutex::new(None),
                protocol_version: SyncMutex::new(None),
                incoming_tx,
                broken: AtomicBool::new(false),
                standalone_started: AtomicBool::new(false),
                closed: CancellationToken::new(),
            }),
            incoming: Mutex::new(incoming_rx),
        }
    }

    /// Session id assigned by the server, once initialized.
    pub fn session_id(&self) -> Option<String> {
        self.inner.session_id.lock().clone()
    }
}

#[async_trait]
impl Transport for StreamableHttpClient {
    async fn send(&self, message: JsonRpcMessage) -> Result<()> {
        if self.inner.broken.load(Ordering::SeqCst) {
            return Err(Error::TransportFatal("session broken".to_string()));
        }
        match message {
            JsonRpcMessage::Request(request) if request.method == methods::INITIALIZE => {
                self.inner.clone().post_initialize(request).await
            }
            JsonRpcMessage::Request(request) => {
                self.inner.clone().post_request(request).await
            }
            other => self.inner.clone().post_oneway(other).await,
        }
    }

    async fn receive(&self) -> Result<Option<JsonRpcMessage>> {
        Ok(self.incoming.lock().await.recv().await)
    }

    async fn close(&self) -> Result<()> {
        self.inner.closed.cancel();
        // Redundant DELETEs (404/405) are tolerated.
        let session_id = self.inner.session_id.lock().clone();
        if let Some(session_id) = session_id {
            let result = self
                .inner
                .http
                .delete(&self.inner.config.url)
                .header(SESSION_ID_HEADER, &session_id)
                .send()
                .await;
            if let Err(e) = result {
                debug!(error = %e, "session delete failed");
            }
        }
        Ok(())
    }
}

impl ClientInner {
    fn post_builder(&self, body: String) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .post(&self.config.url)
            .header(ACCEPT, "application/json, text/event-stream")
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(session_id) = self.session_id.lock().as_deref() {
            builder = builder.header(SESSION_ID_HEADER, session_id);
        }
        if let Some(version) = self.protocol_version.lock().as_deref() {
            builder = builder.header(PROTOCOL_VERSION_HEADER, version);
        }
        builder
    }

    /// Classify a non-success status on a request POST.
    ///
    /// `401`/`404` are fatal and mark the session broken; timeouts, `429`,
    /// and `5xx` surface to the caller but leave the session usable.
    fn status_error(&self, status: StatusCode) -> Error {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND => {
                self.broken.store(true, Ordering::SeqCst);
                Error::TransportFatal(format!("request rejected with {status}"))
            }
            _ => Error::Transport(format!("request failed with {status}")),
        }
    }

    fn push(&self, message: JsonRpcMessage) {
        let _ = self.incoming_tx.send(message);
    }

    /// Complete a call locally with a synthetic error response.
    fn fail_request(&self, id: RequestId, message: String) {
        let error = JsonRpcError {
            code: JsonRpcErrorCode::InternalError.code(),
            message,
            data: None,
        };
        self.push(JsonRpcResponse::error(error, id).into());
    }

    /// `initialize` is answered inline so the session id and negotiated
    /// protocol version can be captured before any other call goes out.
    async fn post_initialize(self: Arc<Self>, request: ferromcp_protocol::JsonRpcRequest) -> Result<()> {
        let request_id = request.id.clone();
        let body = JsonRpcMessage::Request(request).encode()?;
        let response = self
            .post_builder(body)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("initialize POST failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.status_error(status));
        }
        if let Some(session_id) = header_str(&response, SESSION_ID_HEADER) {
            *self.session_id.lock() = Some(session_id);
        }

        let content_type = header_str(&response, CONTENT_TYPE.as_str()).unwrap_or_default();
        if content_type.starts_with("text/event-stream") {
            // Single-response SSE body: the first response event completes
            // the handshake.
            let inner = self.clone();
            tokio::spawn(async move {
                inner.consume_sse_body(response, request_id).await;
            });
            return Ok(());
        }

        let text = response
            .text()
            .await
            .map_err(|e| Error::Transport(format!("initialize body read failed: {e}")))?;
        let decoded = JsonRpcMessage::decode(text.as_bytes())?;
        if let JsonRpcMessage::Response(inner_response) = &decoded {
            self.record_protocol_version(inner_response);
        }
        self.push(decoded);
        Ok(())
    }

    fn record_protocol_version(&self, response: &JsonRpcResponse) {
        if let Some(version) = response
            .result()
            .and_then(|r| r.get("protocolVersion"))
            .and_then(|v| v.as_str())
        {
            *self.protocol_version.lock() = Some(version.to_string());
        }
    }

    /// POST a request; the body (JSON or SSE) is consumed in the background
    /// and routed through the incoming queue.
    async fn post_request(self: Arc<Self>, request: ferromcp_protocol::JsonRpcRequest) -> Result<()> {
        let request_id = request.id.clone();
        let body = JsonRpcMessage::Request(request).encode()?;
        let response = self
            .post_builder(body)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("request POST failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.status_error(status));
        }

        let content_type = header_str(&response, CONTENT_TYPE.as_str()).unwrap_or_default();
        let inner = self.clone();
        if content_type.starts_with("text/event-stream") {
            tokio::spawn(async move { inner.consume_sse_body(response, request_id).await });
        } else {
            tokio::spawn(async move {
                match response.text().await {
                    Ok(text) => match JsonRpcMessage::decode(text.as_bytes()) {
                        Ok(message) => inner.push(message),
                        Err(e) => inner.fail_request(request_id, format!("bad response body: {e}")),
                    },
                    Err(e) => {
                        inner.fail_request(request_id, format!("response body read failed: {e}"))
                    }
                }
            });
        }
        Ok(())
    }

    /// POST a notification or response; the server answers `202 Accepted`.
    async fn post_oneway(self: Arc<Self>, message: JsonRpcMessage) -> Result<()> {
        let is_initialized = message.method() == Some(methods::INITIALIZED);
        let body = message.encode()?;
        let response = self
            .post_builder(body)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("notification POST failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.status_error(status));
        }
        if is_initialized && self.config.strict && status != StatusCode::ACCEPTED {
            self.broken.store(true, Ordering::SeqCst);
            return Err(Error::TransportFatal(format!(
                "handshake failure: initialized notification answered {status}, expected 202"
            )));
        }

        if is_initialized && !self.standalone_started.swap(true, Ordering::SeqCst) {
            let inner = self.clone();
            tokio::spawn(async move { inner.standalone_loop().await });
        }
        Ok(())
    }

    fn get_builder(&self, last_event_id: Option<&str>) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .get(&self.config.url)
            .header(ACCEPT, "text/event-stream");
        if let Some(session_id) = self.session_id.lock().as_deref() {
            builder = builder.header(SESSION_ID_HEADER, session_id);
        }
        if let Some(version) = self.protocol_version.lock().as_deref() {
            builder = builder.header(PROTOCOL_VERSION_HEADER, version);
        }
        if let Some(last) = last_event_id {
            builder = builder.header(LAST_EVENT_ID_HEADER, last);
        }
        builder
    }

    /// Consume one SSE response body for `request_id`, resuming on breaks.
    ///
    /// The retry budget spends only on attempts without progress: any event
    /// carrying a fresh id resets it. A stream that dies before any event
    /// (and before the response) is unresumable and fails immediately.
    async fn consume_sse_body(self: Arc<Self>, response: Response, request_id: RequestId) {
        let mut last_event_id: Option<String> = None;
        let mut attempts: u32 = 0;
        let mut delay = self.config.reconnect_initial_delay;
        let mut current = Some(response);

        loop {
            if let Some(response) = current.take() {
                match self
                    .drain_stream(response, &mut last_event_id, &mut attempts, &mut delay, Some(&request_id))
                    .await
                {
                    StreamOutcome::Done => return,
                    StreamOutcome::Cancelled => return,
                    StreamOutcome::Broke => {}
                }
                if last_event_id.is_none() {
                    // No event id to resume from: fail fast.
                    self.fail_request(
                        request_id,
                        "stream terminated without response".to_string(),
                    );
                    return;
                }
            }

            // Backoff, then reconnect with Last-Event-ID.
            if attempts >= self.config.max_retries + 1 {
                self.fail_request(
                    request_id,
                    format!(
                        "exceeded retries: {attempts} reconnect attempts without progress"
                    ),
                );
                return;
            }
            attempts += 1;
            tokio::select! {
                _ = self.closed.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            delay = (delay * 2).min(self.config.reconnect_max_delay);

            match self.get_builder(last_event_id.as_deref()).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(attempts, "resumed stream");
                    current = Some(response);
                }
                Ok(response) => {
                    warn!(status = %response.status(), "resume GET rejected");
                }
                Err(e) => {
                    warn!(error = %e, "resume GET failed");
                }
            }
        }
    }

    /// Read one SSE body to completion, pushing decoded messages.
    async fn drain_stream(
        &self,
        response: Response,
        last_event_id: &mut Option<String>,
        attempts: &mut u32,
        delay: &mut Duration,
        wanted_response: Option<&RequestId>,
    ) -> StreamOutcome {
        let mut parser = SseParser::new();
        let mut stream = response.bytes_stream();
        loop {
            let chunk = tokio::select! {
                _ = self.closed.cancelled() => return StreamOutcome::Cancelled,
                chunk = stream.next() => chunk,
            };
            let chunk = match chunk {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    debug!(error = %e, "sse stream broke");
                    return StreamOutcome::Broke;
                }
                None => return StreamOutcome::Broke,
            };
            for event in parser.feed(&chunk) {
                if let Some(id) = &event.id {
                    if last_event_id.as_deref() != Some(id.as_str()) {
                        *last_event_id = Some(id.clone());
                        *attempts = 0;
                        *delay = self.config.reconnect_initial_delay;
                    }
                }
                match JsonRpcMessage::decode(event.data.as_bytes()) {
                    Ok(message) => {
                        let finishes_call = matches!(
                            (&message, wanted_response),
                            (JsonRpcMessage::Response(r), Some(wanted)) if &r.id == wanted
                        );
                        if let JsonRpcMessage::Response(r) = &message {
                            if r.result().is_some() && self.protocol_version.lock().is_none() {
                                self.record_protocol_version(r);
                            }
                        }
                        self.push(message);
                        if finishes_call {
                            return StreamOutcome::Done;
                        }
                    }
                    Err(e) => warn!(error = %e, "undecodable sse event"),
                }
            }
        }
    }

    /// Long-lived GET for server-initiated requests and notifications.
    async fn standalone_loop(self: Arc<Self>) {
        let mut last_event_id: Option<String> = None;
        let mut delay = self.config.reconnect_initial_delay;
        loop {
            if self.closed.is_cancelled() {
                return;
            }
            let response = match self.get_builder(last_event_id.as_deref()).send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!(error = %e, "standalone GET failed");
                    tokio::select! {
                        _ = self.closed.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    delay = (delay * 2).min(self.config.reconnect_max_delay);
                    continue;
                }
            };

            let status = response.status();
            match status {
                StatusCode::METHOD_NOT_ALLOWED => {
                    // Server has no standalone stream; that is fine.
                    debug!("standalone stream unsupported (405)");
                    return;
                }
                status if status.is_success() => {
                    delay = self.config.reconnect_initial_delay;
                    let mut attempts = 0;
                    match self
                        .drain_stream(response, &mut last_event_id, &mut attempts, &mut delay, None)
                        .await
                    {
                        StreamOutcome::Cancelled => return,
                        StreamOutcome::Done | StreamOutcome::Broke => {}
                    }
                }
                status if status.is_server_error() => {
                    // 5xx always errors, in both modes.
                    warn!(%status, "standalone stream server error");
                    self.broken.store(true, Ordering::SeqCst);
                    return;
                }
                status if self.config.strict => {
                    // Strict mode accepts only 200 and 405 here.
                    warn!(%status, "standalone stream broke session (strict)");
                    self.broken.store(true, Ordering::SeqCst);
                    return;
                }
                status => {
                    // Lenient: 4xx means no standalone stream; ignore it.
                    debug!(%status, "standalone stream unavailable");
                    return;
                }
            }

            tokio::select! {
                _ = self.closed.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            delay = (delay * 2).min(self.config.reconnect_max_delay);
        }
    }
}

enum StreamOutcome {
    /// The awaited response arrived; the stream is finished.
    Done,
    /// The connection dropped mid-stream.
    Broke,
    /// The transport was closed locally.
    Cancelled,
}

fn header_str(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
