//! Client session core: handshake, dispatcher, typed operations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use ferromcp_core::session::{
    InFlightTable, KeepaliveHandle, SessionState, StateCell, WaitGroup,
};
use ferromcp_protocol::jsonrpc::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use ferromcp_protocol::types::{
    CallToolRequest, CallToolResult, CancelTaskRequest, CancelledNotification, CompleteRequest,
    CompleteResult, CreateTaskResult, EmptyResult, GetPromptRequest, GetPromptResult,
    GetTaskRequest, InitializeRequest, InitializeResult, ListPromptsRequest, ListPromptsResult,
    ListResourceTemplatesRequest, ListResourceTemplatesResult, ListResourcesRequest,
    ListResourcesResult, ListTasksRequest, ListTasksResult, ListToolsRequest, ListToolsResult,
    LoggingLevel, ReadResourceRequest, ReadResourceResult, SetLevelRequest, SubscribeRequest,
    Task, TaskMetadata,
};
use ferromcp_protocol::{
    methods, Error, JsonRpcMessage, RequestId, Result, LATEST_PROTOCOL_VERSION,
};
use ferromcp_transport::Transport;

use crate::ClientOptions;

/// Handle to one connected client session.
#[derive(Clone)]
pub struct ClientSession {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    options: ClientOptions,
    transport: Arc<dyn Transport>,
    state: StateCell,
    in_flight: InFlightTable,
    keepalive: KeepaliveHandle,
    running: WaitGroup,
    next_request_id: AtomicI64,
    /// Server-initiated requests being handled locally, for cancellation
    inbound: SyncMutex<HashMap<RequestId, CancellationToken>>,
    init_result: SyncMutex<Option<InitializeResult>>,
    closed: CancellationToken,
}

pub(crate) async fn connect(
    options: ClientOptions,
    transport: Arc<dyn Transport>,
) -> Result<ClientSession> {
    let inner = Arc::new(ClientInner {
        options,
        transport,
        state: StateCell::new(),
        in_flight: InFlightTable::new(),
        keepalive: KeepaliveHandle::new(),
        running: WaitGroup::new(),
        next_request_id: AtomicI64::new(1),
        inbound: SyncMutex::new(HashMap::new()),
        init_result: SyncMutex::new(None),
        closed: CancellationToken::new(),
    });
    inner.state.advance(SessionState::Connecting)?;

    {
        let inner = inner.clone();
        tokio::spawn(async move { read_loop(inner).await });
    }

    inner.state.advance(SessionState::Initializing)?;
    let request = InitializeRequest {
        protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
        capabilities: inner.options.capabilities.clone(),
        client_info: inner.options.implementation.clone(),
    };
    let session = ClientSession { inner };
    let result: InitializeResult = session.request(methods::INITIALIZE, &request).await?;
    debug!(
        protocol_version = result.protocol_version,
        server = result.server_info.name,
        "initialize complete"
    );
    *session.inner.init_result.lock() = Some(result);

    session
        .inner
        .transport
        .send(JsonRpcNotification::new(methods::INITIALIZED, None).into())
        .await?;
    session.inner.state.advance(SessionState::Active)?;

    if let Some(interval) = session.inner.options.keepalive {
        arm_keepalive(session.inner.clone(), interval);
    }
    Ok(session)
}

async fn read_loop(inner: Arc<ClientInner>) {
    let _guard = inner.running.enter();
    loop {
        let received = tokio::select! {
            _ = inner.closed.cancelled() => break,
            received = inner.transport.receive() => received,
        };
        match received {
            Ok(Some(JsonRpcMessage::Response(response))) => {
                let id = response.id.clone();
                if !inner.in_flight.resolve(&id, response) {
                    debug!(%id, "response for unknown request");
                }
            }
            Ok(Some(JsonRpcMessage::Request(request))) => {
                let inner = inner.clone();
                let guard = inner.running.enter();
                tokio::spawn(async move {
                    let _guard = guard;
                    handle_server_request(inner, request).await;
                });
            }
            Ok(Some(JsonRpcMessage::Notification(notification))) => {
                handle_notification(&inner, notification);
            }
            Ok(None) => break,
            Err(e) => match e.kind() {
                ferromcp_protocol::ErrorKind::Protocol => {
                    warn!(error = %e, "undecodable frame");
                }
                _ => {
                    warn!(error = %e, "transport failed");
                    break;
                }
            },
        }
    }
    inner.in_flight.abort_all();
    inner.keepalive.cancel();
    let _ = inner.state.advance(SessionState::Closed);
}

/// Answer a server-initiated request. Ping is the only method this client
/// serves; everything else is method-not-found.
async fn handle_server_request(inner: Arc<ClientInner>, request: JsonRpcRequest) {
    let cancel = CancellationToken::new();
    inner
        .inbound
        .lock()
        .insert(request.id.clone(), cancel.clone());

    let outcome: Result<Value> = match request.method.as_str() {
        methods::PING => serde_json::to_value(EmptyResult::default()).map_err(Error::from),
        other => Err(Error::method_not_found(other)),
    };
    inner.inbound.lock().remove(&request.id);

    let response = match outcome {
        Ok(result) => JsonRpcResponse::success(result, request.id),
        Err(e) => JsonRpcResponse::error(e.to_jsonrpc_error(), request.id),
    };
    if let Err(e) = inner.transport.send(response.into()).await {
        debug!(error = %e, "response send failed");
    }
}

fn handle_notification(inner: &Arc<ClientInner>, notification: JsonRpcNotification) {
    match notification.method.as_str() {
        methods::LOGGING_MESSAGE => {
            let Some(callback) = inner.options.on_log.clone() else {
                return;
            };
            if let Some(params) = notification.params {
                match serde_json::from_value(params) {
                    Ok(message) => callback(message),
                    Err(e) => debug!(error = %e, "bad log notification"),
                }
            }
        }
        methods::TASKS_STATUS => {
            let Some(callback) = inner.options.on_task_status.clone() else {
                return;
            };
            if let Some(params) = notification.params {
                match serde_json::from_value(params) {
                    Ok(status) => callback(status),
                    Err(e) => debug!(error = %e, "bad task status notification"),
                }
            }
        }
        methods::CANCELLED => {
            let Some(params) = notification.params else {
                return;
            };
            if let Ok(cancelled) = serde_json::from_value::<CancelledNotification>(params) {
                if let Some(token) = inner.inbound.lock().get(&cancelled.request_id) {
                    token.cancel();
                }
            }
        }
        other => debug!(method = other, "ignoring notification"),
    }
}

fn arm_keepalive(inner: Arc<ClientInner>, interval: std::time::Duration) {
    let token = CancellationToken::new();
    inner.keepalive.arm(token.clone());
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let ping = tokio::time::timeout(
                interval,
                inner.raw_request(methods::PING, json!({})),
            );
            match ping.await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    warn!(error = %e, "keepalive ping failed; closing");
                    inner.closed.cancel();
                    return;
                }
                Err(_) => {
                    warn!("keepalive ping timed out; closing");
                    inner.closed.cancel();
                    return;
                }
            }
        }
    });
}

impl ClientInner {
    async fn raw_request(&self, method: &str, params: Value) -> Result<Value> {
        if self.state.is_closing() {
            return Err(Error::Closed);
        }
        let id = RequestId::Number(self.next_request_id.fetch_add(1, Ordering::SeqCst));
        let (rx, cancel) = self.in_flight.register(id.clone());
        let request = JsonRpcRequest::new(method, Some(params), id.clone());
        if let Err(e) = self.transport.send(request.into()).await {
            self.in_flight.forget(&id);
            return Err(e);
        }
        tokio::select! {
            // Fires on local cancellation (cancel_pending already told the
            // server) or transport teardown.
            _ = cancel.cancelled() => Err(Error::Closed),
            response = rx => response.map_err(|_| Error::Closed)?.into_result(),
        }
    }

    async fn notify_cancelled(&self, request_id: RequestId, reason: Option<String>) {
        let params = CancelledNotification { request_id, reason };
        if let Ok(notification) =
            JsonRpcNotification::with_params(methods::CANCELLED, &params)
        {
            if let Err(e) = self.transport.send(notification.into()).await {
                debug!(error = %e, "cancelled notification send failed");
            }
        }
    }
}

impl ClientSession {
    async fn request<P: Serialize, R: DeserializeOwned>(&self, method: &str, params: &P) -> Result<R> {
        let value = self
            .inner
            .raw_request(method, serde_json::to_value(params)?)
            .await?;
        serde_json::from_value(value)
            .map_err(|e| Error::internal(format!("malformed {method} result: {e}")))
    }

    /// The server's `initialize` result.
    pub fn initialize_result(&self) -> Option<InitializeResult> {
        self.inner.init_result.lock().clone()
    }

    /// The negotiated protocol version.
    pub fn protocol_version(&self) -> Option<String> {
        self.inner
            .init_result
            .lock()
            .as_ref()
            .map(|r| r.protocol_version.clone())
    }

    /// Whether the handshake completed and traffic flows.
    pub fn is_active(&self) -> bool {
        self.inner.state.is_active()
    }

    /// Ping the server.
    pub async fn ping(&self) -> Result<()> {
        self.inner.raw_request(methods::PING, json!({})).await.map(|_| ())
    }

    /// `tools/list`, one page.
    pub async fn list_tools(&self, cursor: Option<String>) -> Result<ListToolsResult> {
        self.request(methods::TOOLS_LIST, &ListToolsRequest { cursor })
            .await
    }

    /// `tools/call` without task augmentation.
    pub async fn call_tool(&self, name: impl Into<String>, arguments: Value) -> Result<CallToolResult> {
        self.request(
            methods::TOOLS_CALL,
            &CallToolRequest {
                name: name.into(),
                arguments: Some(arguments),
                task: None,
                meta: None,
            },
        )
        .await
    }

    /// `tools/call` augmented into a task; returns immediately with the
    /// working task handle.
    pub async fn call_tool_as_task(
        &self,
        name: impl Into<String>,
        arguments: Value,
        ttl_ms: Option<u64>,
    ) -> Result<CreateTaskResult> {
        self.request(
            methods::TOOLS_CALL,
            &CallToolRequest {
                name: name.into(),
                arguments: Some(arguments),
                task: Some(TaskMetadata { ttl: ttl_ms }),
                meta: None,
            },
        )
        .await
    }

    /// `prompts/list`, one page.
    pub async fn list_prompts(&self, cursor: Option<String>) -> Result<ListPromptsResult> {
        self.request(methods::PROMPTS_LIST, &ListPromptsRequest { cursor })
            .await
    }

    /// `prompts/get`.
    pub async fn get_prompt(
        &self,
        name: impl Into<String>,
        arguments: Option<HashMap<String, String>>,
    ) -> Result<GetPromptResult> {
        self.request(
            methods::PROMPTS_GET,
            &GetPromptRequest {
                name: name.into(),
                arguments,
            },
        )
        .await
    }

    /// `resources/list`, one page.
    pub async fn list_resources(&self, cursor: Option<String>) -> Result<ListResourcesResult> {
        self.request(methods::RESOURCES_LIST, &ListResourcesRequest { cursor })
            .await
    }

    /// `resources/templates/list`, one page.
    pub async fn list_resource_templates(
        &self,
        cursor: Option<String>,
    ) -> Result<ListResourceTemplatesResult> {
        self.request(
            methods::RESOURCE_TEMPLATES_LIST,
            &ListResourceTemplatesRequest { cursor },
        )
        .await
    }

    /// `resources/read`.
    pub async fn read_resource(&self, uri: impl Into<String>) -> Result<ReadResourceResult> {
        self.request(methods::RESOURCES_READ, &ReadResourceRequest { uri: uri.into() })
            .await
    }

    /// `resources/subscribe`.
    pub async fn subscribe_resource(&self, uri: impl Into<String>) -> Result<()> {
        self.request::<_, EmptyResult>(
            methods::RESOURCES_SUBSCRIBE,
            &SubscribeRequest { uri: uri.into() },
        )
        .await
        .map(|_| ())
    }

    /// `resources/unsubscribe`.
    pub async fn unsubscribe_resource(&self, uri: impl Into<String>) -> Result<()> {
        self.request::<_, EmptyResult>(
            methods::RESOURCES_UNSUBSCRIBE,
            &SubscribeRequest { uri: uri.into() },
        )
        .await
        .map(|_| ())
    }

    /// `completion/complete`.
    pub async fn complete(&self, request: CompleteRequest) -> Result<CompleteResult> {
        self.request(methods::COMPLETION_COMPLETE, &request).await
    }

    /// `logging/setLevel`.
    pub async fn set_logging_level(&self, level: LoggingLevel) -> Result<()> {
        self.request::<_, EmptyResult>(methods::LOGGING_SET_LEVEL, &SetLevelRequest { level })
            .await
            .map(|_| ())
    }

    /// `tasks/get`.
    pub async fn get_task(&self, task_id: impl Into<String>) -> Result<Task> {
        self.request(
            methods::TASKS_GET,
            &GetTaskRequest {
                task_id: task_id.into(),
            },
        )
        .await
    }

    /// `tasks/list`, one page.
    pub async fn list_tasks(&self, cursor: Option<String>) -> Result<ListTasksResult> {
        self.request(methods::TASKS_LIST, &ListTasksRequest { cursor })
            .await
    }

    /// `tasks/cancel`.
    pub async fn cancel_task(&self, task_id: impl Into<String>) -> Result<Task> {
        self.request(
            methods::TASKS_CANCEL,
            &CancelTaskRequest {
                task_id: task_id.into(),
            },
        )
        .await
    }

    /// `tasks/result`: blocks until the task is terminal.
    pub async fn task_result(&self, task_id: impl Into<String>) -> Result<CallToolResult> {
        self.request(
            methods::TASKS_RESULT,
            &GetTaskRequest {
                task_id: task_id.into(),
            },
        )
        .await
    }

    /// Abort one outstanding request: the local waiter errors promptly and
    /// `notifications/cancelled` is sent best-effort.
    pub async fn cancel_pending(&self, request_id: RequestId, reason: Option<String>) {
        if self.inner.in_flight.cancel(&request_id) {
            self.inner.notify_cancelled(request_id, reason).await;
        }
    }

    /// Graceful shutdown: stop new outbound requests, let in-flight ones
    /// resolve (bounded), cancel keepalive, close the transport.
    pub async fn close(&self) -> Result<()> {
        if self.inner.state.is_closing() {
            return Ok(());
        }
        let _ = self.inner.state.advance(SessionState::Closing);
        self.inner.keepalive.cancel();

        let grace = self
            .inner
            .options
            .close_timeout
            .unwrap_or(std::time::Duration::from_secs(10));
        let _ = tokio::time::timeout(grace, self.inner.in_flight.drained()).await;
        self.inner.closed.cancel();
        let _ = tokio::time::timeout(grace, self.inner.running.wait()).await;
        let _ = self.inner.transport.close().await;
        let _ = self.inner.state.advance(SessionState::Closed);
        Ok(())
    }

    /// Block until both directions are done: read loop exited and all
    /// in-flight requests resolved.
    pub async fn wait(&self) {
        self.inner.running.wait().await;
        self.inner.in_flight.drained().await;
    }
}
