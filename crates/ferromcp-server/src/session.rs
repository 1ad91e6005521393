//! Server-side session core: the read loop, request dispatch, the
//! initialization handshake, keepalive, and close/wait semantics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use ferromcp_core::pagination::paginate;
use ferromcp_core::session::{
    InFlightTable, InitializedGate, KeepaliveHandle, SessionState, StateCell, WaitGroup,
};
use ferromcp_protocol::jsonrpc::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use ferromcp_protocol::types::{
    CallToolRequest, CancelTaskRequest, CancelledNotification, CompleteRequest,
    CreateTaskResult, EmptyResult, GetPromptRequest, GetTaskRequest, InitializeRequest,
    InitializeResult, ListPromptsRequest, ListResourceTemplatesRequest, ListResourcesRequest,
    ListTasksRequest, ListTasksResult, ListToolsRequest, ListToolsResult, ListPromptsResult,
    ListResourceTemplatesResult, ListResourcesResult, LoggingLevel, LoggingMessageNotification,
    ReadResourceRequest, ResourceUpdatedNotification, SetLevelRequest, SubscribeRequest, Task,
    TaskStatusNotification, TaskSupport,
};
use ferromcp_protocol::{
    methods, negotiate_protocol_version, Error, JsonRpcMessage, RequestId, Result,
};
use ferromcp_transport::Transport;

use crate::server::ServerInner;
use crate::tool::RequestContext;

/// Handle to one served session.
///
/// Cloneable; the session lives as long as its read loop, not this handle.
#[derive(Clone)]
pub struct ServerSession {
    pub(crate) inner: Arc<SessionInner>,
}

pub(crate) struct SessionInner {
    pub id: u64,
    pub server: Arc<ServerInner>,
    pub transport: Arc<dyn Transport>,
    pub state: StateCell,
    pub out_flight: InFlightTable,
    pub initialized: InitializedGate,
    init_answered: AtomicBool,
    pub keepalive: KeepaliveHandle,
    pub running: WaitGroup,
    inbound: SyncMutex<HashMap<RequestId, CancellationToken>>,
    next_request_id: AtomicI64,
    pub protocol_version: SyncMutex<Option<String>>,
    peer_info: SyncMutex<Option<ferromcp_protocol::types::Implementation>>,
    log_level: SyncMutex<LoggingLevel>,
    pub closed: CancellationToken,
}

/// Spawn the read loop for a fresh session and hand back its handle.
pub(crate) fn serve_session(
    server: Arc<ServerInner>,
    transport: Arc<dyn Transport>,
) -> ServerSession {
    let id = server.next_session_id.fetch_add(1, Ordering::SeqCst);
    let inner = Arc::new(SessionInner {
        id,
        server,
        transport,
        state: StateCell::new(),
        out_flight: InFlightTable::new(),
        initialized: InitializedGate::new(),
        init_answered: AtomicBool::new(false),
        keepalive: KeepaliveHandle::new(),
        running: WaitGroup::new(),
        inbound: SyncMutex::new(HashMap::new()),
        next_request_id: AtomicI64::new(1),
        protocol_version: SyncMutex::new(None),
        peer_info: SyncMutex::new(None),
        log_level: SyncMutex::new(LoggingLevel::Debug),
        closed: CancellationToken::new(),
    });

    let _ = inner.state.advance(SessionState::Connecting);
    {
        let inner = inner.clone();
        tokio::spawn(async move { read_loop(inner).await });
    }
    ServerSession { inner }
}

async fn read_loop(inner: Arc<SessionInner>) {
    let _guard = inner.running.enter();
    loop {
        let received = tokio::select! {
            _ = inner.closed.cancelled() => break,
            received = inner.transport.receive() => received,
        };
        match received {
            Ok(Some(JsonRpcMessage::Request(request))) => {
                let inner = inner.clone();
                let guard = inner.running.enter();
                tokio::spawn(async move {
                    let _guard = guard;
                    handle_request(inner, request).await;
                });
            }
            Ok(Some(JsonRpcMessage::Notification(notification))) => {
                handle_notification(&inner, notification);
            }
            Ok(Some(JsonRpcMessage::Response(response))) => {
                let id = response.id.clone();
                if !inner.out_flight.resolve(&id, response) {
                    debug!(session = inner.id, %id, "response for unknown request");
                }
            }
            Ok(None) => break,
            Err(e) => match e.kind() {
                // Malformed frames are logged; the connection survives them.
                ferromcp_protocol::ErrorKind::Protocol => {
                    warn!(session = inner.id, error = %e, "undecodable frame");
                }
                _ => {
                    warn!(session = inner.id, error = %e, "transport failed");
                    break;
                }
            },
        }
    }
    inner.teardown();
}

async fn handle_request(inner: Arc<SessionInner>, request: JsonRpcRequest) {
    let cancel = CancellationToken::new();
    inner
        .inbound
        .lock()
        .insert(request.id.clone(), cancel.clone());

    let outcome = tokio::select! {
        _ = cancel.cancelled() => Err(Error::invalid_request("request cancelled")),
        outcome = dispatch(&inner, &request, cancel.clone()) => outcome,
    };
    inner.inbound.lock().remove(&request.id);

    let response = match outcome {
        Ok(result) => JsonRpcResponse::success(result, request.id),
        Err(e) => JsonRpcResponse::error(e.to_jsonrpc_error(), request.id),
    };
    if let Err(e) = inner.transport.send(response.into()).await {
        debug!(session = inner.id, error = %e, "response send failed");
    }
}

fn handle_notification(inner: &Arc<SessionInner>, notification: JsonRpcNotification) {
    match notification.method.as_str() {
        methods::INITIALIZED => {
            if !inner.initialized.fire() {
                // Second `initialized` is a protocol violation; keepalive in
                // particular must not be re-armed.
                warn!(session = inner.id, "duplicate initialized notification");
                return;
            }
            let _ = inner.state.advance(SessionState::Active);
            debug!(session = inner.id, "session active");
            if let Some(interval) = inner.server.options.keepalive {
                arm_keepalive(inner.clone(), interval);
            }
        }
        methods::CANCELLED => {
            let Some(params) = notification.params else {
                return;
            };
            match serde_json::from_value::<CancelledNotification>(params) {
                Ok(cancelled) => {
                    debug!(
                        session = inner.id,
                        request = %cancelled.request_id,
                        reason = cancelled.reason.as_deref().unwrap_or(""),
                        "peer cancelled request"
                    );
                    if let Some(token) = inner.inbound.lock().get(&cancelled.request_id) {
                        token.cancel();
                    }
                }
                Err(e) => debug!(session = inner.id, error = %e, "bad cancelled notification"),
            }
        }
        other => {
            debug!(session = inner.id, method = other, "ignoring notification");
        }
    }
}

/// Keepalive: issue `ping` every `interval`; a ping that does not come back
/// within the interval closes the session. Armed exactly once per session.
fn arm_keepalive(inner: Arc<SessionInner>, interval: std::time::Duration) {
    let token = CancellationToken::new();
    inner.keepalive.arm(token.clone());
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await; // immediate first tick
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let ping = tokio::time::timeout(interval, inner.request(methods::PING, json!({})));
            match ping.await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    warn!(session = inner.id, error = %e, "keepalive ping failed; closing");
                    inner.shutdown_now();
                    return;
                }
                Err(_) => {
                    warn!(session = inner.id, "keepalive ping timed out; closing");
                    inner.shutdown_now();
                    return;
                }
            }
        }
    });
}

fn parse_params<T: DeserializeOwned>(request: &JsonRpcRequest) -> Result<T> {
    let params = request
        .params
        .clone()
        .ok_or_else(|| Error::invalid_params("missing params"))?;
    serde_json::from_value(params).map_err(|e| Error::invalid_params(format!("invalid params: {e}")))
}

fn parse_params_or_default<T: DeserializeOwned + Default>(request: &JsonRpcRequest) -> Result<T> {
    match request.params.clone() {
        None => Ok(T::default()),
        Some(params) => serde_json::from_value(params)
            .map_err(|e| Error::invalid_params(format!("invalid params: {e}"))),
    }
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

async fn dispatch(
    inner: &Arc<SessionInner>,
    request: &JsonRpcRequest,
    cancel: CancellationToken,
) -> Result<Value> {
    match request.method.as_str() {
        methods::INITIALIZE => handle_initialize(inner, request),
        // Ping is answered in any state; keepalive depends on it.
        methods::PING => to_value(EmptyResult::default()),
        _ if !inner.state.is_active() => Err(Error::invalid_request(
            "request received before initialization completed",
        )),
        methods::TOOLS_LIST => {
            let params: ListToolsRequest = parse_params_or_default(request)?;
            let page = {
                let tools = inner.server.tools.lock();
                paginate(&tools, params.cursor.as_deref(), inner.server.options.page_size)?
            };
            to_value(ListToolsResult {
                tools: page.items.into_iter().map(|t| t.tool).collect(),
                next_cursor: page.next_cursor,
            })
        }
        methods::TOOLS_CALL => handle_tool_call(inner, request, cancel).await,
        methods::PROMPTS_LIST => {
            let params: ListPromptsRequest = parse_params_or_default(request)?;
            let page = {
                let prompts = inner.server.prompts.lock();
                paginate(&prompts, params.cursor.as_deref(), inner.server.options.page_size)?
            };
            to_value(ListPromptsResult {
                prompts: page.items.into_iter().map(|p| p.prompt).collect(),
                next_cursor: page.next_cursor,
            })
        }
        methods::PROMPTS_GET => {
            let params: GetPromptRequest = parse_params(request)?;
            let registered = inner
                .server
                .prompts
                .lock()
                .get(&params.name)
                .cloned()
                .ok_or_else(|| Error::invalid_params(format!("unknown prompt: {}", params.name)))?;
            to_value((registered.handler)(params).await?)
        }
        methods::RESOURCES_LIST => {
            let params: ListResourcesRequest = parse_params_or_default(request)?;
            let page = {
                let resources = inner.server.resources.lock();
                paginate(&resources, params.cursor.as_deref(), inner.server.options.page_size)?
            };
            to_value(ListResourcesResult {
                resources: page.items.into_iter().map(|r| r.resource).collect(),
                next_cursor: page.next_cursor,
            })
        }
        methods::RESOURCE_TEMPLATES_LIST => {
            let params: ListResourceTemplatesRequest = parse_params_or_default(request)?;
            let page = {
                let templates = inner.server.templates.lock();
                paginate(&templates, params.cursor.as_deref(), inner.server.options.page_size)?
            };
            to_value(ListResourceTemplatesResult {
                resource_templates: page.items.into_iter().map(|t| t.template).collect(),
                next_cursor: page.next_cursor,
            })
        }
        methods::RESOURCES_READ => {
            let params: ReadResourceRequest = parse_params(request)?;
            let reader = lookup_reader(inner, &params.uri)?;
            to_value(reader(params).await?)
        }
        methods::RESOURCES_SUBSCRIBE => {
            let params: SubscribeRequest = parse_params(request)?;
            let handler = inner
                .server
                .subscribe
                .lock()
                .clone()
                .ok_or_else(|| Error::method_not_found(methods::RESOURCES_SUBSCRIBE))?;
            handler(params).await?;
            to_value(EmptyResult::default())
        }
        methods::RESOURCES_UNSUBSCRIBE => {
            let params: SubscribeRequest = parse_params(request)?;
            let handler = inner
                .server
                .unsubscribe
                .lock()
                .clone()
                .ok_or_else(|| Error::method_not_found(methods::RESOURCES_UNSUBSCRIBE))?;
            handler(params).await?;
            to_value(EmptyResult::default())
        }
        methods::COMPLETION_COMPLETE => {
            let params: CompleteRequest = parse_params(request)?;
            let handler = inner
                .server
                .completion
                .lock()
                .clone()
                .ok_or_else(|| Error::method_not_found(methods::COMPLETION_COMPLETE))?;
            to_value(handler(params).await?)
        }
        methods::LOGGING_SET_LEVEL => {
            let params: SetLevelRequest = parse_params(request)?;
            *inner.log_level.lock() = params.level;
            to_value(EmptyResult::default())
        }
        methods::TASKS_GET => {
            let params: GetTaskRequest = parse_params(request)?;
            to_value(inner.server.tasks.get(inner.id, &params.task_id)?)
        }
        methods::TASKS_LIST => {
            let params: ListTasksRequest = parse_params_or_default(request)?;
            let (tasks, next_cursor) = inner.server.tasks.list(
                inner.id,
                params.cursor.as_deref(),
                inner.server.options.page_size,
            )?;
            to_value(ListTasksResult { tasks, next_cursor })
        }
        methods::TASKS_CANCEL => {
            let params: CancelTaskRequest = parse_params(request)?;
            let task = inner.server.tasks.cancel(inner.id, &params.task_id)?;
            inner.notify_task_status(&task);
            to_value(task)
        }
        methods::TASKS_RESULT => {
            let params: GetTaskRequest = parse_params(request)?;
            to_value(inner.server.tasks.result(inner.id, &params.task_id).await?)
        }
        other => Err(Error::method_not_found(other)),
    }
}

fn handle_initialize(inner: &Arc<SessionInner>, request: &JsonRpcRequest) -> Result<Value> {
    if inner.init_answered.swap(true, Ordering::SeqCst) {
        return Err(Error::invalid_request("initialize received twice"));
    }
    let params: InitializeRequest = parse_params(request)?;
    let version = negotiate_protocol_version(&params.protocol_version);
    *inner.protocol_version.lock() = Some(version.to_string());
    *inner.peer_info.lock() = Some(params.client_info);
    let _ = inner.state.advance(SessionState::Initializing);

    let capabilities = crate::capabilities::derive(&inner.server.capability_snapshot());
    to_value(InitializeResult {
        protocol_version: version.to_string(),
        capabilities,
        server_info: inner.server.options.implementation.clone(),
        instructions: inner.server.options.instructions.clone(),
        meta: None,
    })
}

fn lookup_reader(
    inner: &Arc<SessionInner>,
    uri: &str,
) -> Result<crate::server::ResourceReader> {
    if let Some(registered) = inner.server.resources.lock().get(uri) {
        return Ok(registered.reader.clone());
    }
    // Unregistered URI: consult templates before giving up. Matching is by
    // the literal prefix of the URI template (up to its first variable).
    let templates = inner.server.templates.lock();
    for registered in templates.all() {
        let prefix = registered
            .template
            .uri_template
            .split('{')
            .next()
            .unwrap_or("");
        if !prefix.is_empty() && uri.starts_with(prefix) {
            return Ok(registered.reader);
        }
    }
    Err(Error::resource_not_found(uri))
}

async fn handle_tool_call(
    inner: &Arc<SessionInner>,
    request: &JsonRpcRequest,
    cancel: CancellationToken,
) -> Result<Value> {
    let params: CallToolRequest = parse_params(request)?;
    let registered = inner
        .server
        .tools
        .lock()
        .get(&params.name)
        .cloned()
        .ok_or_else(|| Error::invalid_params(format!("unknown tool: {}", params.name)))?;

    let support = registered.tool.task_support();
    match (params.task.clone(), support) {
        (Some(metadata), TaskSupport::Optional | TaskSupport::Required) => {
            let (task, task_cancel) = inner.server.tasks.create(
                inner.id,
                &metadata,
                params.meta.as_ref(),
                params.arguments.as_ref(),
            );
            spawn_task_execution(inner.clone(), registered.handler.clone(), params, task.task_id.clone(), task_cancel);
            to_value(CreateTaskResult { task, meta: None })
        }
        (Some(_), TaskSupport::Forbidden) => Err(Error::protocol(
            ferromcp_protocol::JsonRpcErrorCode::MethodNotFound,
            format!("tool '{}' does not support task augmentation", params.name),
        )),
        (None, TaskSupport::Required) => Err(Error::invalid_params(format!(
            "tool '{}' requires task augmentation",
            params.name
        ))),
        (None, _) => {
            let ctx = RequestContext { cancellation: cancel };
            to_value((registered.handler)(ctx, params).await?)
        }
    }
}

/// Run a task-augmented call on a context detached from the originating
/// request, so the task outlives it.
fn spawn_task_execution(
    inner: Arc<SessionInner>,
    handler: crate::tool::RawToolHandler,
    params: CallToolRequest,
    task_id: String,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let ctx = RequestContext {
            cancellation: cancel,
        };
        let outcome = handler(ctx, params).await;
        if let Some(updated) = inner.server.tasks.finish(&task_id, outcome) {
            inner.notify_task_status(&updated);
        }
    });
}

impl SessionInner {
    /// Issue a server-initiated request (keepalive ping, sampling, ...).
    pub(crate) async fn request(&self, method: &str, params: Value) -> Result<Value> {
        if self.state.is_closing() {
            return Err(Error::Closed);
        }
        let id = RequestId::Number(self.next_request_id.fetch_add(1, Ordering::SeqCst));
        let (rx, cancel) = self.out_flight.register(id.clone());
        let request = JsonRpcRequest::new(method, Some(params), id.clone());
        if let Err(e) = self.transport.send(request.into()).await {
            self.out_flight.forget(&id);
            return Err(e);
        }
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Closed),
            response = rx => response.map_err(|_| Error::Closed)?.into_result(),
        }
    }

    /// Fire-and-forget notification on a background task.
    pub(crate) fn notify_bg(&self, method: &str, params: Option<Value>) {
        if !self.state.is_active() {
            return;
        }
        let transport = self.transport.clone();
        let notification = JsonRpcNotification::new(method, params);
        let session = self.id;
        tokio::spawn(async move {
            if let Err(e) = transport.send(notification.into()).await {
                debug!(session, error = %e, "notification send failed");
            }
        });
    }

    /// Best-effort `notifications/tasks/status`.
    pub(crate) fn notify_task_status(&self, task: &Task) {
        let notification = TaskStatusNotification {
            task_id: task.task_id.clone(),
            status: task.status,
            status_message: task.status_message.clone(),
            created_at: task.created_at.clone(),
            ttl: task.ttl,
        };
        match serde_json::to_value(notification) {
            Ok(params) => self.notify_bg(methods::TASKS_STATUS, Some(params)),
            Err(e) => debug!(session = self.id, error = %e, "task status encode failed"),
        }
    }

    /// Immediate teardown used by keepalive failure.
    pub(crate) fn shutdown_now(&self) {
        self.closed.cancel();
        self.keepalive.cancel();
        self.out_flight.abort_all();
        for (_, token) in self.inbound.lock().drain() {
            token.cancel();
        }
    }

    fn teardown(&self) {
        let _ = self.state.advance(SessionState::Closed);
        self.keepalive.cancel();
        self.out_flight.abort_all();
        for (_, token) in self.inbound.lock().drain() {
            token.cancel();
        }
    }
}

impl ServerSession {
    /// The protocol version negotiated with this session's client.
    pub fn protocol_version(&self) -> Option<String> {
        self.inner.protocol_version.lock().clone()
    }

    /// Client implementation info, once initialized.
    pub fn peer_info(&self) -> Option<ferromcp_protocol::types::Implementation> {
        self.inner.peer_info.lock().clone()
    }

    /// Whether the handshake completed and traffic flows.
    pub fn is_active(&self) -> bool {
        self.inner.state.is_active()
    }

    /// Ping the client.
    pub async fn ping(&self) -> Result<()> {
        self.inner.request(methods::PING, json!({})).await.map(|_| ())
    }

    /// Emit `notifications/message`, honoring the client's `logging/setLevel`.
    pub fn log(&self, level: LoggingLevel, logger: Option<String>, data: Value) {
        if level < *self.inner.log_level.lock() {
            return;
        }
        let notification = LoggingMessageNotification {
            level,
            logger,
            data,
        };
        match serde_json::to_value(notification) {
            Ok(params) => self.inner.notify_bg(methods::LOGGING_MESSAGE, Some(params)),
            Err(e) => debug!(error = %e, "log notification encode failed"),
        }
    }

    /// Emit `notifications/resources/updated` for a subscribed URI.
    pub fn notify_resource_updated(&self, uri: impl Into<String>) {
        let params = serde_json::to_value(ResourceUpdatedNotification { uri: uri.into() })
            .expect("a string field always serializes");
        self.inner
            .notify_bg("notifications/resources/updated", Some(params));
    }

    /// Graceful shutdown: stop accepting outbound requests, let in-flight
    /// work finish (bounded by the close timeout), cancel keepalive, close
    /// the transport.
    pub async fn close(&self) -> Result<()> {
        if self.inner.state.is_closing() {
            return Ok(());
        }
        let _ = self.inner.state.advance(SessionState::Closing);
        self.inner.keepalive.cancel();

        let grace = self.inner.server.options.close_timeout;
        let _ = tokio::time::timeout(grace, self.inner.out_flight.drained()).await;
        self.inner.closed.cancel();
        for (_, token) in self.inner.inbound.lock().drain() {
            token.cancel();
        }
        let _ = tokio::time::timeout(grace, self.inner.running.wait()).await;
        let _ = self.inner.transport.close().await;
        let _ = self.inner.state.advance(SessionState::Closed);
        Ok(())
    }

    /// Block until the read loop has exited and every in-flight request has
    /// resolved.
    pub async fn wait(&self) {
        self.inner.running.wait().await;
        self.inner.out_flight.drained().await;
    }
}
