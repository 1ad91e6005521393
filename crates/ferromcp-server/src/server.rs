//! The MCP server: feature registries, handler installation, and session
//! acceptance.
//!
//! A [`Server`] owns the feature registries and the schema cache, shared by
//! every session it serves. Sessions hold a reference back to the server;
//! the server keeps only weak handles to its sessions.

use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex as SyncMutex;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use ferromcp_core::FeatureSet;
use ferromcp_protocol::types::{
    CompleteRequest, CompleteResult, GetPromptRequest, GetPromptResult, Implementation, Prompt,
    ReadResourceRequest, ReadResourceResult, Resource, ResourceTemplate, SubscribeRequest,
    TaskSupport, Tool,
};
use ferromcp_protocol::{methods, Result};
use ferromcp_transport::Transport;

use crate::capabilities::CapabilitySnapshot;
use crate::schema::SchemaCache;
use crate::session::{serve_session, ServerSession, SessionInner};
use crate::tasks::TaskStore;
use crate::tool::{bind_tool, RegisteredTool, ToolError};

/// Handler answering `prompts/get` for one prompt.
pub type PromptHandler =
    Arc<dyn Fn(GetPromptRequest) -> BoxFuture<'static, Result<GetPromptResult>> + Send + Sync>;
/// Handler answering `resources/read` for one resource or template.
pub type ResourceReader =
    Arc<dyn Fn(ReadResourceRequest) -> BoxFuture<'static, Result<ReadResourceResult>> + Send + Sync>;
/// Handler answering `completion/complete`.
pub type CompletionHandler =
    Arc<dyn Fn(CompleteRequest) -> BoxFuture<'static, Result<CompleteResult>> + Send + Sync>;
/// Handler answering `resources/subscribe` / `resources/unsubscribe`.
pub type SubscribeHandler =
    Arc<dyn Fn(SubscribeRequest) -> BoxFuture<'static, Result<()>> + Send + Sync>;

#[derive(Clone)]
pub(crate) struct RegisteredPrompt {
    pub prompt: Prompt,
    pub handler: PromptHandler,
}

#[derive(Clone)]
pub(crate) struct RegisteredResource {
    pub resource: Resource,
    pub reader: ResourceReader,
}

#[derive(Clone)]
pub(crate) struct RegisteredTemplate {
    pub template: ResourceTemplate,
    pub reader: ResourceReader,
}

/// Server configuration.
#[derive(Clone)]
pub struct ServerOptions {
    /// Who this server is, reported during `initialize`
    pub implementation: Implementation,
    /// Optional usage hints for the client's model
    pub instructions: Option<String>,
    /// Ping the client at this interval once active; a missed ping closes
    /// the session
    pub keepalive: Option<Duration>,
    /// Page size for every `*/list` operation
    pub page_size: usize,
    /// How long `close` waits for in-flight work before tearing down
    pub close_timeout: Duration,
    /// Advertise the tools capability even with no tool registered
    pub has_tools: bool,
    /// Advertise the prompts capability even with no prompt registered
    pub has_prompts: bool,
    /// Advertise the resources capability even with no resource registered
    pub has_resources: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            implementation: Implementation::default(),
            instructions: None,
            keepalive: None,
            page_size: 100,
            close_timeout: Duration::from_secs(10),
            has_tools: false,
            has_prompts: false,
            has_resources: false,
        }
    }
}

/// An MCP server hosting tools, prompts, and resources for its sessions.
#[derive(Clone)]
pub struct Server {
    pub(crate) inner: Arc<ServerInner>,
}

pub(crate) struct ServerInner {
    pub options: ServerOptions,
    pub tools: SyncMutex<FeatureSet<RegisteredTool>>,
    pub prompts: SyncMutex<FeatureSet<RegisteredPrompt>>,
    pub resources: SyncMutex<FeatureSet<RegisteredResource>>,
    pub templates: SyncMutex<FeatureSet<RegisteredTemplate>>,
    pub completion: SyncMutex<Option<CompletionHandler>>,
    pub subscribe: SyncMutex<Option<SubscribeHandler>>,
    pub unsubscribe: SyncMutex<Option<SubscribeHandler>>,
    pub schema_cache: SchemaCache,
    pub tasks: TaskStore,
    pub sessions: SyncMutex<Vec<Weak<SessionInner>>>,
    pub next_session_id: AtomicU64,
}

impl Server {
    /// Create a server with the given options.
    pub fn new(options: ServerOptions) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                options,
                tools: SyncMutex::new(FeatureSet::new(|t: &RegisteredTool| t.tool.name.as_str())),
                prompts: SyncMutex::new(FeatureSet::new(|p: &RegisteredPrompt| {
                    p.prompt.name.as_str()
                })),
                resources: SyncMutex::new(FeatureSet::new(|r: &RegisteredResource| {
                    r.resource.uri.as_str()
                })),
                templates: SyncMutex::new(FeatureSet::new(|t: &RegisteredTemplate| {
                    t.template.uri_template.as_str()
                })),
                completion: SyncMutex::new(None),
                subscribe: SyncMutex::new(None),
                unsubscribe: SyncMutex::new(None),
                schema_cache: SchemaCache::new(),
                tasks: TaskStore::new(),
                sessions: SyncMutex::new(Vec::new()),
                next_session_id: AtomicU64::new(1),
            }),
        }
    }

    /// Bind a typed tool handler and register the tool.
    ///
    /// Missing schemas are generated from `In`/`Out`; see
    /// [`crate::tool`] for the pipeline the bound handler runs.
    pub fn add_tool<In, Out, F, Fut>(&self, tool: Tool, handler: F) -> Result<()>
    where
        In: DeserializeOwned + JsonSchema + Send + 'static,
        Out: Serialize + JsonSchema + Send + 'static,
        F: Fn(crate::tool::RequestContext, In) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = std::result::Result<Out, ToolError>> + Send + 'static,
    {
        let registered = bind_tool(&self.inner.schema_cache, tool, handler)?;
        self.inner.tools.lock().add(registered);
        self.broadcast(methods::TOOLS_LIST_CHANGED);
        Ok(())
    }

    /// Remove a tool by name. Returns whether it existed.
    pub fn remove_tool(&self, name: &str) -> bool {
        let removed = self.inner.tools.lock().remove(name);
        if removed {
            self.broadcast(methods::TOOLS_LIST_CHANGED);
        }
        removed
    }

    /// Register a prompt template with its `prompts/get` handler.
    pub fn add_prompt(&self, prompt: Prompt, handler: PromptHandler) {
        self.inner.prompts.lock().add(RegisteredPrompt { prompt, handler });
        self.broadcast(methods::PROMPTS_LIST_CHANGED);
    }

    /// Remove a prompt by name. Returns whether it existed.
    pub fn remove_prompt(&self, name: &str) -> bool {
        let removed = self.inner.prompts.lock().remove(name);
        if removed {
            self.broadcast(methods::PROMPTS_LIST_CHANGED);
        }
        removed
    }

    /// Register a readable resource.
    pub fn add_resource(&self, resource: Resource, reader: ResourceReader) {
        self.inner
            .resources
            .lock()
            .add(RegisteredResource { resource, reader });
        self.broadcast(methods::RESOURCES_LIST_CHANGED);
    }

    /// Remove a resource by URI. Returns whether it existed.
    pub fn remove_resource(&self, uri: &str) -> bool {
        let removed = self.inner.resources.lock().remove(uri);
        if removed {
            self.broadcast(methods::RESOURCES_LIST_CHANGED);
        }
        removed
    }

    /// Register a resource template. Reads of unregistered URIs consult
    /// templates before failing with resource-not-found.
    pub fn add_resource_template(&self, template: ResourceTemplate, reader: ResourceReader) {
        self.inner
            .templates
            .lock()
            .add(RegisteredTemplate { template, reader });
        self.broadcast(methods::RESOURCES_LIST_CHANGED);
    }

    /// Install the completion handler; its presence switches on the
    /// completions capability.
    pub fn set_completion_handler(&self, handler: CompletionHandler) {
        *self.inner.completion.lock() = Some(handler);
    }

    /// Install the `resources/subscribe` handler; its presence switches on
    /// `resources.subscribe` in the advertised capabilities.
    pub fn set_subscribe_handler(&self, subscribe: SubscribeHandler, unsubscribe: SubscribeHandler) {
        *self.inner.subscribe.lock() = Some(subscribe);
        *self.inner.unsubscribe.lock() = Some(unsubscribe);
    }

    /// Serve one transport: spawns the session's read loop and returns its
    /// handle. The session answers `initialize` exactly once and arms
    /// keepalive when `initialized` arrives.
    pub fn serve(&self, transport: impl Transport) -> ServerSession {
        let session = serve_session(self.inner.clone(), Arc::new(transport));
        self.inner
            .sessions
            .lock()
            .push(Arc::downgrade(&session.inner));
        session
    }

    /// Number of sessions still alive.
    pub fn session_count(&self) -> usize {
        let mut sessions = self.inner.sessions.lock();
        sessions.retain(|s| s.upgrade().is_some());
        sessions.len()
    }

    /// Broadcast a list-changed notification to every active session.
    fn broadcast(&self, method: &'static str) {
        let sessions: Vec<Arc<SessionInner>> = {
            let mut slots = self.inner.sessions.lock();
            slots.retain(|s| s.upgrade().is_some());
            slots.iter().filter_map(Weak::upgrade).collect()
        };
        for session in sessions {
            session.notify_bg(method, None);
        }
        debug!(method, "list change broadcast");
    }
}

impl ServerInner {
    /// Facts the capability reporter derives from, snapshotted at
    /// `initialize` time.
    pub(crate) fn capability_snapshot(&self) -> CapabilitySnapshot {
        CapabilitySnapshot {
            tool_count: self.tools.lock().len(),
            prompt_count: self.prompts.lock().len(),
            resource_count: self.resources.lock().len(),
            template_count: self.templates.lock().len(),
            has_completion: self.completion.lock().is_some(),
            has_subscribe: self.subscribe.lock().is_some(),
            tasks_enabled: self.tasks_enabled(),
            has_tools_hint: self.options.has_tools,
            has_prompts_hint: self.options.has_prompts,
            has_resources_hint: self.options.has_resources,
        }
    }

    /// Task augmentation is offered when any tool allows it.
    pub(crate) fn tasks_enabled(&self) -> bool {
        self.tools
            .lock()
            .all()
            .iter()
            .any(|t| t.tool.task_support() != TaskSupport::Forbidden)
    }
}
