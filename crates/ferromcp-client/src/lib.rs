//! FerroMCP client.
//!
//! [`Client::connect`] dials a transport, performs the `initialize`
//! handshake, sends `notifications/initialized`, and arms keepalive when
//! configured. The returned [`ClientSession`] exposes the typed operation
//! surface (`tools/*`, `prompts/*`, `resources/*`, `tasks/*`, completion,
//! logging) plus cancellation and close/wait semantics.

mod session;

use std::sync::Arc;
use std::time::Duration;

use ferromcp_protocol::types::{
    ClientCapabilities, Implementation, LoggingMessageNotification, TaskStatusNotification,
};

pub use session::ClientSession;

/// Callback invoked for `notifications/message` from the server.
pub type LogCallback = Arc<dyn Fn(LoggingMessageNotification) + Send + Sync>;
/// Callback invoked for `notifications/tasks/status`.
pub type TaskStatusCallback = Arc<dyn Fn(TaskStatusNotification) + Send + Sync>;

/// Client configuration.
#[derive(Clone, Default)]
pub struct ClientOptions {
    /// Who this client is, reported during `initialize`
    pub implementation: Implementation,
    /// What this client can do
    pub capabilities: ClientCapabilities,
    /// Ping the server at this interval once active; a missed ping closes
    /// the session
    pub keepalive: Option<Duration>,
    /// How long `close` waits for in-flight requests before tearing down
    pub close_timeout: Option<Duration>,
    /// Server log messages land here
    pub on_log: Option<LogCallback>,
    /// Task status notifications land here
    pub on_task_status: Option<TaskStatusCallback>,
}

/// An MCP client; connect it to a transport to obtain a session.
#[derive(Clone, Default)]
pub struct Client {
    options: ClientOptions,
}

impl Client {
    /// Create a client with the given options.
    pub fn new(options: ClientOptions) -> Self {
        Self { options }
    }

    /// Dial `transport`, run the initialization handshake, and hand back the
    /// active session.
    pub async fn connect(
        &self,
        transport: impl ferromcp_transport::Transport,
    ) -> ferromcp_protocol::Result<ClientSession> {
        session::connect(self.options.clone(), Arc::new(transport)).await
    }
}
