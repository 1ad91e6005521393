//! Transports for FerroMCP.
//!
//! Every transport moves framed [`JsonRpcMessage`]s and is consumed by a
//! session core through the [`Transport`] trait: a single logical reader
//! (`receive`), a serialised writer (`send`), and `close`. Transports own
//! their byte streams and are released when the session closes.

pub mod memory;
pub mod sse;
pub mod sse_client;
pub mod sse_server;
pub mod stdio;
pub mod streamable_client;
pub mod streamable_server;
pub mod websocket;

use async_trait::async_trait;

use ferromcp_protocol::{JsonRpcMessage, Result};

pub use memory::InMemoryTransport;
pub use sse_client::SseClientTransport;
pub use sse_server::{SseServer, SseServerConfig, SseServerTransport};
pub use stdio::StdioTransport;
pub use streamable_client::{StreamableHttpClient, StreamableHttpClientConfig};
pub use streamable_server::{
    StreamableHttpServer, StreamableHttpServerConfig, StreamableServerTransport,
};
pub use websocket::{WebSocketServer, WebSocketTransport, MCP_SUBPROTOCOL};

/// HTTP header carrying the session id on Streamable HTTP.
pub const SESSION_ID_HEADER: &str = "Mcp-Session-Id";
/// HTTP header carrying the negotiated protocol version.
pub const PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";
/// HTTP header identifying the last SSE event seen, for resumption.
pub const LAST_EVENT_ID_HEADER: &str = "Last-Event-ID";

/// A bidirectional, message-framed connection to one MCP peer.
///
/// `receive` is called from a single reader task; `send` may be called
/// concurrently and implementations serialise writes internally.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send one message to the peer.
    async fn send(&self, message: JsonRpcMessage) -> Result<()>;

    /// Receive the next message from the peer.
    ///
    /// Returns `Ok(None)` on clean end-of-stream.
    async fn receive(&self) -> Result<Option<JsonRpcMessage>>;

    /// Close both directions. Idempotent.
    async fn close(&self) -> Result<()>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn send(&self, message: JsonRpcMessage) -> Result<()> {
        (**self).send(message).await
    }

    async fn receive(&self) -> Result<Option<JsonRpcMessage>> {
        (**self).receive().await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }
}
