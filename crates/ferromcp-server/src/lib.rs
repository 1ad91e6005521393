//! FerroMCP server.
//!
//! Hosts tools, prompts, and resources for MCP clients over any
//! `ferromcp-transport` transport. The [`Server`] owns the feature
//! registries and schema cache; [`Server::serve`] attaches one transport and
//! runs the session state machine (initialize handshake, dispatch,
//! keepalive, task engine, close/wait).
//!
//! ```no_run
//! use ferromcp_server::{Server, ServerOptions, ToolError};
//! use ferromcp_protocol::types::Tool;
//! use schemars::JsonSchema;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Deserialize, JsonSchema)]
//! struct Input { name: String }
//!
//! #[derive(Serialize, JsonSchema)]
//! struct Output { greeting: String }
//!
//! # async fn run() -> ferromcp_protocol::Result<()> {
//! let server = Server::new(ServerOptions::default());
//! server.add_tool(
//!     Tool::new("greet", "Greets someone"),
//!     |_ctx, input: Input| async move {
//!         Ok::<_, ToolError>(Output { greeting: format!("hello {}", input.name) })
//!     },
//! )?;
//!
//! let transport = ferromcp_transport::StdioTransport::new();
//! let session = server.serve(transport);
//! session.wait().await;
//! # Ok(())
//! # }
//! ```

mod capabilities;
pub mod schema;
mod server;
mod session;
mod tasks;
pub mod tool;

pub use schema::{ResolvedSchema, SchemaCache};
pub use server::{
    CompletionHandler, PromptHandler, ResourceReader, Server, ServerOptions, SubscribeHandler,
};
pub use session::ServerSession;
pub use tool::{RequestContext, ToolError};
