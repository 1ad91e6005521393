//! Protocol layer for the FerroMCP SDK.
//!
//! This crate contains everything that crosses the wire: the JSON-RPC 2.0
//! codec ([`jsonrpc`]), the MCP type vocabulary ([`types`]), the method name
//! table ([`methods`]), and the error taxonomy ([`error`]). It is transport-
//! and runtime-agnostic; the session machinery lives in `ferromcp-core` and
//! the transports in `ferromcp-transport`.

pub mod error;
pub mod jsonrpc;
pub mod methods;
pub mod types;

pub use error::{Error, ErrorKind, Result};
pub use jsonrpc::{
    JsonRpcError, JsonRpcErrorCode, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse,
};
pub use types::core::RequestId;

/// Protocol revisions this SDK can negotiate, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

/// The revision advertised when the peer requests one we do not know.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";

/// Pick the protocol version to answer an `initialize` request with.
///
/// The client's requested version wins when we support it; otherwise the
/// server falls back to its latest known revision.
pub fn negotiate_protocol_version(requested: &str) -> &'static str {
    SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .find(|v| **v == requested)
        .copied()
        .unwrap_or(LATEST_PROTOCOL_VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiation_prefers_requested_version() {
        assert_eq!(negotiate_protocol_version("2024-11-05"), "2024-11-05");
        assert_eq!(negotiate_protocol_version("2025-06-18"), "2025-06-18");
    }

    #[test]
    fn negotiation_falls_back_to_latest() {
        assert_eq!(negotiate_protocol_version("1999-01-01"), LATEST_PROTOCOL_VERSION);
    }
}
