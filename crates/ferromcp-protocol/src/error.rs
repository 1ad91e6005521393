//! Error taxonomy for the protocol and everything stacked on it.
//!
//! Four families, per the session contract:
//! - **protocol errors** travel back to the peer as JSON-RPC error objects;
//! - **tool errors** never reach this type (they become `isError: true`
//!   results in the tool layer);
//! - **transport-transient** errors surface to the caller but leave the
//!   session usable;
//! - **transport-fatal** errors mark the session closed.

use serde_json::Value;
use thiserror::Error;

use crate::jsonrpc::{JsonRpcError, JsonRpcErrorCode};

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification used by retry and session-health logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Peer-visible JSON-RPC error
    Protocol,
    /// Transport failure the session survives (timeouts, 5xx, 429)
    Transient,
    /// Transport failure that kills the session (401, 404, broken handshake)
    Fatal,
    /// Local programming/serialization failure
    Internal,
}

/// Unified error type for the protocol stack.
#[derive(Debug, Error)]
pub enum Error {
    /// A JSON-RPC error object, either produced locally or received from the peer.
    #[error("{0}")]
    JsonRpc(JsonRpcError),

    /// Transport failure that does not invalidate the session.
    #[error("transport error: {0}")]
    Transport(String),

    /// Transport failure after which the session is unusable.
    #[error("transport error (fatal): {0}")]
    TransportFatal(String),

    /// The session or transport is already closed.
    #[error("connection closed")]
    Closed,

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Build a protocol error with an explicit code.
    pub fn protocol(code: JsonRpcErrorCode, message: impl Into<String>) -> Self {
        Self::JsonRpc(JsonRpcError {
            code: code.code(),
            message: message.into(),
            data: None,
        })
    }

    /// Parse error (-32700).
    pub fn parse(message: impl Into<String>) -> Self {
        Self::protocol(JsonRpcErrorCode::ParseError, message)
    }

    /// Invalid request (-32600).
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::protocol(JsonRpcErrorCode::InvalidRequest, message)
    }

    /// Method not found (-32601).
    pub fn method_not_found(method: &str) -> Self {
        Self::protocol(
            JsonRpcErrorCode::MethodNotFound,
            format!("method not found: {method}"),
        )
    }

    /// Invalid params (-32602).
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::protocol(JsonRpcErrorCode::InvalidParams, message)
    }

    /// Internal error (-32603).
    pub fn internal(message: impl Into<String>) -> Self {
        Self::protocol(JsonRpcErrorCode::InternalError, message)
    }

    /// MCP resource-not-found (-32002), with the URI in the data field.
    pub fn resource_not_found(uri: &str) -> Self {
        Self::JsonRpc(JsonRpcError {
            code: JsonRpcErrorCode::ResourceNotFound.code(),
            message: format!("Resource not found: {uri}"),
            data: Some(Value::String(uri.to_string())),
        })
    }

    /// Classify this error for retry/session-health decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::JsonRpc(_) => ErrorKind::Protocol,
            Self::Transport(_) => ErrorKind::Transient,
            Self::TransportFatal(_) | Self::Closed => ErrorKind::Fatal,
            Self::Serialization(_) => ErrorKind::Internal,
        }
    }

    /// Convert into the JSON-RPC error object sent back to the peer.
    ///
    /// Non-protocol errors collapse to `InternalError` so transport details
    /// never leak onto the wire.
    pub fn to_jsonrpc_error(&self) -> JsonRpcError {
        match self {
            Self::JsonRpc(e) => e.clone(),
            other => JsonRpcError {
                code: JsonRpcErrorCode::InternalError.code(),
                message: other.to_string(),
                data: None,
            },
        }
    }

    /// JSON-RPC code, when this is a protocol error.
    pub fn jsonrpc_code(&self) -> Option<i32> {
        match self {
            Self::JsonRpc(e) => Some(e.code),
            _ => None,
        }
    }
}

impl From<JsonRpcError> for Error {
    fn from(error: JsonRpcError) -> Self {
        Self::JsonRpc(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_errors_keep_their_code() {
        let err = Error::invalid_params("bad cursor");
        assert_eq!(err.jsonrpc_code(), Some(-32602));
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(err.to_jsonrpc_error().message, "bad cursor");
    }

    #[test]
    fn resource_not_found_carries_uri() {
        let err = Error::resource_not_found("file:///missing.txt");
        let rpc = err.to_jsonrpc_error();
        assert_eq!(rpc.code, -32002);
        assert_eq!(rpc.data, Some(Value::String("file:///missing.txt".into())));
    }

    #[test]
    fn transport_errors_do_not_leak_details_as_protocol_codes() {
        let err = Error::Transport("connection reset".into());
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert_eq!(err.to_jsonrpc_error().code, -32603);

        let err = Error::TransportFatal("401 Unauthorized".into());
        assert_eq!(err.kind(), ErrorKind::Fatal);
    }
}
