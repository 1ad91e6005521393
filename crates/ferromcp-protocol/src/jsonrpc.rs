//! JSON-RPC 2.0 message codec.
//!
//! Encoding goes through serde; decoding is done by explicit classification
//! so that malformed frames produce actionable diagnostics (`"missing id"`,
//! `"not a JSON-RPC message"`) instead of opaque untagged-enum failures.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

use crate::error::{Error, Result};
use crate::types::core::RequestId;

/// JSON-RPC version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC version marker; serializes as the literal `"2.0"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonRpcVersion;

impl Serialize for JsonRpcVersion {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(JSONRPC_VERSION)
    }
}

impl<'de> Deserialize<'de> for JsonRpcVersion {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let version = String::deserialize(deserializer)?;
        if version == JSONRPC_VERSION {
            Ok(JsonRpcVersion)
        } else {
            Err(serde::de::Error::custom(format!(
                "invalid JSON-RPC version: expected '{JSONRPC_VERSION}', got '{version}'"
            )))
        }
    }
}

/// JSON-RPC request message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version
    pub jsonrpc: JsonRpcVersion,
    /// Request method name
    pub method: String,
    /// Request parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Request identifier
    pub id: RequestId,
}

impl JsonRpcRequest {
    /// Create a new request.
    pub fn new(method: impl Into<String>, params: Option<Value>, id: RequestId) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            method: method.into(),
            params,
            id,
        }
    }

    /// Create a request, serializing typed params.
    pub fn with_params<P: Serialize>(
        method: impl Into<String>,
        params: &P,
        id: RequestId,
    ) -> Result<Self> {
        Ok(Self::new(method, Some(serde_json::to_value(params)?), id))
    }
}

/// JSON-RPC notification message (no response expected)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// JSON-RPC version
    pub jsonrpc: JsonRpcVersion,
    /// Notification method name
    pub method: String,
    /// Notification parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Create a new notification.
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            method: method.into(),
            params,
        }
    }

    /// Create a notification, serializing typed params.
    pub fn with_params<P: Serialize>(method: impl Into<String>, params: &P) -> Result<Self> {
        Ok(Self::new(method, Some(serde_json::to_value(params)?)))
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code
    pub code: i32,
    /// Error message
    pub message: String,
    /// Additional error data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// Result or error payload of a response; the two are mutually exclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcResponsePayload {
    /// Successful response
    Success {
        /// Response result
        result: Value,
    },
    /// Error response
    Error {
        /// Response error
        error: JsonRpcError,
    },
}

/// JSON-RPC response message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version
    pub jsonrpc: JsonRpcVersion,
    /// Response payload (either result or error, never both)
    #[serde(flatten)]
    pub payload: JsonRpcResponsePayload,
    /// Request identifier this answers
    pub id: RequestId,
}

impl JsonRpcResponse {
    /// Create a successful response.
    pub fn success(result: Value, id: RequestId) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            payload: JsonRpcResponsePayload::Success { result },
            id,
        }
    }

    /// Create an error response.
    pub fn error(error: JsonRpcError, id: RequestId) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            payload: JsonRpcResponsePayload::Error { error },
            id,
        }
    }

    /// Get the result if this is a success response.
    pub fn result(&self) -> Option<&Value> {
        match &self.payload {
            JsonRpcResponsePayload::Success { result } => Some(result),
            JsonRpcResponsePayload::Error { .. } => None,
        }
    }

    /// Get the error if this is an error response.
    pub fn error_object(&self) -> Option<&JsonRpcError> {
        match &self.payload {
            JsonRpcResponsePayload::Success { .. } => None,
            JsonRpcResponsePayload::Error { error } => Some(error),
        }
    }

    /// Consume the response, yielding `Ok(result)` or `Err(Error::JsonRpc)`.
    pub fn into_result(self) -> Result<Value> {
        match self.payload {
            JsonRpcResponsePayload::Success { result } => Ok(result),
            JsonRpcResponsePayload::Error { error } => Err(Error::JsonRpc(error)),
        }
    }
}

/// Standard JSON-RPC error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonRpcErrorCode {
    /// Parse error (-32700)
    ParseError,
    /// Invalid request (-32600)
    InvalidRequest,
    /// Method not found (-32601)
    MethodNotFound,
    /// Invalid params (-32602)
    InvalidParams,
    /// Internal error (-32603)
    InternalError,
    /// MCP resource-not-found (-32002)
    ResourceNotFound,
    /// Application-defined error
    ApplicationError(i32),
}

impl JsonRpcErrorCode {
    /// Numeric error code.
    pub fn code(&self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::ResourceNotFound => -32002,
            Self::ApplicationError(code) => *code,
        }
    }

    /// Standard message for this code.
    pub fn message(&self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::ResourceNotFound => "Resource not found",
            Self::ApplicationError(_) => "Application error",
        }
    }
}

impl From<i32> for JsonRpcErrorCode {
    fn from(code: i32) -> Self {
        match code {
            -32700 => Self::ParseError,
            -32600 => Self::InvalidRequest,
            -32601 => Self::MethodNotFound,
            -32602 => Self::InvalidParams,
            -32603 => Self::InternalError,
            -32002 => Self::ResourceNotFound,
            other => Self::ApplicationError(other),
        }
    }
}

impl From<JsonRpcErrorCode> for JsonRpcError {
    fn from(code: JsonRpcErrorCode) -> Self {
        Self {
            code: code.code(),
            message: code.message().to_string(),
            data: None,
        }
    }
}

/// One framed JSON-RPC message: request, response, or notification.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    /// Request message
    Request(JsonRpcRequest),
    /// Response message
    Response(JsonRpcResponse),
    /// Notification message
    Notification(JsonRpcNotification),
}

impl JsonRpcMessage {
    /// Classify a decoded JSON value into a message variant.
    ///
    /// Classification rules: a `method` with an `id` is a request, a `method`
    /// without one is a notification, a `result` or `error` with an `id` is a
    /// response. Anything else is a parse/invalid-request error with a
    /// diagnostic naming the missing piece.
    pub fn from_value(value: Value) -> Result<Self> {
        let obj = match &value {
            Value::Object(obj) => obj,
            _ => return Err(Error::invalid_request("not a JSON-RPC message")),
        };
        if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(Error::invalid_request("missing or invalid jsonrpc version"));
        }
        if obj.contains_key("method") {
            if obj.contains_key("id") {
                let request: JsonRpcRequest = serde_json::from_value(value)?;
                Ok(Self::Request(request))
            } else {
                let notification: JsonRpcNotification = serde_json::from_value(value)?;
                Ok(Self::Notification(notification))
            }
        } else if obj.contains_key("result") || obj.contains_key("error") {
            if !obj.contains_key("id") {
                return Err(Error::invalid_request("response missing id"));
            }
            let response: JsonRpcResponse = serde_json::from_value(value)?;
            Ok(Self::Response(response))
        } else {
            Err(Error::invalid_request(
                "message is neither request, response, nor notification",
            ))
        }
    }

    /// Decode one framed message from raw bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| Error::parse(format!("invalid JSON frame: {e}")))?;
        Self::from_value(value)
    }

    /// Encode this message to a JSON string.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Method name, for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(r) => Some(&r.method),
            Self::Notification(n) => Some(&n.method),
            Self::Response(_) => None,
        }
    }

    /// Request/response id, if the variant carries one.
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(r) => Some(&r.id),
            Self::Response(r) => Some(&r.id),
            Self::Notification(_) => None,
        }
    }
}

impl<'de> Deserialize<'de> for JsonRpcMessage {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(serde::de::Error::custom)
    }
}

impl From<JsonRpcRequest> for JsonRpcMessage {
    fn from(request: JsonRpcRequest) -> Self {
        Self::Request(request)
    }
}

impl From<JsonRpcResponse> for JsonRpcMessage {
    fn from(response: JsonRpcResponse) -> Self {
        Self::Response(response)
    }
}

impl From<JsonRpcNotification> for JsonRpcMessage {
    fn from(notification: JsonRpcNotification) -> Self {
        Self::Notification(notification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn version_round_trip() {
        let json = serde_json::to_string(&JsonRpcVersion).unwrap();
        assert_eq!(json, "\"2.0\"");
        let parsed: JsonRpcVersion = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, JsonRpcVersion);
        assert!(serde_json::from_str::<JsonRpcVersion>("\"1.0\"").is_err());
    }

    #[test]
    fn classify_request() {
        let msg =
            JsonRpcMessage::decode(br#"{"jsonrpc":"2.0","method":"ping","id":1}"#).unwrap();
        match msg {
            JsonRpcMessage::Request(r) => {
                assert_eq!(r.method, "ping");
                assert_eq!(r.id, RequestId::Number(1));
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn classify_notification() {
        let msg = JsonRpcMessage::decode(
            br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
        )
        .unwrap();
        assert!(matches!(msg, JsonRpcMessage::Notification(_)));
    }

    #[test]
    fn classify_response() {
        let msg =
            JsonRpcMessage::decode(br#"{"jsonrpc":"2.0","result":{"ok":true},"id":"a"}"#).unwrap();
        match msg {
            JsonRpcMessage::Response(r) => {
                assert_eq!(r.result(), Some(&json!({"ok": true})));
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn response_without_id_is_rejected() {
        let err = JsonRpcMessage::decode(br#"{"jsonrpc":"2.0","result":{}}"#).unwrap_err();
        assert!(err.to_string().contains("missing id"), "{err}");
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let err = JsonRpcMessage::decode(b"{not json").unwrap_err();
        assert!(err.to_string().contains("invalid JSON frame"));

        let err = JsonRpcMessage::decode(br#"[1,2,3]"#).unwrap_err();
        assert!(err.to_string().contains("not a JSON-RPC message"));
    }

    #[test]
    fn error_response_round_trip() {
        let response = JsonRpcResponse::error(
            JsonRpcError::from(JsonRpcErrorCode::MethodNotFound),
            RequestId::Number(7),
        );
        let encoded = serde_json::to_string(&response).unwrap();
        let decoded = JsonRpcMessage::decode(encoded.as_bytes()).unwrap();
        match decoded {
            JsonRpcMessage::Response(r) => {
                assert_eq!(r.error_object().unwrap().code, -32601);
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn error_codes_map_both_ways() {
        assert_eq!(JsonRpcErrorCode::ParseError.code(), -32700);
        assert_eq!(JsonRpcErrorCode::ResourceNotFound.code(), -32002);
        assert_eq!(JsonRpcErrorCode::from(-32601), JsonRpcErrorCode::MethodNotFound);
        assert_eq!(
            JsonRpcErrorCode::from(-32050),
            JsonRpcErrorCode::ApplicationError(-32050)
        );
    }
}
