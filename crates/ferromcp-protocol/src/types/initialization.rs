//! Initialization handshake and capability negotiation types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::core::{Implementation, Meta};

/// `initialize` params.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeRequest {
    /// Protocol revision the client wants to speak
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// What the client can do
    pub capabilities: ClientCapabilities,
    /// Who the client is
    #[serde(rename = "clientInfo")]
    pub client_info: Implementation,
}

/// `initialize` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    /// Negotiated protocol revision
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// What the server can do
    pub capabilities: ServerCapabilities,
    /// Who the server is
    #[serde(rename = "serverInfo")]
    pub server_info: Implementation,
    /// Optional usage hints for the client's model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Extension metadata
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

/// Client capabilities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientCapabilities {
    /// Experimental, non-standard capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<HashMap<String, Value>>,
    /// Present if the client supports listing roots
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roots: Option<RootsCapabilities>,
    /// Present if the client supports sampling from an LLM
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<SamplingCapabilities>,
}

/// Server capabilities, derived from installed handlers at initialize time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Experimental, non-standard capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<HashMap<String, Value>>,
    /// Present if the server emits `notifications/message`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingCapabilities>,
    /// Present if the server answers `completion/complete`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completions: Option<CompletionCapabilities>,
    /// Present if the server offers prompt templates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<PromptsCapabilities>,
    /// Present if the server offers readable resources
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesCapabilities>,
    /// Present if the server offers callable tools
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapabilities>,
    /// Present if the server supports task-augmented requests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasks: Option<TasksCapabilities>,
}

/// Roots capabilities
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RootsCapabilities {
    /// Whether the root list can change
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Sampling capabilities
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SamplingCapabilities {}

/// Logging capabilities
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingCapabilities {}

/// Completion capabilities
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionCapabilities {}

/// Prompts capabilities
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptsCapabilities {
    /// Whether the prompt list can change
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Resources capabilities
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourcesCapabilities {
    /// Whether `resources/subscribe` is supported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<bool>,
    /// Whether the resource list can change
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Tools capabilities
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsCapabilities {
    /// Whether the tool list can change
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Tasks capabilities (`tasks.requests.tools.call`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TasksCapabilities {
    /// Which request kinds may be task-augmented
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests: Option<TasksRequestsCapabilities>,
}

/// Request kinds that may be task-augmented.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TasksRequestsCapabilities {
    /// Tool-call augmentation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<TasksToolsCapabilities>,
}

/// Tool request kinds that may be task-augmented.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TasksToolsCapabilities {
    /// `tools/call` augmentation supported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call: Option<bool>,
}

impl TasksCapabilities {
    /// Capability document advertising `tools/call` task augmentation.
    pub fn tool_calls() -> Self {
        Self {
            requests: Some(TasksRequestsCapabilities {
                tools: Some(TasksToolsCapabilities { call: Some(true) }),
            }),
        }
    }

    /// Whether `tools/call` may be task-augmented under this capability set.
    pub fn supports_tool_calls(&self) -> bool {
        self.requests
            .as_ref()
            .and_then(|r| r.tools.as_ref())
            .and_then(|t| t.call)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tasks_capability_shape() {
        let caps = TasksCapabilities::tool_calls();
        assert!(caps.supports_tool_calls());
        assert_eq!(
            serde_json::to_value(&caps).unwrap(),
            json!({"requests": {"tools": {"call": true}}})
        );
    }

    #[test]
    fn empty_server_capabilities_serialize_to_empty_object() {
        let caps = ServerCapabilities::default();
        assert_eq!(serde_json::to_value(&caps).unwrap(), json!({}));
    }

    #[test]
    fn initialize_round_trip() {
        let request = InitializeRequest {
            protocol_version: "2025-06-18".into(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation::new("test-client", "1.0.0"),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"protocolVersion\":\"2025-06-18\""));
        assert!(json.contains("\"clientInfo\""));
        let back: InitializeRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.client_info.name, "test-client");
    }
}
