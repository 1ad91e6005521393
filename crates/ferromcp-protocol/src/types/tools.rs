//! Tool descriptors and the `tools/*` request/response surface.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::content::ContentBlock;
use super::core::{Cursor, Meta};
use super::tasks::TaskMetadata;

/// How a tool relates to the task augmentation of `tools/call`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskSupport {
    /// The tool never runs as a task (the default)
    #[default]
    Forbidden,
    /// The tool runs as a task when the caller asks for one
    Optional,
    /// Every call to this tool becomes a task
    Required,
}

/// Execution policy attached to a tool descriptor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolExecution {
    /// Task support level; absent means forbidden
    #[serde(rename = "taskSupport", skip_serializing_if = "Option::is_none")]
    pub task_support: Option<TaskSupport>,
}

impl ToolExecution {
    /// Effective task-support level (absent ≡ forbidden).
    pub fn task_support(&self) -> TaskSupport {
        self.task_support.unwrap_or_default()
    }
}

/// Tool descriptor.
///
/// `input_schema` is required and must describe a JSON object; the raw
/// `Value` form is kept (rather than a typed struct) because schemas flow
/// unchanged into the external validator and may carry arbitrary keywords
/// such as `default`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Tool name (programmatic identifier)
    pub name: String,
    /// Display title
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Human-readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the tool arguments (must be an object schema)
    #[serde(rename = "inputSchema")]
    pub input_schema: Option<Value>,
    /// Optional JSON Schema for `structuredContent` (must be an object schema)
    #[serde(rename = "outputSchema", skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    /// Optional execution policy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ToolExecution>,
    /// Extension metadata
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

impl Tool {
    /// Create a tool with a name and description; schemas are filled in at
    /// binding time.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: None,
            description: Some(description.into()),
            input_schema: None,
            output_schema: None,
            execution: None,
            meta: None,
        }
    }

    /// Effective task-support level.
    pub fn task_support(&self) -> TaskSupport {
        self.execution
            .as_ref()
            .map(ToolExecution::task_support)
            .unwrap_or_default()
    }
}

/// `tools/list` params.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListToolsRequest {
    /// Opaque pagination cursor from a previous page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
}

/// `tools/list` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResult {
    /// Available tools
    pub tools: Vec<Tool>,
    /// Cursor for the next page, when one exists
    #[serde(rename = "nextCursor", skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<Cursor>,
}

/// `tools/call` params.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolRequest {
    /// Tool name
    pub name: String,
    /// Raw tool arguments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
    /// Present when the caller wants the call augmented into a task
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskMetadata>,
    /// Extension metadata
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

/// `tools/call` result.
///
/// `content` always serializes, even when empty: the wire representation of
/// "no content" is `[]`, never `null`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallToolResult {
    /// Result content
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    /// Whether the tool itself failed (distinct from a protocol error)
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
    /// Structured result matching the tool's output schema
    #[serde(rename = "structuredContent", skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    /// Extension metadata
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

impl CallToolResult {
    /// A tool-level failure: message packed into text content, `isError` set.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(message)],
            is_error: Some(true),
            structured_content: None,
            meta: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn task_support_defaults_to_forbidden() {
        let tool = Tool::new("echo", "echoes input");
        assert_eq!(tool.task_support(), TaskSupport::Forbidden);

        let tool = Tool {
            execution: Some(ToolExecution {
                task_support: Some(TaskSupport::Optional),
            }),
            ..Tool::new("slow", "slow tool")
        };
        assert_eq!(tool.task_support(), TaskSupport::Optional);
    }

    #[test]
    fn task_support_wire_casing() {
        let exec = ToolExecution {
            task_support: Some(TaskSupport::Required),
        };
        assert_eq!(
            serde_json::to_value(&exec).unwrap(),
            json!({"taskSupport": "required"})
        );
    }

    #[test]
    fn empty_content_serializes_as_array_not_null() {
        let result = CallToolResult::default();
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"content\":[]"), "{json}");
        assert!(!json.contains("null"), "{json}");
    }

    #[test]
    fn call_request_round_trips_task_metadata() {
        let request = CallToolRequest {
            name: "analyze".into(),
            arguments: Some(json!({"input": "data"})),
            task: Some(TaskMetadata { ttl: Some(60_000) }),
            meta: None,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"task\":{\"ttl\":60000}"));
        let back: CallToolRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.task.unwrap().ttl, Some(60_000));
    }
}
