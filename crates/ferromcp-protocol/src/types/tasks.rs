//! Task augmentation types: durable, cancellable executions of `tools/call`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::core::{Cursor, Meta};

/// `_meta` key linking a deferred result back to its task.
pub const RELATED_TASK_META_KEY: &str = "io.modelcontextprotocol/related-task";

/// Task status.
///
/// `Completed`, `Failed`, and `Cancelled` are terminal; once entered the
/// status never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Execution in progress
    Working,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Cancelled before completion
    Cancelled,
}

impl TaskStatus {
    /// Whether this status admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Working)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Working => "working",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Wire representation of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Server-assigned identifier (128-bit hex)
    #[serde(rename = "taskId")]
    pub task_id: String,
    /// Current status
    pub status: TaskStatus,
    /// Optional human-readable status detail
    #[serde(rename = "statusMessage", skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    /// RFC3339 creation time
    #[serde(rename = "createdAt")]
    pub created_at: String,
    /// RFC3339 time of the last status change
    #[serde(rename = "lastUpdatedAt")]
    pub last_updated_at: String,
    /// Time-to-live in milliseconds from creation; absent means unlimited
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
    /// Suggested polling interval in milliseconds
    #[serde(rename = "pollInterval", skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<u64>,
}

/// `task` parameter on a request asking for task augmentation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskMetadata {
    /// Requested time-to-live in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
}

/// `_meta` value linking messages to a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedTaskMetadata {
    /// The task this message belongs to
    #[serde(rename = "taskId")]
    pub task_id: String,
}

/// Immediate response to a task-augmented request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskResult {
    /// The created task, status `working`
    pub task: Task,
    /// Extension metadata
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

/// `tasks/get` and `tasks/result` params.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetTaskRequest {
    /// Task to look up
    #[serde(rename = "taskId")]
    pub task_id: String,
}

/// `tasks/cancel` params.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelTaskRequest {
    /// Task to cancel
    #[serde(rename = "taskId")]
    pub task_id: String,
}

/// `tasks/list` params.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListTasksRequest {
    /// Opaque pagination cursor from a previous page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
}

/// `tasks/list` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListTasksResult {
    /// Tasks owned by the calling session, ascending by creation order
    pub tasks: Vec<Task>,
    /// Cursor for the next page, when one exists
    #[serde(rename = "nextCursor", skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<Cursor>,
}

/// `notifications/tasks/status` params.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusNotification {
    /// Task this notification is for
    #[serde(rename = "taskId")]
    pub task_id: String,
    /// New status
    pub status: TaskStatus,
    /// Optional status detail
    #[serde(rename = "statusMessage", skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    /// RFC3339 creation time
    #[serde(rename = "createdAt")]
    pub created_at: String,
    /// Time-to-live in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
}

/// Inject `io.modelcontextprotocol/related-task` into a result's `_meta`.
pub fn attach_related_task(meta: &mut Option<Meta>, task_id: &str) {
    let related = RelatedTaskMetadata {
        task_id: task_id.to_string(),
    };
    meta.get_or_insert_with(Meta::new).insert(
        RELATED_TASK_META_KEY.to_string(),
        serde_json::to_value(related).unwrap_or(Value::Null),
    );
}
