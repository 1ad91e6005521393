//! JSON-RPC method names used by the MCP core.

/// `initialize` request
pub const INITIALIZE: &str = "initialize";
/// `notifications/initialized` notification
pub const INITIALIZED: &str = "notifications/initialized";
/// `notifications/cancelled` notification
pub const CANCELLED: &str = "notifications/cancelled";
/// `ping` request (either direction)
pub const PING: &str = "ping";

/// `tools/list` request
pub const TOOLS_LIST: &str = "tools/list";
/// `tools/call` request
pub const TOOLS_CALL: &str = "tools/call";
/// `notifications/tools/list_changed` notification
pub const TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";

/// `prompts/list` request
pub const PROMPTS_LIST: &str = "prompts/list";
/// `prompts/get` request
pub const PROMPTS_GET: &str = "prompts/get";
/// `notifications/prompts/list_changed` notification
pub const PROMPTS_LIST_CHANGED: &str = "notifications/prompts/list_changed";

/// `resources/list` request
pub const RESOURCES_LIST: &str = "resources/list";
/// `resources/templates/list` request
pub const RESOURCE_TEMPLATES_LIST: &str = "resources/templates/list";
/// `resources/read` request
pub const RESOURCES_READ: &str = "resources/read";
/// `resources/subscribe` request
pub const RESOURCES_SUBSCRIBE: &str = "resources/subscribe";
/// `resources/unsubscribe` request
pub const RESOURCES_UNSUBSCRIBE: &str = "resources/unsubscribe";
/// `notifications/resources/list_changed` notification
pub const RESOURCES_LIST_CHANGED: &str = "notifications/resources/list_changed";

/// `completion/complete` request
pub const COMPLETION_COMPLETE: &str = "completion/complete";

/// `logging/setLevel` request
pub const LOGGING_SET_LEVEL: &str = "logging/setLevel";
/// `notifications/message` log notification
pub const LOGGING_MESSAGE: &str = "notifications/message";

/// `tasks/get` request
pub const TASKS_GET: &str = "tasks/get";
/// `tasks/list` request
pub const TASKS_LIST: &str = "tasks/list";
/// `tasks/cancel` request
pub const TASKS_CANCEL: &str = "tasks/cancel";
/// `tasks/result` request
pub const TASKS_RESULT: &str = "tasks/result";
/// `notifications/tasks/status` notification
pub const TASKS_STATUS: &str = "notifications/tasks/status";
