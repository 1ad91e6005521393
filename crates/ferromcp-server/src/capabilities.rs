//! Capability reporting.
//!
//! The advertised `ServerCapabilities` document is derived from what is
//! actually installed at the moment `initialize` is answered, never stored.

use ferromcp_protocol::types::{
    CompletionCapabilities, LoggingCapabilities, PromptsCapabilities, ResourcesCapabilities,
    ServerCapabilities, TasksCapabilities, ToolsCapabilities,
};

/// Snapshot of the facts capability derivation needs.
pub(crate) struct CapabilitySnapshot {
    pub tool_count: usize,
    pub prompt_count: usize,
    pub resource_count: usize,
    pub template_count: usize,
    pub has_completion: bool,
    pub has_subscribe: bool,
    pub tasks_enabled: bool,
    pub has_tools_hint: bool,
    pub has_prompts_hint: bool,
    pub has_resources_hint: bool,
}

pub(crate) fn derive(snapshot: &CapabilitySnapshot) -> ServerCapabilities {
    let mut capabilities = ServerCapabilities {
        // Logging is always offered.
        logging: Some(LoggingCapabilities {}),
        ..Default::default()
    };

    if snapshot.prompt_count > 0 || snapshot.has_prompts_hint {
        capabilities.prompts = Some(PromptsCapabilities {
            list_changed: Some(true),
        });
    }
    if snapshot.resource_count > 0 || snapshot.template_count > 0 || snapshot.has_resources_hint {
        capabilities.resources = Some(ResourcesCapabilities {
            subscribe: snapshot.has_subscribe.then_some(true),
            list_changed: Some(true),
        });
    }
    if snapshot.tool_count > 0 || snapshot.has_tools_hint {
        capabilities.tools = Some(ToolsCapabilities {
            list_changed: Some(true),
        });
    }
    if snapshot.has_completion {
        capabilities.completions = Some(CompletionCapabilities {});
    }
    if snapshot.tasks_enabled {
        capabilities.tasks = Some(TasksCapabilities::tool_calls());
    }
    capabilities
}
