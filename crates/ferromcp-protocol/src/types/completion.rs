//! Argument autocompletion types (`completion/complete`).

use serde::{Deserialize, Serialize};

/// What the completion request is completing against.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CompletionReference {
    /// A prompt argument
    #[serde(rename = "ref/prompt")]
    Prompt {
        /// Prompt name
        name: String,
    },
    /// A resource-template variable
    #[serde(rename = "ref/resource")]
    Resource {
        /// Resource URI or URI template
        uri: String,
    },
}

/// `completion/complete` params.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteRequest {
    /// What is being completed
    #[serde(rename = "ref")]
    pub reference: CompletionReference,
    /// The argument under completion
    pub argument: CompletionArgument,
}

/// The argument being completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionArgument {
    /// Argument name
    pub name: String,
    /// Value typed so far
    pub value: String,
}

/// `completion/complete` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteResult {
    /// Completion values
    pub completion: Completion,
}

/// Completion values and pagination hints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    /// Suggested values (at most 100)
    pub values: Vec<String>,
    /// Total number of matches, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    /// Whether more values exist beyond `values`
    #[serde(rename = "hasMore", skip_serializing_if = "Option::is_none")]
    pub has_more: Option<bool>,
}
