//! Content block types for tool results and prompt/sampling messages.

use serde::{Deserialize, Serialize};

use super::core::{Annotations, Meta};

/// Content block union: `text`, `image`, `audio`, `resource_link`, `resource`.
///
/// Deserializing JSON `null` (or any non-object) fails with a serde error
/// rather than panicking; callers see `InvalidParams`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    /// Text content
    #[serde(rename = "text")]
    Text(TextContent),
    /// Image content
    #[serde(rename = "image")]
    Image(ImageContent),
    /// Audio content
    #[serde(rename = "audio")]
    Audio(AudioContent),
    /// Resource link
    #[serde(rename = "resource_link")]
    ResourceLink(ResourceLink),
    /// Embedded resource
    #[serde(rename = "resource")]
    Resource(EmbeddedResource),
}

impl ContentBlock {
    /// Shorthand for a plain text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(TextContent {
            text: text.into(),
            annotations: None,
            meta: None,
        })
    }
}

/// Plain text content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    /// The text of the message
    pub text: String,
    /// Optional display hints
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Annotations>,
    /// Extension metadata
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

/// Base64-encoded image content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageContent {
    /// Base64-encoded image data
    pub data: String,
    /// MIME type of the image
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    /// Optional display hints
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Annotations>,
    /// Extension metadata
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

/// Base64-encoded audio content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioContent {
    /// Base64-encoded audio data
    pub data: String,
    /// MIME type of the audio
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    /// Optional display hints
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Annotations>,
    /// Extension metadata
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

/// Reference to a resource the server exposes, without its contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLink {
    /// Resource name (programmatic identifier)
    pub name: String,
    /// Display title
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Resource URI
    pub uri: String,
    /// What this resource represents
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// MIME type, if known
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Size of the raw content in bytes, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Optional display hints
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Annotations>,
}

/// A resource embedded inline in a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedResource {
    /// The embedded contents (text or binary)
    pub resource: ResourceContents,
    /// Optional display hints
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Annotations>,
}

/// Text or binary resource contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceContents {
    /// Text contents
    Text(TextResourceContents),
    /// Binary contents
    Blob(BlobResourceContents),
}

/// Text resource contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextResourceContents {
    /// The URI of this resource
    pub uri: String,
    /// MIME type, if known
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// The text content
    pub text: String,
}

/// Binary resource contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobResourceContents {
    /// The URI of this resource
    pub uri: String,
    /// MIME type, if known
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Base64-encoded binary data
    pub blob: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(block: ContentBlock) {
        let json = serde_json::to_string(&block).unwrap();
        let back: ContentBlock = serde_json::from_str(&json).unwrap();
        assert_eq!(back, block);
    }

    #[test]
    fn every_variant_round_trips() {
        round_trip(ContentBlock::text("hello"));
        round_trip(ContentBlock::Image(ImageContent {
            data: "aGk=".into(),
            mime_type: "image/png".into(),
            annotations: None,
            meta: None,
        }));
        round_trip(ContentBlock::Audio(AudioContent {
            data: "aGk=".into(),
            mime_type: "audio/wav".into(),
            annotations: None,
            meta: None,
        }));
        round_trip(ContentBlock::ResourceLink(ResourceLink {
            name: "readme".into(),
            title: None,
            uri: "file:///README.md".into(),
            description: None,
            mime_type: Some("text/markdown".into()),
            size: Some(120),
            annotations: None,
        }));
        round_trip(ContentBlock::Resource(EmbeddedResource {
            resource: ResourceContents::Text(TextResourceContents {
                uri: "file:///a.txt".into(),
                mime_type: None,
                text: "contents".into(),
            }),
            annotations: None,
        }));
    }

    #[test]
    fn tagging_uses_wire_names() {
        let json = serde_json::to_string(&ContentBlock::text("x")).unwrap();
        assert!(json.contains("\"type\":\"text\""));
    }

    #[test]
    fn null_content_errors_instead_of_panicking() {
        let result: Result<ContentBlock, _> = serde_json::from_str("null");
        assert!(result.is_err());

        let result: Result<Vec<ContentBlock>, _> = serde_json::from_str("[null]");
        assert!(result.is_err());
    }

    #[test]
    fn unknown_type_tag_is_rejected() {
        let result: Result<ContentBlock, _> =
            serde_json::from_str(r#"{"type":"video","data":"x"}"#);
        assert!(result.is_err());
    }
}
