//! Sampling message types (`sampling/createMessage` results).
//!
//! `CreateMessageResult` content is restricted to text, image, and audio;
//! resource variants are rejected at decode time.

use serde::{Deserialize, Deserializer, Serialize};

use super::content::{AudioContent, ImageContent, TextContent};
use super::core::{Meta, Role};

/// Content allowed in sampling messages: text, image, or audio only.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum SamplingContent {
    /// Text content
    #[serde(rename = "text")]
    Text(TextContent),
    /// Image content
    #[serde(rename = "image")]
    Image(ImageContent),
    /// Audio content
    #[serde(rename = "audio")]
    Audio(AudioContent),
}

impl<'de> Deserialize<'de> for SamplingContent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        let tag = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| serde::de::Error::custom("sampling content missing type tag"))?;
        match tag {
            "text" => serde_json::from_value(value)
                .map(Self::Text)
                .map_err(serde::de::Error::custom),
            "image" => serde_json::from_value(value)
                .map(Self::Image)
                .map_err(serde::de::Error::custom),
            "audio" => serde_json::from_value(value)
                .map(Self::Audio)
                .map_err(serde::de::Error::custom),
            other => Err(serde::de::Error::custom(format!(
                "sampling content accepts only text/image/audio, got '{other}'"
            ))),
        }
    }
}

/// `sampling/createMessage` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMessageResult {
    /// Speaker role of the generated message
    pub role: Role,
    /// Generated content (text/image/audio)
    pub content: SamplingContent,
    /// Model that produced the message
    pub model: String,
    /// Why generation stopped
    #[serde(rename = "stopReason", skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    /// Extension metadata
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}
