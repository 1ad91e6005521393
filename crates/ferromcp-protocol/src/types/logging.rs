//! Logging channel types (`logging/setLevel`, `notifications/message`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Syslog-style severity ladder, least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    /// Debug-level messages
    Debug,
    /// Informational messages
    Info,
    /// Normal but significant conditions
    Notice,
    /// Warning conditions
    Warning,
    /// Error conditions
    Error,
    /// Critical conditions
    Critical,
    /// Action must be taken immediately
    Alert,
    /// System is unusable
    Emergency,
}

/// `logging/setLevel` params.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetLevelRequest {
    /// Minimum severity the client wants to receive
    pub level: LoggingLevel,
}

/// `notifications/message` params.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingMessageNotification {
    /// Message severity
    pub level: LoggingLevel,
    /// Optional logger name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logger: Option<String>,
    /// Arbitrary JSON payload
    pub data: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering_follows_the_ladder() {
        assert!(LoggingLevel::Debug < LoggingLevel::Info);
        assert!(LoggingLevel::Warning < LoggingLevel::Error);
        assert!(LoggingLevel::Alert < LoggingLevel::Emergency);
    }

    #[test]
    fn wire_names_are_lowercase() {
        assert_eq!(serde_json::to_string(&LoggingLevel::Notice).unwrap(), "\"notice\"");
        let level: LoggingLevel = serde_json::from_str("\"emergency\"").unwrap();
        assert_eq!(level, LoggingLevel::Emergency);
    }
}
