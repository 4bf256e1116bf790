//! Core data models shared across the observation pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Container as reported by the runtime on discovery or inspection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDescriptor {
    /// Runtime-assigned identifier (stable identity)
    pub id: String,
    /// Display name, without the leading slash Docker adds
    pub name: String,
    pub image: String,
    pub state: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// Output channel a log line was written to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl std::fmt::Display for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogStream::Stdout => write!(f, "stdout"),
            LogStream::Stderr => write!(f, "stderr"),
        }
    }
}

/// One demultiplexed log line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLine {
    pub container_id: String,
    pub container_name: String,
    pub timestamp: DateTime<Utc>,
    pub stream: LogStream,
    pub message: String,
}

/// A raw line plus whatever structure could be recovered from it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedLine {
    pub raw: RawLine,
    /// Message body after stripping a recognised text prefix
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured: Option<serde_json::Map<String, serde_json::Value>>,
}

impl ParsedLine {
    /// Wrap a raw line without any parsed structure
    pub fn unparsed(raw: RawLine) -> Self {
        Self {
            message: raw.message.clone(),
            raw,
            level: None,
            component: None,
            structured: None,
        }
    }
}

/// Severity assigned by the classifier, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flags and tags derived from severity and matched patterns
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineMetadata {
    pub is_error: bool,
    pub is_critical: bool,
    pub requires_action: bool,
    pub tags: Vec<String>,
}

/// A parsed line with its severity, matched patterns and metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedLine {
    pub parsed: ParsedLine,
    pub severity: Severity,
    pub patterns: Vec<String>,
    pub metadata: LineMetadata,
}

impl ClassifiedLine {
    pub fn container_id(&self) -> &str {
        &self.parsed.raw.container_id
    }

    pub fn container_name(&self) -> &str {
        &self.parsed.raw.container_name
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.parsed.raw.timestamp
    }

    pub fn message(&self) -> &str {
        &self.parsed.message
    }
}

/// Runtime lifecycle event (container start, stop, die, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// Object type, e.g. "container"
    pub kind: String,
    /// Event action, e.g. "start", "die"
    pub action: String,
    pub actor_id: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl LifecycleEvent {
    pub fn is_container(&self) -> bool {
        self.kind == "container"
    }

    pub fn is_start(&self) -> bool {
        self.is_container() && self.action == "start"
    }

    pub fn is_stop(&self) -> bool {
        self.is_container() && (self.action == "stop" || self.action == "die")
    }

    /// Container name carried in the event attributes, if any
    pub fn actor_name(&self) -> Option<&str> {
        self.attributes.get("name").map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: &str, action: &str) -> LifecycleEvent {
        LifecycleEvent {
            kind: kind.to_string(),
            action: action.to_string(),
            actor_id: "abc".to_string(),
            attributes: HashMap::from([("name".to_string(), "api".to_string())]),
        }
    }

    #[test]
    fn test_lifecycle_event_predicates() {
        assert!(event("container", "start").is_start());
        assert!(event("container", "die").is_stop());
        assert!(event("container", "stop").is_stop());
        assert!(!event("network", "start").is_start());
        assert!(!event("container", "exec_start").is_start());
        assert_eq!(event("container", "start").actor_name(), Some("api"));
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::Error);
        assert!(Severity::Warning > Severity::Info);
        assert_eq!(
            serde_json::to_string(&Severity::Warning).unwrap(),
            "\"WARNING\""
        );
    }
}
