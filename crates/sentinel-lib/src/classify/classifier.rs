//! Severity and pattern classification

use super::patterns::{
    matches_critical, matches_error, matches_warning, matching_errors, matching_warnings,
};
use crate::models::{ClassifiedLine, LineMetadata, LogStream, ParsedLine, Severity};

/// Pattern name fragments that make a line actionable on their own
const ACTIONABLE_FRAGMENTS: &[&str] = &["timeout", "connection", "out_of_memory", "disk_full"];

/// Rule-based log classifier
///
/// Stateless; a single instance can be shared across all streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogClassifier;

impl LogClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, parsed: ParsedLine) -> ClassifiedLine {
        let message = parsed.message.to_lowercase();
        let severity = determine_severity(&parsed, &message);
        let patterns = match_patterns(&message);
        let metadata = extract_metadata(&parsed, severity, &patterns);

        ClassifiedLine {
            parsed,
            severity,
            patterns,
            metadata,
        }
    }
}

/// Map an explicit level string onto a severity
pub fn severity_from_level(level: &str) -> Option<Severity> {
    match level.trim().to_uppercase().as_str() {
        "CRITICAL" | "FATAL" => Some(Severity::Critical),
        "ERROR" => Some(Severity::Error),
        "WARNING" | "WARN" => Some(Severity::Warning),
        "INFO" => Some(Severity::Info),
        "DEBUG" | "TRACE" => Some(Severity::Debug),
        _ => None,
    }
}

fn determine_severity(parsed: &ParsedLine, message: &str) -> Severity {
    if let Some(severity) = parsed.level.as_deref().and_then(severity_from_level) {
        return severity;
    }

    if parsed.raw.stream == LogStream::Stderr {
        return if matches_critical(message) {
            Severity::Critical
        } else {
            Severity::Error
        };
    }

    if matches_critical(message) {
        Severity::Critical
    } else if matches_error(message) {
        Severity::Error
    } else if matches_warning(message) {
        Severity::Warning
    } else {
        // Informational patterns and the fallback both land on INFO
        Severity::Info
    }
}

fn match_patterns(message: &str) -> Vec<String> {
    let errors = matching_errors(message);

    let mut matched: Vec<String> = errors
        .names
        .iter()
        .map(|name| format!("error:{}", name))
        .collect();

    if let Some(category) = errors.category {
        matched.push(format!("category:{}", category));
    }

    matched.extend(
        matching_warnings(message)
            .into_iter()
            .map(|name| format!("warning:{}", name)),
    );

    matched
}

fn extract_metadata(parsed: &ParsedLine, severity: Severity, patterns: &[String]) -> LineMetadata {
    let is_critical = severity == Severity::Critical;
    let is_error = severity >= Severity::Error;

    let requires_action = is_critical
        || patterns
            .iter()
            .any(|p| ACTIONABLE_FRAGMENTS.iter().any(|f| p.contains(f)));

    let mut tags = Vec::new();
    if let Some(component) = &parsed.component {
        tags.push(format!("component:{}", component));
    }
    if !parsed.raw.container_name.is_empty() {
        tags.push(format!("container:{}", parsed.raw.container_name));
    }
    tags.push(format!("severity:{}", severity));
    if let Some(category) = patterns.iter().find(|p| p.starts_with("category:")) {
        tags.push(category.clone());
    }

    LineMetadata {
        is_error,
        is_critical,
        requires_action,
        tags,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::parse_line;
    use crate::models::RawLine;
    use chrono::Utc;

    fn classify(stream: LogStream, message: &str) -> ClassifiedLine {
        LogClassifier::new().classify(parse_line(RawLine {
            container_id: "abc".to_string(),
            container_name: "api".to_string(),
            timestamp: Utc::now(),
            stream,
            message: message.to_string(),
        }))
    }

    #[test]
    fn test_explicit_level_wins() {
        let line = classify(LogStream::Stderr, r#"{"level":"info","message":"kernel panic drill"}"#);
        assert_eq!(line.severity, Severity::Info);

        let line = classify(LogStream::Stdout, r#"{"level":"fatal","message":"bye"}"#);
        assert_eq!(line.severity, Severity::Critical);
    }

    #[test]
    fn test_stderr_fallback() {
        assert_eq!(classify(LogStream::Stderr, "hello").severity, Severity::Error);
        assert_eq!(
            classify(LogStream::Stderr, "Segmentation fault (core dumped)").severity,
            Severity::Critical
        );
    }

    #[test]
    fn test_pattern_precedence() {
        assert_eq!(classify(LogStream::Stdout, "No space left on device").severity, Severity::Critical);
        assert_eq!(classify(LogStream::Stdout, "Unhandled exception in worker").severity, Severity::Error);
        assert_eq!(classify(LogStream::Stdout, "Slow query took 1200ms").severity, Severity::Warning);
        assert_eq!(classify(LogStream::Stdout, "Server listening on :8080").severity, Severity::Info);
        assert_eq!(classify(LogStream::Stdout, "tick").severity, Severity::Info);
    }

    #[test]
    fn test_database_timeout_classification() {
        let line = classify(LogStream::Stdout, "Database connection timeout");

        assert_eq!(line.severity, Severity::Error);
        assert!(line.metadata.is_error);
        assert!(!line.metadata.is_critical);
        assert!(line.metadata.requires_action);
        assert_eq!(line.patterns[0], "error:database_timeout");
        assert!(line.patterns.contains(&"category:database".to_string()));
        assert_eq!(
            line.metadata.tags,
            vec!["container:api", "severity:ERROR", "category:database"]
        );
    }

    #[test]
    fn test_warning_tags_and_component() {
        let line = classify(
            LogStream::Stdout,
            "2024-03-05 10:00:00,123 WARN [pool] - Retrying connection to cache",
        );

        assert_eq!(line.severity, Severity::Warning);
        assert!(line.patterns.contains(&"warning:connection_retry".to_string()));
        assert!(line.metadata.requires_action);
        assert_eq!(line.metadata.tags[0], "component:pool");
    }

    #[test]
    fn test_plain_info_needs_no_action() {
        let line = classify(LogStream::Stdout, "user logged in");
        assert_eq!(line.severity, Severity::Info);
        assert!(!line.metadata.is_error);
        assert!(!line.metadata.requires_action);
    }

    #[test]
    fn test_severity_from_level() {
        assert_eq!(severity_from_level("warn"), Some(Severity::Warning));
        assert_eq!(severity_from_level(" TRACE "), Some(Severity::Debug));
        assert_eq!(severity_from_level("notice"), None);
    }
}
