//! Structure recovery for raw log lines
//!
//! Tries a JSON object first, then a few common text layouts. Anything
//! unrecognised passes through as the raw message.

use crate::models::{ParsedLine, RawLine};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

lazy_static! {
    /// `[timestamp] [level] message` (Apache/Nginx)
    static ref BRACKETED: Regex =
        Regex::new(r"^\[([^\]]+)\]\s*\[([^\]]+)\]\s*(.+)$")
            .expect("built-in log format must compile");

    /// `Mon dd hh:mm:ss host service[pid]: message` (syslog)
    static ref SYSLOG: Regex =
        Regex::new(r"^(\w+\s+\d+\s+[\d:]+)\s+(\S+)\s+(\S+)\[(\d+)\]:\s*(.+)$")
            .expect("built-in log format must compile");

    /// `yyyy-mm-dd hh:mm:ss,ms LEVEL [component] - message` (Spring Boot)
    static ref SPRING: Regex =
        Regex::new(r"^([\d-]+\s+[\d:,]+)\s+(\w+)\s+\[([^\]]+)\]\s*-\s*(.+)$")
            .expect("built-in log format must compile");
}

/// Derive a [`ParsedLine`] from a raw line
pub fn parse_line(raw: RawLine) -> ParsedLine {
    if let Some(parsed) = parse_json(&raw) {
        return parsed;
    }

    let mut parsed = ParsedLine::unparsed(raw);

    if let Some(caps) = BRACKETED.captures(&parsed.raw.message) {
        parsed.level = Some(caps[2].trim().to_string());
        parsed.message = caps[3].to_string();
    } else if let Some(caps) = SYSLOG.captures(&parsed.raw.message) {
        parsed.component = Some(caps[3].to_string());
        parsed.message = caps[5].to_string();
    } else if let Some(caps) = SPRING.captures(&parsed.raw.message) {
        parsed.level = Some(caps[2].to_string());
        parsed.component = Some(caps[3].to_string());
        parsed.message = caps[4].to_string();
    }

    parsed
}

fn parse_json(raw: &RawLine) -> Option<ParsedLine> {
    let trimmed = raw.message.trim_start();
    if !trimmed.starts_with('{') {
        return None;
    }

    let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(trimmed) else {
        return None;
    };

    let text = |keys: &[&str]| -> Option<String> {
        keys.iter()
            .find_map(|k| fields.get(*k).and_then(Value::as_str))
            .map(str::to_string)
    };

    let level = text(&["level", "severity"]);
    let component = text(&["component", "service"]);
    let message = text(&["message", "msg"]).unwrap_or_else(|| raw.message.clone());

    Some(ParsedLine {
        raw: raw.clone(),
        message,
        level,
        component,
        structured: Some(fields),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LogStream;
    use chrono::Utc;

    fn raw(message: &str) -> RawLine {
        RawLine {
            container_id: "abc".to_string(),
            container_name: "api".to_string(),
            timestamp: Utc::now(),
            stream: LogStream::Stdout,
            message: message.to_string(),
        }
    }

    #[test]
    fn test_json_object() {
        let parsed = parse_line(raw(
            r#"{"severity":"error","service":"billing","msg":"charge failed","attempt":3}"#,
        ));

        assert_eq!(parsed.level.as_deref(), Some("error"));
        assert_eq!(parsed.component.as_deref(), Some("billing"));
        assert_eq!(parsed.message, "charge failed");
        assert_eq!(
            parsed.structured.as_ref().and_then(|s| s.get("attempt")),
            Some(&serde_json::json!(3))
        );
    }

    #[test]
    fn test_json_scalar_is_not_structured() {
        let parsed = parse_line(raw("42"));
        assert!(parsed.structured.is_none());
        assert_eq!(parsed.message, "42");
    }

    #[test]
    fn test_bracketed_layout() {
        let parsed = parse_line(raw("[Tue Mar 05 10:00:00 2024] [error] upstream timed out"));
        assert_eq!(parsed.level.as_deref(), Some("error"));
        assert_eq!(parsed.message, "upstream timed out");
        assert_eq!(parsed.raw.message, "[Tue Mar 05 10:00:00 2024] [error] upstream timed out");
    }

    #[test]
    fn test_syslog_layout() {
        let parsed = parse_line(raw("Mar  5 10:00:00 host1 sshd[812]: Accepted publickey"));
        assert_eq!(parsed.component.as_deref(), Some("sshd"));
        assert_eq!(parsed.level, None);
        assert_eq!(parsed.message, "Accepted publickey");
    }

    #[test]
    fn test_spring_layout() {
        let parsed = parse_line(raw(
            "2024-03-05 10:00:00,123 WARN [main] - Pool exhausted, waiting",
        ));
        assert_eq!(parsed.level.as_deref(), Some("WARN"));
        assert_eq!(parsed.component.as_deref(), Some("main"));
        assert_eq!(parsed.message, "Pool exhausted, waiting");
    }

    #[test]
    fn test_unrecognised_passes_through() {
        let parsed = parse_line(raw("plain text line"));
        assert_eq!(parsed.message, "plain text line");
        assert!(parsed.level.is_none());
        assert!(parsed.component.is_none());
        assert!(parsed.structured.is_none());
    }
}
