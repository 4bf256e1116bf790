//! Per-container analysis windows

use crate::models::{ClassifiedLine, Severity};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

/// Windowing configuration
#[derive(Debug, Clone)]
pub struct WindowConfig {
    /// Lines kept per container (default: 20)
    pub max_lines: usize,
    /// Lines since the last trigger that force analysis (default: 10)
    pub batch_size: usize,
    /// Maximum age of a line relative to the newest one (default: 5 minutes)
    pub max_span: Duration,
    /// A window is only analyzed if some line is at least this severe
    pub min_severity: Severity,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            max_lines: 20,
            batch_size: 10,
            max_span: Duration::from_secs(5 * 60),
            min_severity: Severity::Warning,
        }
    }
}

/// Bounded window of classified lines handed to the AI provider
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisContext {
    pub container_id: String,
    pub container_name: String,
    pub lines: Vec<ClassifiedLine>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

impl AnalysisContext {
    /// Build a context from a window, oldest line first
    pub fn from_lines(lines: Vec<ClassifiedLine>) -> Option<Self> {
        let first = lines.first()?;
        let last = lines.last()?;

        Some(Self {
            container_id: first.container_id().to_string(),
            container_name: first.container_name().to_string(),
            window_start: first.timestamp(),
            window_end: last.timestamp(),
            lines,
        })
    }

    /// Most severe line in the window
    pub fn peak_severity(&self) -> Option<Severity> {
        self.lines.iter().map(|l| l.severity).max()
    }
}

#[derive(Default)]
struct Window {
    lines: VecDeque<ClassifiedLine>,
    /// Lines pushed since the last trigger
    pending: usize,
}

/// Accumulates classified lines per container and decides when to analyze
pub struct ContextWindower {
    config: WindowConfig,
    windows: DashMap<String, Window>,
}

impl ContextWindower {
    pub fn new(config: WindowConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    /// Add a line; returns a context when the window should be analyzed
    pub fn push(&self, line: ClassifiedLine) -> Option<AnalysisContext> {
        let max_span = chrono::Duration::milliseconds(self.config.max_span.as_millis() as i64);
        let newest = line.timestamp();
        let urgent = line.metadata.requires_action;

        let mut window = self
            .windows
            .entry(line.container_id().to_string())
            .or_default();

        window.lines.push_back(line);
        window.pending += 1;

        while window.lines.len() > self.config.max_lines.max(1) {
            window.lines.pop_front();
        }
        while window
            .lines
            .front()
            .map(|l| newest - l.timestamp() > max_span)
            .unwrap_or(false)
        {
            window.lines.pop_front();
        }

        if window.pending < self.config.batch_size && !urgent {
            return None;
        }
        window.pending = 0;

        let min = self.config.min_severity;
        if !window.lines.iter().any(|l| l.severity >= min) {
            return None;
        }

        let lines: Vec<ClassifiedLine> = window.lines.drain(..).collect();
        AnalysisContext::from_lines(lines)
    }

    /// Drop a container's window, e.g. when its stream ends
    pub fn evict(&self, container_id: &str) {
        self.windows.remove(container_id);
    }

    /// Number of lines currently buffered for a container
    pub fn buffered(&self, container_id: &str) -> usize {
        self.windows
            .get(container_id)
            .map(|w| w.lines.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LineMetadata, LogStream, ParsedLine, RawLine};

    fn line(container: &str, severity: Severity, requires_action: bool, at: DateTime<Utc>) -> ClassifiedLine {
        ClassifiedLine {
            parsed: ParsedLine::unparsed(RawLine {
                container_id: container.to_string(),
                container_name: container.to_string(),
                timestamp: at,
                stream: LogStream::Stdout,
                message: format!("{} line", severity),
            }),
            severity,
            patterns: vec![],
            metadata: LineMetadata {
                is_error: severity >= Severity::Error,
                is_critical: severity == Severity::Critical,
                requires_action,
                tags: vec![],
            },
        }
    }

    fn windower(batch_size: usize) -> ContextWindower {
        ContextWindower::new(WindowConfig {
            batch_size,
            ..Default::default()
        })
    }

    #[test]
    fn test_batch_trigger_with_qualifying_line() {
        let w = windower(3);
        let now = Utc::now();

        assert!(w.push(line("api", Severity::Info, false, now)).is_none());
        assert!(w.push(line("api", Severity::Error, false, now)).is_none());

        let ctx = w.push(line("api", Severity::Info, false, now)).unwrap();
        assert_eq!(ctx.lines.len(), 3);
        assert_eq!(ctx.container_name, "api");
        assert_eq!(ctx.peak_severity(), Some(Severity::Error));
        assert_eq!(w.buffered("api"), 0);
    }

    #[test]
    fn test_batch_of_info_lines_is_not_analyzed() {
        let w = windower(2);
        let now = Utc::now();

        assert!(w.push(line("api", Severity::Info, false, now)).is_none());
        assert!(w.push(line("api", Severity::Info, false, now)).is_none());
        assert_eq!(w.buffered("api"), 2);
    }

    #[test]
    fn test_actionable_line_triggers_immediately() {
        let w = windower(10);
        let now = Utc::now();

        let ctx = w.push(line("db", Severity::Error, true, now)).unwrap();
        assert_eq!(ctx.lines.len(), 1);
        assert_eq!(ctx.window_start, now);
    }

    #[test]
    fn test_window_is_bounded() {
        let w = ContextWindower::new(WindowConfig {
            max_lines: 5,
            batch_size: 100,
            ..Default::default()
        });
        let now = Utc::now();

        for _ in 0..12 {
            w.push(line("api", Severity::Info, false, now));
        }
        assert_eq!(w.buffered("api"), 5);
    }

    #[test]
    fn test_old_lines_fall_out_of_span() {
        let w = windower(100);
        let start = Utc::now();

        w.push(line("api", Severity::Warning, false, start));
        w.push(line("api", Severity::Info, false, start + chrono::Duration::minutes(1)));
        let ctx = w
            .push(line("api", Severity::Error, true, start + chrono::Duration::minutes(6)))
            .unwrap();

        assert_eq!(ctx.lines.len(), 2);
        assert_eq!(ctx.window_start, start + chrono::Duration::minutes(1));
    }

    #[test]
    fn test_containers_are_windowed_separately() {
        let w = windower(2);
        let now = Utc::now();

        assert!(w.push(line("a", Severity::Error, false, now)).is_none());
        assert!(w.push(line("b", Severity::Error, false, now)).is_none());
        assert!(w.push(line("a", Severity::Info, false, now)).is_some());

        w.evict("b");
        assert_eq!(w.buffered("b"), 0);
    }
}
