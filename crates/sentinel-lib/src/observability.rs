//! Observability infrastructure for the sentinel
//!
//! Provides:
//! - Prometheus metrics (classification, streams, diagnosis, advice, policy, actions)
//! - Structured JSON logging of control-loop events with tracing

use crate::action::ExecutedAction;
use crate::advisory::{Advice, AdviceSeverity};
use crate::decision::DecisionRecord;
use crate::models::Severity;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for AI diagnosis latency (in seconds)
const DIAGNOSIS_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<SentinelMetricsInner> = OnceLock::new();

struct SentinelMetricsInner {
    lines_classified: IntCounterVec,
    active_streams: IntGauge,
    diagnosis_latency_seconds: Histogram,
    diagnoses: IntCounterVec,
    advice: IntCounterVec,
    policy_rejections: IntCounterVec,
    actions: IntCounterVec,
    publish_failures: IntCounter,
}

impl SentinelMetricsInner {
    fn new() -> Self {
        Self {
            lines_classified: register_int_counter_vec!(
                "sentinel_lines_classified_total",
                "Log lines classified, by severity",
                &["severity"]
            )
            .expect("Failed to register lines_classified_total"),

            active_streams: register_int_gauge!(
                "sentinel_active_streams",
                "Container log streams currently open"
            )
            .expect("Failed to register active_streams"),

            diagnosis_latency_seconds: register_histogram!(
                "sentinel_diagnosis_latency_seconds",
                "Time spent waiting for the AI provider",
                DIAGNOSIS_BUCKETS.to_vec()
            )
            .expect("Failed to register diagnosis_latency_seconds"),

            diagnoses: register_int_counter_vec!(
                "sentinel_diagnoses_total",
                "AI diagnoses requested, by outcome",
                &["outcome"]
            )
            .expect("Failed to register diagnoses_total"),

            advice: register_int_counter_vec!(
                "sentinel_advice_total",
                "Advice emitted, suppressed or ignored",
                &["outcome"]
            )
            .expect("Failed to register advice_total"),

            policy_rejections: register_int_counter_vec!(
                "sentinel_policy_rejections_total",
                "Action proposals rejected by the safety policy, by reason",
                &["reason"]
            )
            .expect("Failed to register policy_rejections_total"),

            actions: register_int_counter_vec!(
                "sentinel_actions_total",
                "Actions handled by the executor, by kind and outcome",
                &["action", "outcome"]
            )
            .expect("Failed to register actions_total"),

            publish_failures: register_int_counter!(
                "sentinel_publish_failures_total",
                "Classified lines that could not be published to the bus"
            )
            .expect("Failed to register publish_failures_total"),
        }
    }
}

/// Sentinel metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct SentinelMetrics {
    inner: &'static SentinelMetricsInner,
}

impl Default for SentinelMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SentinelMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        Self {
            inner: GLOBAL_METRICS.get_or_init(SentinelMetricsInner::new),
        }
    }

    pub fn inc_lines_classified(&self, severity: Severity) {
        self.inner
            .lines_classified
            .with_label_values(&[severity.as_str()])
            .inc();
    }

    pub fn set_active_streams(&self, count: i64) {
        self.inner.active_streams.set(count);
    }

    /// Record a diagnosis round trip; `outcome` is e.g. "ok", "error", "timeout"
    pub fn observe_diagnosis(&self, duration_secs: f64, outcome: &str) {
        self.inner.diagnosis_latency_seconds.observe(duration_secs);
        self.inner.diagnoses.with_label_values(&[outcome]).inc();
    }

    pub fn inc_advice(&self, outcome: &str) {
        self.inner.advice.with_label_values(&[outcome]).inc();
    }

    pub fn inc_policy_rejection(&self, reason: &str) {
        self.inner
            .policy_rejections
            .with_label_values(&[reason])
            .inc();
    }

    pub fn inc_action(&self, action: &str, outcome: &str) {
        self.inner
            .actions
            .with_label_values(&[action, outcome])
            .inc();
    }

    pub fn inc_publish_failures(&self) {
        self.inner.publish_failures.inc();
    }
}

/// Structured logger for control-loop events
///
/// Emits consistent JSON records for advice, decisions and actions so
/// they can be filtered by `event`.
#[derive(Clone)]
pub struct StructuredLogger {
    host_name: String,
}

impl StructuredLogger {
    pub fn new(host_name: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
        }
    }

    /// Log sentinel startup
    pub fn log_startup(&self, version: &str, runtime_endpoint: &str, safety_mode: &str) {
        info!(
            event = "sentinel_started",
            host = %self.host_name,
            version = %version,
            runtime_endpoint = %runtime_endpoint,
            safety_mode = %safety_mode,
            "Sentinel started"
        );
    }

    /// Log sentinel shutdown
    pub fn log_shutdown(&self, reason: &str, released_streams: usize) {
        info!(
            event = "sentinel_shutdown",
            host = %self.host_name,
            reason = %reason,
            released_streams,
            "Sentinel shutting down"
        );
    }

    /// Log advice that passed the advisory gate
    pub fn log_advice(&self, advice: &Advice) {
        let container = advice.source.container_name.as_deref().unwrap_or("unknown");
        match advice.severity {
            AdviceSeverity::Critical => warn!(
                event = "advice",
                host = %self.host_name,
                advice_id = %advice.id,
                container = %container,
                severity = %advice.severity,
                confidence = advice.confidence,
                title = %advice.title,
                explanation = %advice.explanation,
                recommendation = advice.recommendation.as_deref().unwrap_or_default(),
                "Critical advice emitted"
            ),
            _ => info!(
                event = "advice",
                host = %self.host_name,
                advice_id = %advice.id,
                container = %container,
                severity = %advice.severity,
                confidence = advice.confidence,
                title = %advice.title,
                explanation = %advice.explanation,
                recommendation = advice.recommendation.as_deref().unwrap_or_default(),
                "Advice emitted"
            ),
        }
    }

    /// Log an explainable decision
    pub fn log_decision(&self, record: &DecisionRecord) {
        let signals = serde_json::to_string(&record.explain_why.signals).unwrap_or_default();
        info!(
            event = "decision",
            host = %self.host_name,
            decision_id = %record.decision_id,
            action = %record.action,
            source = %record.explain_why.source,
            confidence = ?record.explain_why.confidence,
            signals = %signals,
            reasons = %record.summary(),
            "Decision: {}", record.action
        );
    }

    /// Log the result of an executed (or skipped) action
    pub fn log_action(&self, action: &ExecutedAction) {
        if action.executed {
            info!(
                event = "action",
                host = %self.host_name,
                action = %action.proposal.action,
                target = %action.proposal.target,
                outcome = %action.outcome,
                confidence = action.proposal.confidence,
                "Action executed"
            );
        } else {
            warn!(
                event = "action",
                host = %self.host_name,
                action = %action.proposal.action,
                target = %action.proposal.target,
                outcome = %action.outcome,
                reason = action.skipped_reason.as_deref().unwrap_or_default(),
                "Action not executed"
            );
        }
    }

    /// Log that action guardrails are switched off
    pub fn log_degraded_safety(&self, mode: &str) {
        warn!(
            event = "degraded_safety",
            host = %self.host_name,
            safety_mode = %mode,
            "Action safety checks are disabled, actions run without guardrails"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionProposal;
    use crate::decision::DecisionSource;

    #[test]
    fn test_sentinel_metrics_creation() {
        // The Prometheus registry is global; handles share one instance.
        let metrics = SentinelMetrics::new();
        let other = SentinelMetrics::new();

        metrics.inc_lines_classified(Severity::Error);
        metrics.set_active_streams(3);
        metrics.observe_diagnosis(0.2, "ok");
        metrics.inc_advice("emitted");
        metrics.inc_policy_rejection("noop");
        metrics.inc_action("noop", "skipped");
        other.inc_publish_failures();

        assert!(std::ptr::eq(metrics.inner, other.inner));
    }

    #[test]
    fn test_structured_logger_events() {
        let logger = StructuredLogger::new("test-host");
        assert_eq!(logger.host_name, "test-host");

        logger.log_decision(
            &DecisionRecord::new("policy_rejected", DecisionSource::Rule).reason("No-op action"),
        );
        logger.log_action(&ExecutedAction::skipped(
            ActionProposal::noop("api", "x", 0.9),
            "No-op action",
        ));
    }
}
