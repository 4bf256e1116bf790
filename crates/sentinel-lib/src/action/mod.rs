//! Action planning, policy and execution
//!
//! Advice becomes an [`ActionProposal`], which must pass the
//! [`ActionPolicy`] before the [`ActionExecutor`] touches any container.

mod executor;
mod planner;
mod policy;

pub use executor::{ActionExecutor, DEFAULT_ACTION_TIMEOUT};
pub use planner::{ActionPlanner, KeywordRule, DEFAULT_SCALE_REPLICAS};
pub use policy::{
    ActionHistoryEntry, ActionPolicy, PolicyDecision, PolicyRejection, SafetyConfig, SafetyMode,
    DEFAULT_ACTION_COOLDOWN, MIN_ACTION_CONFIDENCE,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of side effect a proposal asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    RestartContainer,
    ScaleContainer,
    ThrottleLogs,
    MarkDegraded,
    Noop,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::RestartContainer => "restart_container",
            ActionKind::ScaleContainer => "scale_container",
            ActionKind::ThrottleLogs => "throttle_logs",
            ActionKind::MarkDegraded => "mark_degraded",
            ActionKind::Noop => "noop",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate action derived from advice, not yet authorized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionProposal {
    pub action: ActionKind,
    pub target: String,
    pub reason: String,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Map<String, serde_json::Value>>,
}

impl ActionProposal {
    pub fn noop(target: impl Into<String>, reason: impl Into<String>, confidence: f64) -> Self {
        Self {
            action: ActionKind::Noop,
            target: target.into(),
            reason: reason.into(),
            confidence,
            params: None,
        }
    }

    /// Raw `replicas` parameter, if present
    pub fn replicas(&self) -> Option<&serde_json::Value> {
        self.params.as_ref().and_then(|p| p.get("replicas"))
    }

    /// `action:target`, used for approval matching and cooldown keys
    pub fn describe(&self) -> String {
        format!("{}:{}", self.action, self.target)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Executed,
    Skipped,
    Failed,
}

impl std::fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionOutcome::Executed => write!(f, "executed"),
            ExecutionOutcome::Skipped => write!(f, "skipped"),
            ExecutionOutcome::Failed => write!(f, "failed"),
        }
    }
}

/// Result of handling a proposal, whatever happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutedAction {
    pub proposal: ActionProposal,
    pub executed: bool,
    pub outcome: ExecutionOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ExecutedAction {
    pub fn executed(proposal: ActionProposal) -> Self {
        Self {
            proposal,
            executed: true,
            outcome: ExecutionOutcome::Executed,
            skipped_reason: None,
            timestamp: Utc::now(),
        }
    }

    pub fn skipped(proposal: ActionProposal, reason: impl Into<String>) -> Self {
        Self {
            proposal,
            executed: false,
            outcome: ExecutionOutcome::Skipped,
            skipped_reason: Some(reason.into()),
            timestamp: Utc::now(),
        }
    }

    pub fn failed(proposal: ActionProposal, reason: impl Into<String>) -> Self {
        Self {
            proposal,
            executed: false,
            outcome: ExecutionOutcome::Failed,
            skipped_reason: Some(reason.into()),
            timestamp: Utc::now(),
        }
    }
}
