//! Safety policy for proposed actions
//!
//! Checks run in a fixed order and the first failure wins. History and
//! cooldowns are only written on the allow path.

use super::{ActionKind, ActionProposal};
use crate::advisory::{CooldownDecision, CooldownStore};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Minimum proposal confidence for any side effect
pub const MIN_ACTION_CONFIDENCE: f64 = 0.75;

/// Base cooldown per `action:target` (5 minutes)
pub const DEFAULT_ACTION_COOLDOWN: Duration = Duration::from_secs(300);

const HISTORY_RETENTION_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyMode {
    #[default]
    Strict,
    /// Currently identical to strict
    Permissive,
    /// Skips rate, scale, approval and cooldown checks
    Disabled,
}

impl std::fmt::Display for SafetyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SafetyMode::Strict => write!(f, "strict"),
            SafetyMode::Permissive => write!(f, "permissive"),
            SafetyMode::Disabled => write!(f, "disabled"),
        }
    }
}

impl std::str::FromStr for SafetyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(SafetyMode::Strict),
            "permissive" => Ok(SafetyMode::Permissive),
            "disabled" => Ok(SafetyMode::Disabled),
            other => Err(format!("unknown safety mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SafetyConfig {
    pub mode: SafetyMode,
    pub max_actions_per_hour: usize,
    pub max_scale_up: u32,
    pub min_scale_down: u32,
    /// Case-insensitive substrings of `action:target` that need a human
    pub require_approval: Vec<String>,
    pub action_cooldown: Duration,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            mode: SafetyMode::Strict,
            max_actions_per_hour: 5,
            max_scale_up: 10,
            min_scale_down: 1,
            require_approval: vec![
                "database_migrations".to_string(),
                "security_patches".to_string(),
            ],
            action_cooldown: DEFAULT_ACTION_COOLDOWN,
        }
    }
}

/// Why a proposal was not authorized
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyRejection {
    Noop,
    LowConfidence { confidence: f64, minimum: f64 },
    RateLimited { limit: usize },
    InvalidReplicas,
    ScaleAboveMax { replicas: i64, max: u32 },
    ScaleBelowMin { replicas: i64, min: u32 },
    ApprovalRequired { pattern: String },
    CoolingDown { remaining: Duration },
}

impl PolicyRejection {
    /// Stable label for metrics
    pub fn label(&self) -> &'static str {
        match self {
            PolicyRejection::Noop => "noop",
            PolicyRejection::LowConfidence { .. } => "low_confidence",
            PolicyRejection::RateLimited { .. } => "rate_limited",
            PolicyRejection::InvalidReplicas => "invalid_replicas",
            PolicyRejection::ScaleAboveMax { .. } => "scale_above_max",
            PolicyRejection::ScaleBelowMin { .. } => "scale_below_min",
            PolicyRejection::ApprovalRequired { .. } => "approval_required",
            PolicyRejection::CoolingDown { .. } => "cooling_down",
        }
    }
}

impl std::fmt::Display for PolicyRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyRejection::Noop => write!(f, "No-op action"),
            PolicyRejection::LowConfidence { confidence, minimum } => write!(
                f,
                "Confidence {:.2} below action minimum {:.2}",
                confidence, minimum
            ),
            PolicyRejection::RateLimited { limit } => {
                write!(f, "Hourly action limit of {} reached", limit)
            }
            PolicyRejection::InvalidReplicas => write!(f, "Replica count must be an integer"),
            PolicyRejection::ScaleAboveMax { replicas, max } => {
                write!(f, "Requested {} replicas exceeds max scale up {}", replicas, max)
            }
            PolicyRejection::ScaleBelowMin { replicas, min } => write!(
                f,
                "Requested {} replicas is below min scale down {}",
                replicas, min
            ),
            PolicyRejection::ApprovalRequired { pattern } => {
                write!(f, "Human approval required ({})", pattern)
            }
            PolicyRejection::CoolingDown { remaining } => {
                write!(f, "Action cooling down for {}s", remaining.as_secs())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub reason: Option<PolicyRejection>,
}

impl PolicyDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn reject(reason: PolicyRejection) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub action: ActionKind,
    pub target: String,
}

/// Ordered guardrail chain in front of the executor
pub struct ActionPolicy {
    config: SafetyConfig,
    history: Mutex<VecDeque<ActionHistoryEntry>>,
    cooldowns: Arc<CooldownStore>,
}

impl ActionPolicy {
    pub fn new(config: SafetyConfig, cooldowns: Arc<CooldownStore>) -> Self {
        Self {
            config,
            history: Mutex::new(VecDeque::new()),
            cooldowns,
        }
    }

    pub fn config(&self) -> &SafetyConfig {
        &self.config
    }

    pub fn evaluate(&self, proposal: &ActionProposal) -> PolicyDecision {
        self.evaluate_at(proposal, Utc::now())
    }

    pub fn evaluate_at(&self, proposal: &ActionProposal, now: DateTime<Utc>) -> PolicyDecision {
        if proposal.action == ActionKind::Noop {
            return PolicyDecision::reject(PolicyRejection::Noop);
        }

        if proposal.confidence < MIN_ACTION_CONFIDENCE {
            return PolicyDecision::reject(PolicyRejection::LowConfidence {
                confidence: proposal.confidence,
                minimum: MIN_ACTION_CONFIDENCE,
            });
        }

        let mut history = self.history.lock();

        if self.config.mode == SafetyMode::Disabled {
            warn!(
                action = %proposal.action,
                target = %proposal.target,
                "Safety mode disabled, allowing action without guardrails"
            );
            Self::append(&mut history, proposal, now);
            return PolicyDecision::allow();
        }

        let hour_ago = now - ChronoDuration::hours(1);
        let recent = history.iter().filter(|e| e.timestamp > hour_ago).count();
        if recent >= self.config.max_actions_per_hour {
            info!(recent, limit = self.config.max_actions_per_hour, "Hourly action limit reached");
            return PolicyDecision::reject(PolicyRejection::RateLimited {
                limit: self.config.max_actions_per_hour,
            });
        }

        if proposal.action == ActionKind::ScaleContainer {
            if let Err(rejection) = self.check_scale(proposal) {
                return PolicyDecision::reject(rejection);
            }
        }

        let description = proposal.describe().to_lowercase();
        if let Some(pattern) = self
            .config
            .require_approval
            .iter()
            .find(|p| !p.is_empty() && description.contains(&p.to_lowercase()))
        {
            return PolicyDecision::reject(PolicyRejection::ApprovalRequired {
                pattern: pattern.clone(),
            });
        }

        let key = format!("action:{}", proposal.describe());
        let cooldown = self
            .cooldowns
            .is_allowed(&key, proposal.confidence, self.config.action_cooldown);
        if let CooldownDecision::Blocked { remaining } = cooldown {
            return PolicyDecision::reject(PolicyRejection::CoolingDown { remaining });
        }

        Self::append(&mut history, proposal, now);
        debug!(action = %proposal.action, target = %proposal.target, "Action allowed");
        PolicyDecision::allow()
    }

    /// Allowed actions in the trailing hour
    pub fn recent_actions(&self) -> usize {
        let hour_ago = Utc::now() - ChronoDuration::hours(1);
        self.history
            .lock()
            .iter()
            .filter(|e| e.timestamp > hour_ago)
            .count()
    }

    pub fn history(&self) -> Vec<ActionHistoryEntry> {
        self.history.lock().iter().cloned().collect()
    }

    fn check_scale(&self, proposal: &ActionProposal) -> Result<(), PolicyRejection> {
        let replicas = proposal
            .replicas()
            .and_then(integral_replicas)
            .ok_or(PolicyRejection::InvalidReplicas)?;

        if replicas > i64::from(self.config.max_scale_up) {
            return Err(PolicyRejection::ScaleAboveMax {
                replicas,
                max: self.config.max_scale_up,
            });
        }
        if replicas < i64::from(self.config.min_scale_down) {
            return Err(PolicyRejection::ScaleBelowMin {
                replicas,
                min: self.config.min_scale_down,
            });
        }
        Ok(())
    }

    fn append(
        history: &mut VecDeque<ActionHistoryEntry>,
        proposal: &ActionProposal,
        now: DateTime<Utc>,
    ) {
        history.push_back(ActionHistoryEntry {
            timestamp: now,
            action: proposal.action,
            target: proposal.target.clone(),
        });
        let cutoff = now - ChronoDuration::hours(HISTORY_RETENTION_HOURS);
        while history.front().map(|e| e.timestamp < cutoff).unwrap_or(false) {
            history.pop_front();
        }
    }
}

/// Finite whole number, accepting `3` and `3.0`
fn integral_replicas(value: &serde_json::Value) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    let f = value.as_f64()?;
    (f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64).then(|| f as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy(config: SafetyConfig) -> ActionPolicy {
        ActionPolicy::new(config, Arc::new(CooldownStore::new()))
    }

    fn restart(target: &str, confidence: f64) -> ActionProposal {
        ActionProposal {
            action: ActionKind::RestartContainer,
            target: target.to_string(),
            reason: "memory leak".to_string(),
            confidence,
            params: None,
        }
    }

    fn scale(target: &str, replicas: serde_json::Value) -> ActionProposal {
        let mut params = serde_json::Map::new();
        params.insert("replicas".to_string(), replicas);
        ActionProposal {
            action: ActionKind::ScaleContainer,
            target: target.to_string(),
            reason: "scale".to_string(),
            confidence: 0.9,
            params: Some(params),
        }
    }

    #[test]
    fn test_noop_rejected_before_anything_else() {
        let policy = policy(SafetyConfig {
            max_actions_per_hour: 0,
            ..Default::default()
        });
        let decision = policy.evaluate(&ActionProposal::noop("api", "x", 0.1));
        assert!(!decision.allowed);
        assert_eq!(decision.reason, Some(PolicyRejection::Noop));
        assert_eq!(decision.reason.unwrap().to_string(), "No-op action");
    }

    #[test]
    fn test_confidence_minimum() {
        let policy = policy(SafetyConfig::default());
        let decision = policy.evaluate(&restart("api", 0.74));
        assert!(matches!(decision.reason, Some(PolicyRejection::LowConfidence { .. })));
        assert!(policy.history().is_empty());

        assert!(policy.evaluate(&restart("api", 0.75)).allowed);
    }

    #[test]
    fn test_hourly_cap() {
        let policy = policy(SafetyConfig {
            max_actions_per_hour: 2,
            ..Default::default()
        });

        assert!(policy.evaluate(&restart("a", 0.9)).allowed);
        assert!(policy.evaluate(&restart("b", 0.9)).allowed);
        let third = policy.evaluate(&restart("c", 0.9));
        assert!(!third.allowed);
        assert_eq!(third.reason, Some(PolicyRejection::RateLimited { limit: 2 }));
        assert_eq!(policy.recent_actions(), 2);
    }

    #[test]
    fn test_hourly_window_slides() {
        let policy = policy(SafetyConfig {
            max_actions_per_hour: 1,
            ..Default::default()
        });
        let start = Utc::now() - ChronoDuration::hours(2);

        assert!(policy.evaluate_at(&restart("a", 0.9), start).allowed);
        assert!(!policy
            .evaluate_at(&restart("b", 0.9), start + ChronoDuration::minutes(30))
            .allowed);
        assert!(policy
            .evaluate_at(&restart("c", 0.9), start + ChronoDuration::minutes(61))
            .allowed);
    }

    #[test]
    fn test_scale_bounds() {
        let policy = policy(SafetyConfig::default());

        assert!(policy.evaluate(&scale("w1", json!(2))).allowed);
        assert!(policy.evaluate(&scale("w2", json!(4.0))).allowed);
        assert_eq!(
            policy.evaluate(&scale("w3", json!(11))).reason,
            Some(PolicyRejection::ScaleAboveMax { replicas: 11, max: 10 })
        );
        assert_eq!(
            policy.evaluate(&scale("w4", json!(0))).reason,
            Some(PolicyRejection::ScaleBelowMin { replicas: 0, min: 1 })
        );
        assert_eq!(
            policy.evaluate(&scale("w5", json!(2.5))).reason,
            Some(PolicyRejection::InvalidReplicas)
        );
        assert_eq!(
            policy.evaluate(&scale("w6", json!("3"))).reason,
            Some(PolicyRejection::InvalidReplicas)
        );
    }

    #[test]
    fn test_approval_patterns_are_case_insensitive() {
        let policy = policy(SafetyConfig::default());
        let decision = policy.evaluate(&restart("Database_Migrations-runner", 0.9));
        assert_eq!(
            decision.reason,
            Some(PolicyRejection::ApprovalRequired {
                pattern: "database_migrations".to_string()
            })
        );
    }

    #[test]
    fn test_repeat_action_cools_down() {
        let policy = policy(SafetyConfig::default());
        assert!(policy.evaluate(&restart("api", 0.9)).allowed);

        let again = policy.evaluate(&restart("api", 0.9));
        assert!(matches!(again.reason, Some(PolicyRejection::CoolingDown { .. })));
        assert_eq!(policy.history().len(), 1);
    }

    #[test]
    fn test_disabled_mode_skips_guardrails() {
        let policy = policy(SafetyConfig {
            mode: SafetyMode::Disabled,
            max_actions_per_hour: 0,
            ..Default::default()
        });

        assert!(policy.evaluate(&scale("db", json!(50))).allowed);
        assert!(policy.evaluate(&restart("security_patches", 0.9)).allowed);
        assert!(!policy.evaluate(&restart("api", 0.5)).allowed);
        assert_eq!(policy.history().len(), 2);
    }

    #[test]
    fn test_safety_mode_parsing() {
        assert_eq!("STRICT".parse::<SafetyMode>().unwrap(), SafetyMode::Strict);
        assert_eq!(" disabled ".parse::<SafetyMode>().unwrap(), SafetyMode::Disabled);
        assert!("yolo".parse::<SafetyMode>().is_err());
    }
}
