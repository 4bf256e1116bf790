//! Keyword-driven action planning
//!
//! Only a small, auditable keyword surface can produce a state-changing
//! proposal. Everything unmatched becomes a noop.

use super::{ActionKind, ActionProposal};
use crate::advisory::Advice;

/// Replica count proposed by the `scale` rule
pub const DEFAULT_SCALE_REPLICAS: u32 = 2;

/// Confidence below which advice never produces an action
const MIN_PLANNING_CONFIDENCE: f64 = 0.6;

/// Explanation keyword mapped onto an action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordRule {
    pub keyword: &'static str,
    pub action: ActionKind,
}

const DEFAULT_RULES: &[KeywordRule] = &[
    KeywordRule {
        keyword: "memory",
        action: ActionKind::RestartContainer,
    },
    KeywordRule {
        keyword: "scale",
        action: ActionKind::ScaleContainer,
    },
];

#[derive(Debug, Clone)]
pub struct ActionPlanner {
    rules: &'static [KeywordRule],
    scale_replicas: u32,
}

impl Default for ActionPlanner {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionPlanner {
    pub fn new() -> Self {
        Self {
            rules: DEFAULT_RULES,
            scale_replicas: DEFAULT_SCALE_REPLICAS,
        }
    }

    pub fn rules(&self) -> &[KeywordRule] {
        self.rules
    }

    pub fn plan(&self, advice: &Advice) -> ActionProposal {
        let Some(target) = advice
            .source
            .container_name
            .as_deref()
            .filter(|name| !name.is_empty())
        else {
            return ActionProposal::noop("unknown", "Missing container target", advice.confidence);
        };

        if advice.confidence < MIN_PLANNING_CONFIDENCE {
            return ActionProposal::noop(target, "Low confidence advice", advice.confidence);
        }

        let explanation = advice.explanation.to_lowercase();
        let Some(rule) = self
            .rules
            .iter()
            .find(|rule| explanation.contains(rule.keyword))
        else {
            return ActionProposal::noop(target, "No actionable recommendation", advice.confidence);
        };

        let params = (rule.action == ActionKind::ScaleContainer).then(|| {
            let mut params = serde_json::Map::new();
            params.insert("replicas".to_string(), serde_json::json!(self.scale_replicas));
            params
        });

        ActionProposal {
            action: rule.action,
            target: target.to_string(),
            reason: advice.explanation.clone(),
            confidence: advice.confidence,
            params,
        }
    }
}
