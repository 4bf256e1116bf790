//! Explainable decision records
//!
//! Every terminal step of an analysis cycle produces one record naming
//! what was decided and why.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionSource {
    Rule,
    Ai,
    System,
}

impl std::fmt::Display for DecisionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecisionSource::Rule => write!(f, "rule"),
            DecisionSource::Ai => write!(f, "ai"),
            DecisionSource::System => write!(f, "system"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplainWhy {
    pub reasons: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub signals: BTreeMap<String, serde_json::Value>,
    pub source: DecisionSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRecord {
    pub decision_id: String,
    pub action: String,
    pub explain_why: ExplainWhy,
    pub timestamp: DateTime<Utc>,
}

impl DecisionRecord {
    pub fn new(action: impl Into<String>, source: DecisionSource) -> Self {
        Self {
            decision_id: Uuid::new_v4().to_string(),
            action: action.into(),
            explain_why: ExplainWhy {
                reasons: Vec::new(),
                confidence: None,
                signals: BTreeMap::new(),
                source,
            },
            timestamp: Utc::now(),
        }
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.explain_why.reasons.push(reason.into());
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.explain_why.confidence = Some(confidence);
        self
    }

    pub fn signal(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.explain_why.signals.insert(key.into(), value.into());
        self
    }

    /// Reasons rendered as a bullet list
    pub fn summary(&self) -> String {
        self.explain_why
            .reasons
            .iter()
            .map(|r| format!("- {}", r))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_builder() {
        let record = DecisionRecord::new("policy_rejected", DecisionSource::Rule)
            .reason("No-op action")
            .reason("second")
            .confidence(0.9)
            .signal("container", "api")
            .signal("lines", 3);

        assert_eq!(record.action, "policy_rejected");
        assert_eq!(record.explain_why.confidence, Some(0.9));
        assert_eq!(record.explain_why.signals["lines"], serde_json::json!(3));
        assert_eq!(record.summary(), "- No-op action\n- second");

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["explainWhy"]["source"], "rule");
        assert!(json["decisionId"].is_string());
    }
}
