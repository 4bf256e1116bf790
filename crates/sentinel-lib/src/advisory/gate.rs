//! Advisory gate: diagnosis to advice, then advice admission

use super::cooldown::{CooldownDecision, CooldownStore};
use super::diagnosis::{Diagnosis, DiagnosisSeverity};
use crate::models::ClassifiedLine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Diagnoses below this confidence never become advice
pub const DEFAULT_CONFIDENCE_FLOOR: f64 = 0.6;

/// Base cooldown for repeated advice on the same subject (60 seconds)
pub const DEFAULT_ADVICE_COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdviceSeverity {
    Info,
    Warning,
    Critical,
}

impl From<DiagnosisSeverity> for AdviceSeverity {
    fn from(severity: DiagnosisSeverity) -> Self {
        match severity {
            DiagnosisSeverity::High => AdviceSeverity::Critical,
            DiagnosisSeverity::Medium => AdviceSeverity::Warning,
            DiagnosisSeverity::Low => AdviceSeverity::Info,
        }
    }
}

impl std::fmt::Display for AdviceSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdviceSeverity::Info => write!(f, "info"),
            AdviceSeverity::Warning => write!(f, "warning"),
            AdviceSeverity::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdviceSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
}

/// Human-readable advisory derived from a diagnosis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Advice {
    pub id: String,
    pub title: String,
    pub explanation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
    pub severity: AdviceSeverity,
    pub confidence: f64,
    pub source: AdviceSource,
    pub timestamp: DateTime<Utc>,
}

impl Advice {
    /// Cooldown subject for this advice
    pub fn cooldown_key(&self) -> String {
        let subject = self
            .source
            .container_id
            .as_deref()
            .or(self.source.container_name.as_deref())
            .unwrap_or("unknown");
        format!("advice:{}:{}", subject, self.title)
    }
}

/// Why a diagnosis did not become advice
#[derive(Debug, Clone, PartialEq)]
pub enum IgnoreReason {
    Unparseable(String),
    FlaggedIgnore,
    LowConfidence { confidence: f64, floor: f64 },
}

impl std::fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IgnoreReason::Unparseable(reason) => write!(f, "Unparseable diagnosis: {}", reason),
            IgnoreReason::FlaggedIgnore => write!(f, "Diagnosis marked as ignorable"),
            IgnoreReason::LowConfidence { confidence, floor } => {
                write!(f, "Confidence {:.2} below floor {:.2}", confidence, floor)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdviceVerdict {
    Accepted(Advice),
    Ignored(IgnoreReason),
}

/// Converts diagnoses into advice and rate-limits repeated advice
pub struct AdvisoryGate {
    confidence_floor: f64,
    base_cooldown: Duration,
    cooldowns: Arc<CooldownStore>,
}

impl AdvisoryGate {
    pub fn new(cooldowns: Arc<CooldownStore>) -> Self {
        Self {
            confidence_floor: DEFAULT_CONFIDENCE_FLOOR,
            base_cooldown: DEFAULT_ADVICE_COOLDOWN,
            cooldowns,
        }
    }

    pub fn with_base_cooldown(mut self, base: Duration) -> Self {
        self.base_cooldown = base;
        self
    }

    pub fn with_confidence_floor(mut self, floor: f64) -> Self {
        self.confidence_floor = floor;
        self
    }

    /// Turn a diagnosis over a window into advice, or say why not
    pub fn evaluate(&self, diagnosis: &Diagnosis, lines: &[ClassifiedLine]) -> AdviceVerdict {
        let report = match diagnosis {
            Diagnosis::Valid(report) => report,
            Diagnosis::Unparseable { reason } => {
                return AdviceVerdict::Ignored(IgnoreReason::Unparseable(reason.clone()))
            }
        };

        if report.should_ignore {
            debug!("Ignoring diagnosis flagged as ignorable");
            return AdviceVerdict::Ignored(IgnoreReason::FlaggedIgnore);
        }

        if report.confidence < self.confidence_floor {
            debug!(confidence = report.confidence, "Ignoring low-confidence diagnosis");
            return AdviceVerdict::Ignored(IgnoreReason::LowConfidence {
                confidence: report.confidence,
                floor: self.confidence_floor,
            });
        }

        let title = match report.severity {
            DiagnosisSeverity::High => "Critical issue detected",
            DiagnosisSeverity::Medium => "Potential issue detected",
            DiagnosisSeverity::Low => "Informational insight",
        };

        let primary = lines.first();

        AdviceVerdict::Accepted(Advice {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            explanation: report.summary.clone(),
            recommendation: report.recommendation.clone(),
            severity: report.severity.into(),
            confidence: report.confidence,
            source: AdviceSource {
                container_name: primary.map(|l| l.container_name().to_string()),
                container_id: primary.map(|l| l.container_id().to_string()),
            },
            timestamp: Utc::now(),
        })
    }

    /// Handling-time cooldown check; records the advice when allowed
    pub fn admit(&self, advice: &Advice) -> CooldownDecision {
        self.cooldowns
            .is_allowed(&advice.cooldown_key(), advice.confidence, self.base_cooldown)
    }
}
