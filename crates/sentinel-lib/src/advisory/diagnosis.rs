//! AI diagnosis contract
//!
//! The provider returns free text that should contain a JSON object. It is
//! validated here into [`Diagnosis`]; anything that does not fit becomes
//! [`Diagnosis::Unparseable`] and is ignored downstream.

use super::context::AnalysisContext;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use thiserror::Error;

/// Errors raised by an AI provider
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("AI provider is not configured: {0}")]
    NotConfigured(String),

    #[error("AI provider request failed: {0}")]
    Request(String),

    #[error("AI provider returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("AI provider returned an empty response")]
    EmptyResponse,

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Text-completion provider used for diagnosis
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Return the raw completion text for a context
    async fn diagnose(&self, context: &AnalysisContext) -> Result<String, ProviderError>;

    /// Provider name for logs and health
    fn name(&self) -> &str {
        "ai"
    }
}

/// Severity reported by the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosisSeverity {
    Low,
    Medium,
    High,
}

impl DiagnosisSeverity {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "high" => DiagnosisSeverity::High,
            "medium" => DiagnosisSeverity::Medium,
            _ => DiagnosisSeverity::Low,
        }
    }
}

/// A well-formed diagnosis
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosisReport {
    pub summary: String,
    pub severity: DiagnosisSeverity,
    /// Clamped to `[0, 1]`
    pub confidence: f64,
    pub suspected_cause: Option<String>,
    pub recommendation: Option<String>,
    pub should_ignore: bool,
}

/// Validated provider output
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnosis {
    Valid(DiagnosisReport),
    Unparseable { reason: String },
}

impl Diagnosis {
    pub fn report(&self) -> Option<&DiagnosisReport> {
        match self {
            Diagnosis::Valid(report) => Some(report),
            Diagnosis::Unparseable { .. } => None,
        }
    }

    pub fn confidence(&self) -> f64 {
        self.report().map(|r| r.confidence).unwrap_or(0.0)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDiagnosis {
    summary: String,
    #[serde(default)]
    severity: Option<String>,
    confidence: f64,
    #[serde(default)]
    suspected_cause: Option<String>,
    #[serde(default)]
    recommendation: Option<String>,
    #[serde(default)]
    should_ignore: bool,
}

/// Validate raw provider text into a [`Diagnosis`]
pub fn parse_diagnosis(raw: &str) -> Diagnosis {
    let body = strip_code_fences(raw);
    if body.is_empty() {
        return Diagnosis::Unparseable {
            reason: "empty response".to_string(),
        };
    }

    match serde_json::from_str::<RawDiagnosis>(body) {
        Ok(parsed) => {
            let confidence = if parsed.confidence.is_nan() {
                0.0
            } else {
                parsed.confidence.clamp(0.0, 1.0)
            };

            Diagnosis::Valid(DiagnosisReport {
                summary: parsed.summary,
                severity: DiagnosisSeverity::parse(parsed.severity.as_deref().unwrap_or("low")),
                confidence,
                suspected_cause: parsed.suspected_cause.filter(|s| !s.trim().is_empty()),
                recommendation: parsed.recommendation.filter(|s| !s.trim().is_empty()),
                should_ignore: parsed.should_ignore,
            })
        }
        Err(e) => Diagnosis::Unparseable {
            reason: e.to_string(),
        },
    }
}

fn strip_code_fences(raw: &str) -> &str {
    let mut body = raw.trim();

    if let Some(rest) = body.strip_prefix("```") {
        // Drop an optional language tag such as ```json
        body = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    }
    if let Some(rest) = body.strip_suffix("```") {
        body = rest;
    }

    body.trim()
}

/// Render the diagnosis prompt for a context
pub fn build_prompt(context: &AnalysisContext) -> String {
    let mut prompt = String::from(
        "You are an observability assistant.\n\n\
         You analyze container logs and explain what is happening.\n\
         You MUST NOT suggest actions like restarting containers or scaling.\n\
         You ONLY observe and explain.\n\n",
    );

    let _ = writeln!(prompt, "Container: {}", context.container_name);
    let _ = writeln!(
        prompt,
        "Time window: {} -> {}\n",
        context.window_start.to_rfc3339(),
        context.window_end.to_rfc3339()
    );
    prompt.push_str("Logs:\n");
    for line in &context.lines {
        let _ = writeln!(prompt, "[{}] {}", line.severity, line.message());
    }

    prompt.push_str(
        "\nRespond in JSON with:\n\
         {\n  \"summary\": string,\n  \"severity\": \"low\" | \"medium\" | \"high\",\n  \
         \"confidence\": number (0 to 1),\n  \"suspectedCause\": string | null,\n  \
         \"recommendation\": string | null,\n  \"shouldIgnore\": boolean\n}\n",
    );

    prompt
}
