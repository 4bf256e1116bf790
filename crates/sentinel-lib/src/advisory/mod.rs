//! Advisory layer
//!
//! Windows classified lines per container, asks the AI provider for a
//! diagnosis, validates it and gates the resulting advice through the
//! shared cooldown store.

pub mod context;
pub mod cooldown;
pub mod diagnosis;
pub mod gate;
pub mod provider;

pub use context::{AnalysisContext, ContextWindower, WindowConfig};
pub use cooldown::{adaptive_cooldown, CooldownDecision, CooldownEntry, CooldownStore};
pub use diagnosis::{
    build_prompt, parse_diagnosis, AiProvider, Diagnosis, DiagnosisReport, DiagnosisSeverity,
    ProviderError,
};
pub use gate::{
    Advice, AdviceSeverity, AdviceSource, AdviceVerdict, AdvisoryGate, IgnoreReason,
    DEFAULT_ADVICE_COOLDOWN, DEFAULT_CONFIDENCE_FLOOR,
};
pub use provider::{GeminiConfig, GeminiProvider, DEFAULT_GEMINI_ENDPOINT, DEFAULT_GEMINI_MODEL};
