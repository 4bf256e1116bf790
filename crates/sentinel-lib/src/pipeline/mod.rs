//! The observe, advise, act control loop
//!
//! [`ControlLoop`] receives every decoded line from the stream supervisor.
//! Each line is parsed, classified, published and windowed; a window that
//! triggers runs one analysis cycle through diagnosis, the advisory gate,
//! the planner, the safety policy and finally the executor.

use crate::action::{
    ActionExecutor, ActionPlanner, ActionPolicy, ActionProposal, ExecutedAction,
    ExecutionOutcome, PolicyDecision, SafetyConfig, DEFAULT_ACTION_TIMEOUT,
};
use crate::advisory::{
    parse_diagnosis, Advice, AdviceVerdict, AdvisoryGate, AiProvider, AnalysisContext,
    ContextWindower, CooldownDecision, CooldownStore, IgnoreReason, WindowConfig,
    DEFAULT_ADVICE_COOLDOWN, DEFAULT_CONFIDENCE_FLOOR,
};
use crate::bus::MessageBus;
use crate::classify::{parse_line, LogClassifier};
use crate::decision::{DecisionRecord, DecisionSource};
use crate::models::{ClassifiedLine, RawLine};
use crate::observability::{SentinelMetrics, StructuredLogger};
use crate::runtime::LineHandler;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[cfg(test)]
mod tests;

/// Default bound on one AI diagnosis call (30 seconds)
pub const DEFAULT_AI_TIMEOUT: Duration = Duration::from_secs(30);

/// Decision records kept for inspection
const RECENT_DECISIONS: usize = 100;

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub window: WindowConfig,
    pub safety: SafetyConfig,
    pub confidence_floor: f64,
    pub advice_cooldown: Duration,
    pub ai_timeout: Duration,
    pub action_timeout: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            safety: SafetyConfig::default(),
            confidence_floor: DEFAULT_CONFIDENCE_FLOOR,
            advice_cooldown: DEFAULT_ADVICE_COOLDOWN,
            ai_timeout: DEFAULT_AI_TIMEOUT,
            action_timeout: DEFAULT_ACTION_TIMEOUT,
        }
    }
}

/// Terminal state of one analysis cycle
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    /// The provider failed or timed out
    DiagnosisFailed { reason: String },
    /// The diagnosis did not become advice
    AdviceIgnored(IgnoreReason),
    /// Equivalent advice fired recently
    AdviceSuppressed { advice: Advice, remaining: Duration },
    /// Advice was planned, judged by the policy and handed to the executor
    /// when allowed; a rejection is reported as a skipped action
    Handled {
        advice: Advice,
        decision: PolicyDecision,
        action: ExecutedAction,
    },
}

impl CycleOutcome {
    pub fn action(&self) -> Option<&ExecutedAction> {
        match self {
            CycleOutcome::Handled { action, .. } => Some(action),
            _ => None,
        }
    }

    pub fn advice(&self) -> Option<&Advice> {
        match self {
            CycleOutcome::AdviceSuppressed { advice, .. } | CycleOutcome::Handled { advice, .. } => {
                Some(advice)
            }
            _ => None,
        }
    }
}

pub struct ControlLoop {
    classifier: LogClassifier,
    windower: ContextWindower,
    provider: Arc<dyn AiProvider>,
    gate: AdvisoryGate,
    planner: ActionPlanner,
    policy: ActionPolicy,
    executor: ActionExecutor,
    bus: Option<Arc<dyn MessageBus>>,
    ai_timeout: Duration,
    metrics: SentinelMetrics,
    logger: StructuredLogger,
    journal: DecisionJournal,
}

/// Bounded in-memory log of decision records, shared with action tasks
#[derive(Clone)]
struct DecisionJournal {
    logger: StructuredLogger,
    records: Arc<Mutex<VecDeque<DecisionRecord>>>,
}

impl DecisionJournal {
    fn new(logger: StructuredLogger) -> Self {
        Self {
            logger,
            records: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    fn record(&self, record: DecisionRecord) {
        self.logger.log_decision(&record);
        let mut records = self.records.lock();
        if records.len() >= RECENT_DECISIONS {
            records.pop_front();
        }
        records.push_back(record);
    }

    fn recent(&self) -> Vec<DecisionRecord> {
        self.records.lock().iter().cloned().collect()
    }
}

impl ControlLoop {
    /// The cooldown store is shared between advice and action cooldowns
    pub fn new(
        provider: Arc<dyn AiProvider>,
        executor: ActionExecutor,
        cooldowns: Arc<CooldownStore>,
        config: LoopConfig,
    ) -> Self {
        let gate = AdvisoryGate::new(Arc::clone(&cooldowns))
            .with_base_cooldown(config.advice_cooldown)
            .with_confidence_floor(config.confidence_floor);

        Self {
            classifier: LogClassifier::new(),
            windower: ContextWindower::new(config.window),
            provider,
            gate,
            planner: ActionPlanner::new(),
            policy: ActionPolicy::new(config.safety, cooldowns),
            executor: executor.with_timeout(config.action_timeout),
            bus: None,
            ai_timeout: config.ai_timeout,
            metrics: SentinelMetrics::new(),
            logger: StructuredLogger::new("sentinel"),
            journal: DecisionJournal::new(StructuredLogger::new("sentinel")),
        }
    }

    pub fn with_bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.journal.logger = logger.clone();
        self.logger = logger;
        self
    }

    /// Publish and window a classified line, analyzing if the window triggers
    pub async fn ingest(&self, line: ClassifiedLine) -> Option<CycleOutcome> {
        self.metrics.inc_lines_classified(line.severity);

        if let Some(bus) = &self.bus {
            if let Err(e) = bus.publish(&line).await {
                self.metrics.inc_publish_failures();
                warn!(
                    container_id = %line.container_id(),
                    error = %e,
                    "Failed to publish classified line"
                );
            }
        }

        let context = self.windower.push(line)?;
        Some(self.analyze(context).await)
    }

    /// Run one analysis cycle over a window
    pub async fn analyze(&self, context: AnalysisContext) -> CycleOutcome {
        let started = Instant::now();
        let response =
            tokio::time::timeout(self.ai_timeout, self.provider.diagnose(&context)).await;
        let elapsed = started.elapsed().as_secs_f64();

        let raw = match response {
            Ok(Ok(raw)) => {
                self.metrics.observe_diagnosis(elapsed, "ok");
                raw
            }
            Ok(Err(e)) => {
                self.metrics.observe_diagnosis(elapsed, "error");
                warn!(
                    provider = self.provider.name(),
                    container = %context.container_name,
                    error = %e,
                    "Diagnosis failed"
                );
                return self.diagnosis_failed(&context, e.to_string());
            }
            Err(_) => {
                self.metrics.observe_diagnosis(elapsed, "timeout");
                warn!(
                    provider = self.provider.name(),
                    container = %context.container_name,
                    timeout_ms = self.ai_timeout.as_millis() as u64,
                    "Diagnosis timed out"
                );
                let reason = format!("Diagnosis timed out after {}ms", self.ai_timeout.as_millis());
                return self.diagnosis_failed(&context, reason);
            }
        };

        let diagnosis = parse_diagnosis(&raw);

        let advice = match self.gate.evaluate(&diagnosis, &context.lines) {
            AdviceVerdict::Accepted(advice) => advice,
            AdviceVerdict::Ignored(reason) => {
                self.metrics.inc_advice("ignored");
                self.record(
                    signals(DecisionRecord::new("advice_ignored", DecisionSource::Ai), &context)
                        .confidence(diagnosis.confidence())
                        .reason(reason.to_string()),
                );
                return CycleOutcome::AdviceIgnored(reason);
            }
        };

        if let CooldownDecision::Blocked { remaining } = self.gate.admit(&advice) {
            self.metrics.inc_advice("suppressed");
            self.record(
                signals(DecisionRecord::new("advice_suppressed", DecisionSource::Rule), &context)
                    .confidence(advice.confidence)
                    .signal("remaining_ms", remaining.as_millis() as u64)
                    .reason(format!("Equivalent advice issued recently: {}", advice.title)),
            );
            return CycleOutcome::AdviceSuppressed { advice, remaining };
        }

        self.metrics.inc_advice("emitted");
        self.logger.log_advice(&advice);

        let proposal = self.planner.plan(&advice);
        let decision = self.policy.evaluate(&proposal);

        let action = match &decision.reason {
            Some(rejection) => {
                self.metrics.inc_policy_rejection(rejection.label());
                info!(
                    action = %proposal.action,
                    target = %proposal.target,
                    reason = %rejection,
                    "Action skipped by policy"
                );
                self.record(
                    signals(DecisionRecord::new("policy_rejected", DecisionSource::Rule), &context)
                        .confidence(proposal.confidence)
                        .signal("action", proposal.action.as_str())
                        .reason(proposal.reason.clone())
                        .reason(rejection.to_string()),
                );
                let action = ExecutedAction::skipped(proposal, rejection.to_string());
                self.metrics
                    .inc_action(action.proposal.action.as_str(), &action.outcome.to_string());
                action
            }
            None => self.execute_detached(proposal, &context).await,
        };

        CycleOutcome::Handled {
            advice,
            decision,
            action,
        }
    }

    /// Run an allowed proposal on its own task
    ///
    /// Restarting a container aborts its stream task, which may be the task
    /// running this cycle. The spawned task still completes the action and
    /// records its outcome.
    async fn execute_detached(
        &self,
        proposal: ActionProposal,
        context: &AnalysisContext,
    ) -> ExecutedAction {
        let fallback = proposal.clone();
        let executor = self.executor.clone();
        let journal = self.journal.clone();
        let metrics = self.metrics.clone();
        let context = context.clone();

        let task = tokio::spawn(async move {
            let action = executor.execute(proposal).await;
            journal.logger.log_action(&action);
            metrics.inc_action(action.proposal.action.as_str(), &action.outcome.to_string());

            let kind = match action.outcome {
                ExecutionOutcome::Executed => "action_executed",
                ExecutionOutcome::Skipped => "action_skipped",
                ExecutionOutcome::Failed => "action_failed",
            };
            let mut record = signals(DecisionRecord::new(kind, DecisionSource::Rule), &context)
                .confidence(action.proposal.confidence)
                .signal("action", action.proposal.action.as_str())
                .reason(action.proposal.reason.clone());
            if let Some(reason) = &action.skipped_reason {
                record = record.reason(reason.clone());
            }
            journal.record(record);
            action
        });

        match task.await {
            Ok(action) => action,
            Err(e) => {
                warn!(
                    action = %fallback.action,
                    target = %fallback.target,
                    error = %e,
                    "Action task did not complete"
                );
                ExecutedAction::failed(fallback, format!("Action task failed: {}", e))
            }
        }
    }

    /// Most recent decision records, oldest first
    pub fn recent_decisions(&self) -> Vec<DecisionRecord> {
        self.journal.recent()
    }

    pub fn windower(&self) -> &ContextWindower {
        &self.windower
    }

    pub fn policy(&self) -> &ActionPolicy {
        &self.policy
    }

    fn diagnosis_failed(&self, context: &AnalysisContext, reason: String) -> CycleOutcome {
        self.record(
            signals(DecisionRecord::new("diagnosis_failed", DecisionSource::System), context)
                .reason(reason.clone()),
        );
        CycleOutcome::DiagnosisFailed { reason }
    }

    fn record(&self, record: DecisionRecord) {
        self.journal.record(record);
    }
}

/// Attach the window's identifying signals to a record
fn signals(record: DecisionRecord, context: &AnalysisContext) -> DecisionRecord {
    let record = record
        .signal("container", context.container_name.as_str())
        .signal("container_id", context.container_id.as_str())
        .signal("lines", context.lines.len() as u64);
    match context.peak_severity() {
        Some(severity) => record.signal("peak_severity", severity.as_str()),
        None => record,
    }
}

#[async_trait]
impl LineHandler for ControlLoop {
    async fn on_line(&self, line: RawLine) {
        let classified = self.classifier.classify(parse_line(line));
        if let Some(outcome) = self.ingest(classified).await {
            debug!(outcome = outcome_label(&outcome), "Analysis cycle complete");
        }
    }

    async fn on_stream_end(&self, container_id: &str) {
        self.windower.evict(container_id);
    }
}

fn outcome_label(outcome: &CycleOutcome) -> &'static str {
    match outcome {
        CycleOutcome::DiagnosisFailed { .. } => "diagnosis_failed",
        CycleOutcome::AdviceIgnored(_) => "advice_ignored",
        CycleOutcome::AdviceSuppressed { .. } => "advice_suppressed",
        CycleOutcome::Handled { action, .. } => match action.outcome {
            ExecutionOutcome::Executed => "executed",
            ExecutionOutcome::Skipped => "skipped",
            ExecutionOutcome::Failed => "failed",
        },
    }
}
