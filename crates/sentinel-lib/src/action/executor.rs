//! Action execution against the container runtime
//!
//! Every outcome resolves to an [`ExecutedAction`]; runtime errors and
//! timeouts never escape this module.

use super::{ActionKind, ActionProposal, ExecutedAction};
use crate::runtime::{ContainerRuntime, Orchestrator, RuntimeError, RuntimeResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Default bound on a single action (30 seconds)
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct ActionExecutor {
    runtime: Arc<dyn ContainerRuntime>,
    orchestrator: Option<Arc<dyn Orchestrator>>,
    timeout: Duration,
}

impl ActionExecutor {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            orchestrator: None,
            timeout: DEFAULT_ACTION_TIMEOUT,
        }
    }

    pub fn with_orchestrator(mut self, orchestrator: Arc<dyn Orchestrator>) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn has_orchestrator(&self) -> bool {
        self.orchestrator.is_some()
    }

    /// Execute an authorized proposal
    pub async fn execute(&self, proposal: ActionProposal) -> ExecutedAction {
        match proposal.action {
            ActionKind::Noop => return ExecutedAction::skipped(proposal, "No-op action"),
            ActionKind::ThrottleLogs | ActionKind::MarkDegraded => {
                let reason = format!("Unsupported action: {}", proposal.action);
                return ExecutedAction::skipped(proposal, reason);
            }
            ActionKind::RestartContainer | ActionKind::ScaleContainer => {}
        }

        let result = tokio::time::timeout(self.timeout, self.apply(&proposal)).await;

        match result {
            Ok(Ok(())) => {
                info!(
                    action = %proposal.action,
                    target = %proposal.target,
                    "Action executed"
                );
                ExecutedAction::executed(proposal)
            }
            Ok(Err(e)) => {
                warn!(
                    action = %proposal.action,
                    target = %proposal.target,
                    error = %e,
                    "Action failed"
                );
                ExecutedAction::failed(proposal, e.to_string())
            }
            Err(_) => {
                warn!(
                    action = %proposal.action,
                    target = %proposal.target,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Action timed out"
                );
                let reason = format!("Action timed out after {}ms", self.timeout.as_millis());
                ExecutedAction::failed(proposal, reason)
            }
        }
    }

    async fn apply(&self, proposal: &ActionProposal) -> RuntimeResult<()> {
        match proposal.action {
            ActionKind::RestartContainer => {
                let containers = self.runtime.list_containers(false).await?;
                let container = containers
                    .iter()
                    .find(|c| c.name == proposal.target)
                    .ok_or_else(|| RuntimeError::NotFound(proposal.target.clone()))?;
                self.runtime.restart(&container.id).await
            }
            ActionKind::ScaleContainer => {
                let orchestrator = self.orchestrator.as_ref().ok_or_else(|| {
                    RuntimeError::Unavailable("Scaling requires an orchestrator".to_string())
                })?;
                let replicas = proposal
                    .replicas()
                    .and_then(|v| v.as_f64())
                    .filter(|r| r.is_finite() && *r >= 0.0 && r.fract() == 0.0)
                    .map(|r| r as u32)
                    .ok_or_else(|| RuntimeError::Decode("invalid replica count".to_string()))?;
                orchestrator.scale(&proposal.target, replicas).await
            }
            _ => Ok(()),
        }
    }
}
