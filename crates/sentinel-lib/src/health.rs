//! Health tracking for the sentinel
//!
//! The registry holds per-component status for the `/healthz` and
//! `/readyz` endpoints; [`HealthMonitor`] refreshes it periodically by
//! probing the runtime, the message bus and the AI provider setup.

use crate::bus::MessageBus;
use crate::runtime::{ContainerRuntime, StreamSupervisor};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Default interval between health probes
pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Working with reduced capability
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn with_status(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::with_status(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across all components
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|h| h.status)
            .fold(ComponentStatus::Healthy, |worst, status| match (worst, status) {
                (ComponentStatus::Unhealthy, _) | (_, ComponentStatus::Unhealthy) => {
                    ComponentStatus::Unhealthy
                }
                (ComponentStatus::Degraded, _) | (_, ComponentStatus::Degraded) => {
                    ComponentStatus::Degraded
                }
                _ => ComponentStatus::Healthy,
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const RUNTIME: &str = "runtime";
    pub const SUPERVISOR: &str = "supervisor";
    pub const AI_PROVIDER: &str = "ai_provider";
    pub const MESSAGE_BUS: &str = "message_bus";

    pub const ALL: &[&str] = &[RUNTIME, SUPERVISOR, AI_PROVIDER, MESSAGE_BUS];
}

#[derive(Debug, Clone)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            components: Arc::new(RwLock::new(HashMap::new())),
            ready: Arc::new(RwLock::new(false)),
        }
    }

    /// Register a component as healthy
    pub async fn register(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        self.components
            .write()
            .await
            .insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn status_of(&self, name: &str) -> Option<ComponentStatus> {
        self.components.read().await.get(name).map(|h| h.status)
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let ready = *self.ready.read().await;
        let health = self.health().await;

        let reason = if !ready {
            Some("Sentinel not yet initialized".to_string())
        } else if health.status == ComponentStatus::Unhealthy {
            let failing: Vec<_> = health
                .components
                .iter()
                .filter(|(_, h)| h.status == ComponentStatus::Unhealthy)
                .map(|(name, _)| name.as_str())
                .collect();
            Some(format!("Unhealthy components: {}", failing.join(", ")))
        } else {
            None
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason,
        }
    }
}

/// Periodically probes collaborators and updates the registry
pub struct HealthMonitor {
    registry: HealthRegistry,
    runtime: Arc<dyn ContainerRuntime>,
    bus: Arc<dyn MessageBus>,
    supervisor: Option<Arc<StreamSupervisor>>,
    ai_configured: bool,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(
        registry: HealthRegistry,
        runtime: Arc<dyn ContainerRuntime>,
        bus: Arc<dyn MessageBus>,
        ai_configured: bool,
    ) -> Self {
        Self {
            registry,
            runtime,
            bus,
            supervisor: None,
            ai_configured,
            interval: DEFAULT_HEALTH_INTERVAL,
        }
    }

    pub fn with_supervisor(mut self, supervisor: Arc<StreamSupervisor>) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Probe every component once
    pub async fn check_once(&self) {
        let runtime_ok = match self.runtime.ping().await {
            Ok(()) => {
                self.registry.set_healthy(components::RUNTIME).await;
                true
            }
            Err(e) => {
                warn!(error = %e, "Container runtime health check failed");
                self.registry
                    .set_unhealthy(components::RUNTIME, e.to_string())
                    .await;
                false
            }
        };

        match &self.supervisor {
            Some(_) if !runtime_ok => {
                self.registry
                    .set_degraded(components::SUPERVISOR, "Runtime unreachable, streams may be stale")
                    .await;
            }
            Some(supervisor) => {
                debug!(active_streams = supervisor.active_count(), "Supervisor healthy");
                self.registry.set_healthy(components::SUPERVISOR).await;
            }
            None => {
                self.registry
                    .set_degraded(components::SUPERVISOR, "Supervisor not running")
                    .await;
            }
        }

        if self.ai_configured {
            self.registry.set_healthy(components::AI_PROVIDER).await;
        } else {
            self.registry
                .set_degraded(components::AI_PROVIDER, "AI provider not configured")
                .await;
        }

        match self.bus.health_check().await {
            Ok(()) => self.registry.set_healthy(components::MESSAGE_BUS).await,
            Err(e) => {
                warn!(error = %e, "Message bus health check failed");
                self.registry
                    .set_degraded(components::MESSAGE_BUS, e.to_string())
                    .await;
            }
        }
    }

    /// Probe on an interval until shutdown
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(interval_secs = self.interval.as_secs(), "Starting health monitor");
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.check_once().await,
                _ = shutdown.recv() => {
                    debug!("Health monitor stopped");
                    break;
                }
            }
        }
    }
}
