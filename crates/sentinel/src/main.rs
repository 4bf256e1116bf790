//! Sentinel - container log watchdog
//!
//! Streams logs from every container on the host, asks an AI provider to
//! diagnose suspicious windows and applies safe remediation actions.

use sentinel_lib::{
    action::{ActionExecutor, SafetyMode},
    advisory::{CooldownStore, GeminiProvider},
    bus::ChannelBus,
    health::{components, HealthMonitor, HealthRegistry},
    observability::{SentinelMetrics, StructuredLogger},
    pipeline::ControlLoop,
    runtime::{DockerRuntime, StreamSupervisor},
};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const SENTINEL_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting sentinel");

    let config = config::SentinelConfig::load()?;
    let loop_config = config.control_loop()?;
    info!(
        host_name = %config.host_name,
        docker_endpoint = %config.docker_endpoint,
        "Sentinel configured"
    );

    let health_registry = HealthRegistry::new();
    for name in components::ALL {
        health_registry.register(name).await;
    }

    let metrics = SentinelMetrics::new();
    let logger = StructuredLogger::new(&config.host_name);

    let runtime = Arc::new(
        DockerRuntime::new(config.docker()).context("failed to create Docker client")?,
    );
    let provider =
        Arc::new(GeminiProvider::new(config.gemini()).context("failed to create AI client")?);
    let ai_configured = provider.is_configured();
    if !ai_configured {
        warn!("No AI API key configured, diagnoses will fail until one is set");
    }

    let (bus, mut bus_rx) = ChannelBus::new(config.bus_capacity.max(1));
    let bus = Arc::new(bus);
    let bus_consumer = tokio::spawn(async move {
        while let Some(message) = bus_rx.recv().await {
            debug!(
                message_id = %message.id,
                severity = %message.line.severity,
                container = %message.line.container_name(),
                "Classified line published"
            );
        }
    });

    let safety_mode = loop_config.safety.mode;
    if safety_mode == SafetyMode::Disabled {
        logger.log_degraded_safety(&safety_mode.to_string());
    }

    let control = Arc::new(
        ControlLoop::new(
            provider,
            ActionExecutor::new(runtime.clone()),
            Arc::new(CooldownStore::new()),
            loop_config,
        )
        .with_bus(bus.clone())
        .with_logger(logger.clone()),
    );

    let supervisor = Arc::new(
        StreamSupervisor::new(
            runtime.clone(),
            control,
            config.filter(),
            config.supervisor(),
        )
        .with_metrics(metrics.clone()),
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let supervisor_handle = tokio::spawn(supervisor.clone().run(shutdown_tx.subscribe()));

    let monitor = HealthMonitor::new(health_registry.clone(), runtime.clone(), bus, ai_configured)
        .with_supervisor(supervisor.clone())
        .with_interval(Duration::from_secs(config.health_interval_secs.max(1)));
    monitor.check_once().await;
    let monitor_handle = tokio::spawn(monitor.run(shutdown_tx.subscribe()));

    let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics));
    let api_port = config.api_port;
    let api_rx = shutdown_tx.subscribe();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api::serve(api_port, app_state, api_rx).await {
            error!(error = %e, "API server failed");
        }
    });

    logger.log_startup(SENTINEL_VERSION, runtime.endpoint(), &safety_mode.to_string());
    health_registry.set_ready(true).await;

    tokio::signal::ctrl_c().await?;
    health_registry.set_ready(false).await;
    logger.log_shutdown("SIGINT received", supervisor.active_count());

    let _ = shutdown_tx.send(());
    for (name, handle) in [
        ("supervisor", supervisor_handle),
        ("health_monitor", monitor_handle),
        ("api", api_handle),
    ] {
        if let Err(e) = handle.await {
            warn!(task = name, error = %e, "Task ended abnormally");
        }
    }
    bus_consumer.abort();

    info!("Shutdown complete");
    Ok(())
}
