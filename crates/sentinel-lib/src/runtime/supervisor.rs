//! Log stream supervision
//!
//! Discovers containers through periodic scans and lifecycle events and
//! keeps exactly one log stream open per monitored container. Both
//! triggers converge on [`StreamSupervisor::ensure_streaming`], which is
//! idempotent, so the order in which they fire does not matter.

use super::{ContainerFilter, ContainerRuntime, FrameDecoder, RuntimeResult};
use crate::models::{ContainerDescriptor, LifecycleEvent, RawLine};
use crate::observability::SentinelMetrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Default discovery poll interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Name of our own container, never streamed to avoid feedback loops
pub const DEFAULT_SELF_NAME: &str = "sentinel";

/// Receives decoded lines from container streams
///
/// Lines of one container are delivered sequentially from that
/// container's task, so their order is preserved.
#[async_trait]
pub trait LineHandler: Send + Sync {
    async fn on_line(&self, line: RawLine);

    /// Called once a container's stream has been released
    async fn on_stream_end(&self, _container_id: &str) {}
}

/// Configuration for the stream supervisor
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Interval between discovery scans (default: 10 seconds)
    pub poll_interval: Duration,
    /// Container name to exclude from streaming
    pub self_name: String,
    /// Delay before re-opening a failed lifecycle event watch
    pub event_retry_delay: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            self_name: DEFAULT_SELF_NAME.to_string(),
            event_retry_delay: Duration::from_secs(5),
        }
    }
}

/// Ownership record of an open container log stream
pub struct StreamHandle {
    pub container_name: String,
    pub started_at: DateTime<Utc>,
    generation: u64,
    task: JoinHandle<()>,
}

/// Owns every container log stream on the host
pub struct StreamSupervisor {
    runtime: Arc<dyn ContainerRuntime>,
    handler: Arc<dyn LineHandler>,
    filter: ContainerFilter,
    config: SupervisorConfig,
    /// container_id -> active stream
    handles: Arc<DashMap<String, StreamHandle>>,
    next_generation: AtomicU64,
    metrics: Option<SentinelMetrics>,
}

impl StreamSupervisor {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        handler: Arc<dyn LineHandler>,
        filter: ContainerFilter,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            runtime,
            handler,
            filter,
            config,
            handles: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(0),
            metrics: None,
        }
    }

    /// Report the active stream count to Prometheus
    pub fn with_metrics(mut self, metrics: SentinelMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Start streaming a container unless it is already streaming or excluded
    ///
    /// Returns `true` if a new stream was opened.
    pub async fn ensure_streaming(&self, container_id: &str) -> RuntimeResult<bool> {
        if self.handles.contains_key(container_id) {
            return Ok(false);
        }

        let container = self.runtime.inspect(container_id).await?;

        if container.name == self.config.self_name {
            debug!(container = %container.name, "Skipping own container");
            return Ok(false);
        }

        if !self.filter.should_monitor(&container) {
            return Ok(false);
        }

        Ok(self.spawn_stream(container))
    }

    fn spawn_stream(&self, container: ContainerDescriptor) -> bool {
        match self.handles.entry(container.id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                info!(
                    container_id = %container.id,
                    container = %container.name,
                    "Starting log stream"
                );

                let container_name = container.name.clone();
                let task = tokio::spawn(run_stream(
                    Arc::clone(&self.runtime),
                    Arc::clone(&self.handler),
                    Arc::clone(&self.handles),
                    container,
                    generation,
                    self.metrics.clone(),
                ));

                slot.insert(StreamHandle {
                    container_name,
                    started_at: Utc::now(),
                    generation,
                    task,
                });
                self.report_active();
                true
            }
        }
    }

    /// Stop streaming a container and release its handle
    ///
    /// Returns `true` if a stream was active.
    pub async fn stop_streaming(&self, container_id: &str) -> bool {
        let Some((_, handle)) = self.handles.remove(container_id) else {
            return false;
        };

        handle.task.abort();
        self.report_active();
        debug!(
            container_id = %container_id,
            container = %handle.container_name,
            "Stopped log stream"
        );
        self.handler.on_stream_end(container_id).await;
        true
    }

    /// Scan running containers and open streams for new ones
    ///
    /// Returns the number of streams opened.
    pub async fn scan(&self) -> RuntimeResult<usize> {
        let containers = self.runtime.list_containers(false).await?;
        let mut started = 0;

        for container in containers {
            if self.handles.contains_key(&container.id) {
                continue;
            }

            match self.ensure_streaming(&container.id).await {
                Ok(true) => started += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(container_id = %container.id, error = %e, "Failed to start log stream");
                }
            }
        }

        Ok(started)
    }

    /// Apply a runtime lifecycle event
    pub async fn handle_event(&self, event: &LifecycleEvent) {
        if event.is_start() {
            info!(
                container_id = %event.actor_id,
                container = event.actor_name().unwrap_or_default(),
                "Container started"
            );
            if let Err(e) = self.ensure_streaming(&event.actor_id).await {
                warn!(container_id = %event.actor_id, error = %e, "Failed to start log stream");
            }
        } else if event.is_stop() {
            info!(
                container_id = %event.actor_id,
                container = event.actor_name().unwrap_or_default(),
                action = %event.action,
                "Container stopped"
            );
            self.stop_streaming(&event.actor_id).await;
        }
    }

    /// Run discovery until shutdown, then release every stream
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "Starting stream supervisor"
        );

        let watcher = tokio::spawn(Arc::clone(&self).watch_lifecycle(shutdown.resubscribe()));

        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.scan().await {
                        Ok(started) if started > 0 => {
                            debug!(started, active = self.active_count(), "Discovery scan complete");
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "Discovery scan failed"),
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down stream supervisor");
                    break;
                }
            }
        }

        watcher.abort();
        let released = self.shutdown_all();
        info!(released, "Released all log streams");
    }

    async fn watch_lifecycle(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        loop {
            match self.runtime.watch_events().await {
                Ok(mut events) => {
                    info!("Watching container lifecycle events");
                    loop {
                        tokio::select! {
                            next = events.next() => match next {
                                Some(Ok(event)) => self.handle_event(&event).await,
                                Some(Err(e)) => {
                                    warn!(error = %e, "Lifecycle event stream failed");
                                    break;
                                }
                                None => {
                                    warn!("Lifecycle event stream ended");
                                    break;
                                }
                            },
                            _ = shutdown.recv() => return,
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Failed to watch lifecycle events"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.event_retry_delay) => {}
                _ = shutdown.recv() => return,
            }
        }
    }

    /// Abort every stream task and release all handles
    pub fn shutdown_all(&self) -> usize {
        let count = self.handles.len();
        self.handles.retain(|_, handle| {
            handle.task.abort();
            false
        });
        self.report_active();
        count
    }

    pub fn is_streaming(&self, container_id: &str) -> bool {
        self.handles.contains_key(container_id)
    }

    pub fn active_count(&self) -> usize {
        self.handles.len()
    }

    /// (container_id, container_name) of every active stream
    pub fn active_streams(&self) -> Vec<(String, String)> {
        self.handles
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().container_name.clone()))
            .collect()
    }

    fn report_active(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.set_active_streams(self.handles.len() as i64);
        }
    }
}

/// Body of one container's stream task
async fn run_stream(
    runtime: Arc<dyn ContainerRuntime>,
    handler: Arc<dyn LineHandler>,
    handles: Arc<DashMap<String, StreamHandle>>,
    container: ContainerDescriptor,
    generation: u64,
    metrics: Option<SentinelMetrics>,
) {
    match pump_lines(runtime.as_ref(), handler.as_ref(), &container).await {
        Ok(()) => debug!(container = %container.name, "Log stream ended"),
        Err(e) => warn!(container = %container.name, error = %e, "Log stream failed"),
    }

    // A stop event may already have replaced this handle with a newer one
    handles.remove_if(&container.id, |_, handle| handle.generation == generation);
    if let Some(metrics) = &metrics {
        metrics.set_active_streams(handles.len() as i64);
    }
    handler.on_stream_end(&container.id).await;
}

async fn pump_lines(
    runtime: &dyn ContainerRuntime,
    handler: &dyn LineHandler,
    container: &ContainerDescriptor,
) -> RuntimeResult<()> {
    let mut stream = runtime.stream_logs(&container.id).await?;
    let mut decoder = FrameDecoder::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        for frame in decoder.push(&chunk) {
            handler
                .on_line(RawLine {
                    container_id: container.id.clone(),
                    container_name: container.name.clone(),
                    timestamp: Utc::now(),
                    stream: frame.stream,
                    message: frame.message,
                })
                .await;
        }
    }

    if decoder.pending_len() > 0 {
        debug!(
            container = %container.name,
            bytes = decoder.pending_len(),
            "Stream closed with a partial frame buffered"
        );
    }

    Ok(())
}
