//! Container runtime integration
//!
//! This module owns everything that touches the container runtime:
//! the runtime trait itself, the Docker Engine adapter, decoding of the
//! multiplexed log framing, the discovery filter, and the supervisor that
//! keeps exactly one log stream open per monitored container.

mod docker;
mod filter;
mod frame;
mod supervisor;


pub use docker::{DockerConfig, DockerRuntime, DEFAULT_DOCKER_ENDPOINT};
pub use filter::{ContainerFilter, LabelSelector};
pub use frame::{encode_frame, DecodedFrame, FrameDecoder, FRAME_HEADER_LEN};
pub use supervisor::{
    LineHandler, StreamHandle, StreamSupervisor, SupervisorConfig, DEFAULT_POLL_INTERVAL,
    DEFAULT_SELF_NAME,
};

use crate::models::{ContainerDescriptor, LifecycleEvent};
use bytes::Bytes;
use futures_util::stream::BoxStream;
use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by a container runtime adapter
///
/// All of these are recoverable: callers log them and retry on the next
/// natural cycle.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),

    #[error("container not found: {0}")]
    NotFound(String),

    #[error("runtime API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("failed to decode runtime response: {0}")]
    Decode(String),

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Raw byte chunks of a container's multiplexed log stream
pub type LogChunkStream = BoxStream<'static, RuntimeResult<Bytes>>;

/// Stream of runtime lifecycle events
pub type LifecycleEventStream = BoxStream<'static, RuntimeResult<LifecycleEvent>>;

/// Trait for container runtime implementations
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// List containers; running ones only unless `all` is set
    async fn list_containers(&self, all: bool) -> RuntimeResult<Vec<ContainerDescriptor>>;

    /// Inspect a single container
    async fn inspect(&self, container_id: &str) -> RuntimeResult<ContainerDescriptor>;

    /// Follow a container's stdout/stderr as multiplexed frames
    async fn stream_logs(&self, container_id: &str) -> RuntimeResult<LogChunkStream>;

    /// Watch lifecycle events for the whole host
    async fn watch_events(&self) -> RuntimeResult<LifecycleEventStream>;

    /// Restart a container
    async fn restart(&self, container_id: &str) -> RuntimeResult<()>;

    /// Check the runtime is reachable
    async fn ping(&self) -> RuntimeResult<()>;
}

/// Scaling backend, only present when an orchestrator manages the host
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn scale(&self, target: &str, replicas: u32) -> RuntimeResult<()>;
}
