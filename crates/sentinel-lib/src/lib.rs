//! Container log sentinel library
//!
//! This crate provides the core functionality for:
//! - Following container logs through the runtime API
//! - Parsing and classifying log lines
//! - AI-assisted diagnosis gated by confidence and cooldowns
//! - Safety-checked corrective actions
//! - Health checks and observability

pub mod action;
pub mod advisory;
pub mod bus;
pub mod classify;
pub mod decision;
pub mod health;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod runtime;

pub use health::{
    ComponentHealth, ComponentStatus, HealthMonitor, HealthRegistry, HealthResponse,
    ReadinessResponse,
};
pub use models::*;
pub use observability::{SentinelMetrics, StructuredLogger};
pub use pipeline::{ControlLoop, CycleOutcome, LoopConfig};
