//! Sentinel configuration
//!
//! Loaded from `SENTINEL_*` environment variables. List settings accept
//! comma-separated values.

use anyhow::{anyhow, Context, Result};
use sentinel_lib::action::{SafetyConfig, SafetyMode};
use sentinel_lib::advisory::{
    GeminiConfig, WindowConfig, DEFAULT_GEMINI_ENDPOINT, DEFAULT_GEMINI_MODEL,
};
use sentinel_lib::classify::severity_from_level;
use sentinel_lib::pipeline::LoopConfig;
use sentinel_lib::runtime::{
    ContainerFilter, DockerConfig, SupervisorConfig, DEFAULT_DOCKER_ENDPOINT, DEFAULT_SELF_NAME,
};
use serde::Deserialize;
use std::time::Duration;

const LIST_KEYS: &[&str] = &[
    "include_labels",
    "exclude_labels",
    "include_images",
    "require_approval",
];

#[derive(Debug, Clone, Deserialize)]
pub struct SentinelConfig {
    /// Host identity used in structured logs
    #[serde(default = "default_host_name")]
    pub host_name: String,

    /// Port for health and metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_docker_endpoint")]
    pub docker_endpoint: String,

    #[serde(default = "default_docker_timeout")]
    pub docker_timeout_secs: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Own container name, never streamed
    #[serde(default = "default_self_name")]
    pub self_name: String,

    #[serde(default)]
    pub include_labels: Vec<String>,

    #[serde(default = "default_exclude_labels")]
    pub exclude_labels: Vec<String>,

    #[serde(default)]
    pub include_images: Vec<String>,

    #[serde(default = "default_window_max_lines")]
    pub window_max_lines: usize,

    #[serde(default = "default_window_batch_size")]
    pub window_batch_size: usize,

    #[serde(default = "default_window_max_span")]
    pub window_max_span_secs: u64,

    #[serde(default = "default_min_severity")]
    pub min_severity: String,

    #[serde(default = "default_ai_endpoint")]
    pub ai_endpoint: String,

    #[serde(default = "default_ai_model")]
    pub ai_model: String,

    #[serde(default)]
    pub ai_api_key: Option<String>,

    #[serde(default = "default_ai_max_tokens")]
    pub ai_max_tokens: u32,

    #[serde(default = "default_timeout")]
    pub ai_timeout_secs: u64,

    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f64,

    #[serde(default = "default_advice_cooldown")]
    pub advice_cooldown_ms: u64,

    #[serde(default = "default_safety_mode")]
    pub safety_mode: String,

    #[serde(default = "default_max_actions_per_hour")]
    pub max_actions_per_hour: usize,

    #[serde(default = "default_max_scale_up")]
    pub max_scale_up: u32,

    #[serde(default = "default_min_scale_down")]
    pub min_scale_down: u32,

    #[serde(default = "default_action_cooldown")]
    pub action_cooldown_ms: u64,

    #[serde(default = "default_require_approval")]
    pub require_approval: Vec<String>,

    #[serde(default = "default_timeout")]
    pub action_timeout_secs: u64,

    /// Capacity of the in-process message bus
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,

    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,
}

fn default_host_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "sentinel".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_docker_endpoint() -> String {
    DEFAULT_DOCKER_ENDPOINT.to_string()
}

fn default_docker_timeout() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    10
}

fn default_self_name() -> String {
    DEFAULT_SELF_NAME.to_string()
}

fn default_exclude_labels() -> Vec<String> {
    vec!["sentinel.ignore=true".to_string()]
}

fn default_window_max_lines() -> usize {
    20
}

fn default_window_batch_size() -> usize {
    10
}

fn default_window_max_span() -> u64 {
    300
}

fn default_min_severity() -> String {
    "WARNING".to_string()
}

fn default_ai_endpoint() -> String {
    DEFAULT_GEMINI_ENDPOINT.to_string()
}

fn default_ai_model() -> String {
    DEFAULT_GEMINI_MODEL.to_string()
}

fn default_ai_max_tokens() -> u32 {
    512
}

fn default_timeout() -> u64 {
    30
}

fn default_confidence_floor() -> f64 {
    0.6
}

fn default_advice_cooldown() -> u64 {
    60_000
}

fn default_safety_mode() -> String {
    "strict".to_string()
}

fn default_max_actions_per_hour() -> usize {
    5
}

fn default_max_scale_up() -> u32 {
    10
}

fn default_min_scale_down() -> u32 {
    1
}

fn default_action_cooldown() -> u64 {
    300_000
}

fn default_require_approval() -> Vec<String> {
    vec![
        "database_migrations".to_string(),
        "security_patches".to_string(),
    ]
}

fn default_bus_capacity() -> usize {
    1024
}

fn default_health_interval() -> u64 {
    30
}

impl SentinelConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        Self::from_source(config::Environment::with_prefix("SENTINEL"))
    }

    fn from_source(env: config::Environment) -> Result<Self> {
        let env = LIST_KEYS
            .iter()
            .fold(env.try_parsing(true).list_separator(","), |env, key| {
                env.with_list_parse_key(key)
            });

        let config = config::Config::builder()
            .add_source(env)
            .build()
            .context("failed to read configuration")?;

        config
            .try_deserialize()
            .context("invalid SENTINEL_* configuration")
    }

    pub fn docker(&self) -> DockerConfig {
        DockerConfig {
            endpoint: self.docker_endpoint.clone(),
            request_timeout: Duration::from_secs(self.docker_timeout_secs),
        }
    }

    pub fn filter(&self) -> ContainerFilter {
        ContainerFilter::from_strings(
            &self.include_labels,
            &self.exclude_labels,
            &self.include_images,
        )
    }

    pub fn supervisor(&self) -> SupervisorConfig {
        SupervisorConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            self_name: self.self_name.clone(),
            ..Default::default()
        }
    }

    pub fn gemini(&self) -> GeminiConfig {
        GeminiConfig {
            endpoint: self.ai_endpoint.clone(),
            model: self.ai_model.clone(),
            api_key: self.ai_api_key.clone().filter(|k| !k.trim().is_empty()),
            max_tokens: self.ai_max_tokens,
        }
    }

    pub fn safety_mode(&self) -> Result<SafetyMode> {
        self.safety_mode
            .parse::<SafetyMode>()
            .map_err(|e| anyhow!(e))
    }

    pub fn safety(&self) -> Result<SafetyConfig> {
        Ok(SafetyConfig {
            mode: self.safety_mode()?,
            max_actions_per_hour: self.max_actions_per_hour,
            max_scale_up: self.max_scale_up,
            min_scale_down: self.min_scale_down,
            require_approval: self
                .require_approval
                .iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
            action_cooldown: Duration::from_millis(self.action_cooldown_ms),
        })
    }

    pub fn window(&self) -> Result<WindowConfig> {
        let min_severity = severity_from_level(&self.min_severity)
            .ok_or_else(|| anyhow!("unknown min severity: {}", self.min_severity))?;
        Ok(WindowConfig {
            max_lines: self.window_max_lines.max(1),
            batch_size: self.window_batch_size.max(1),
            max_span: Duration::from_secs(self.window_max_span_secs),
            min_severity,
        })
    }

    pub fn control_loop(&self) -> Result<LoopConfig> {
        Ok(LoopConfig {
            window: self.window()?,
            safety: self.safety()?,
            confidence_floor: self.confidence_floor,
            advice_cooldown: Duration::from_millis(self.advice_cooldown_ms),
            ai_timeout: Duration::from_secs(self.ai_timeout_secs),
            action_timeout: Duration::from_secs(self.action_timeout_secs),
        })
    }
}
