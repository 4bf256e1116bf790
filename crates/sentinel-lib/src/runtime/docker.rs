//! Docker Engine API adapter
//!
//! Talks to the Engine REST API over TCP. Log and event endpoints are
//! long-lived, so the client itself carries no timeout and only the
//! request/response calls get one.

use super::{
    async_trait, ContainerRuntime, LifecycleEventStream, LogChunkStream, RuntimeError,
    RuntimeResult,
};
use crate::models::{ContainerDescriptor, LifecycleEvent};
use futures_util::StreamExt;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};
use url::Url;

/// Default Engine API endpoint
pub const DEFAULT_DOCKER_ENDPOINT: &str = "http://localhost:2375";

/// Grace period the daemon waits for a container to stop before killing it
const RESTART_STOP_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct DockerConfig {
    pub endpoint: String,
    /// Timeout for non-streaming calls
    pub request_timeout: Duration,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_DOCKER_ENDPOINT.to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// [`ContainerRuntime`] backed by the Docker Engine API
#[derive(Clone)]
pub struct DockerRuntime {
    client: Client,
    base: Url,
    request_timeout: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerSummary {
    id: String,
    #[serde(default)]
    names: Vec<String>,
    #[serde(default)]
    image: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerInspect {
    id: String,
    #[serde(default)]
    name: String,
    config: Option<InspectConfig>,
    state: Option<InspectState>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    #[serde(default)]
    image: String,
    #[serde(default)]
    labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct EngineEvent {
    #[serde(rename = "Type", default)]
    kind: String,
    #[serde(rename = "Action", default)]
    action: String,
    #[serde(rename = "Actor")]
    actor: Option<EngineActor>,
}

#[derive(Debug, Deserialize)]
struct EngineActor {
    #[serde(rename = "ID", default)]
    id: String,
    #[serde(rename = "Attributes", default)]
    attributes: HashMap<String, String>,
}

impl From<ContainerSummary> for ContainerDescriptor {
    fn from(summary: ContainerSummary) -> Self {
        let name = summary
            .names
            .first()
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_default();

        Self {
            id: summary.id,
            name,
            image: summary.image,
            state: summary.state,
            labels: summary.labels.unwrap_or_default(),
        }
    }
}

impl From<ContainerInspect> for ContainerDescriptor {
    fn from(inspect: ContainerInspect) -> Self {
        let (image, labels) = inspect
            .config
            .map(|c| (c.image, c.labels.unwrap_or_default()))
            .unwrap_or_default();

        Self {
            id: inspect.id,
            name: inspect.name.trim_start_matches('/').to_string(),
            image,
            state: inspect.state.map(|s| s.status).unwrap_or_default(),
            labels,
        }
    }
}

impl From<EngineEvent> for LifecycleEvent {
    fn from(event: EngineEvent) -> Self {
        let (actor_id, attributes) = event
            .actor
            .map(|a| (a.id, a.attributes))
            .unwrap_or_default();

        Self {
            kind: event.kind,
            action: event.action,
            actor_id,
            attributes,
        }
    }
}

impl DockerRuntime {
    pub fn new(config: DockerConfig) -> RuntimeResult<Self> {
        let mut endpoint = config.endpoint.trim().to_string();
        if !endpoint.ends_with('/') {
            endpoint.push('/');
        }

        let base = Url::parse(&endpoint).map_err(|e| {
            RuntimeError::Unavailable(format!("invalid endpoint {}: {}", config.endpoint, e))
        })?;

        let client = Client::builder()
            .user_agent(concat!("sentinel/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base,
            request_timeout: config.request_timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        self.base.as_str()
    }

    fn url(&self, path: &str) -> RuntimeResult<Url> {
        self.base
            .join(path)
            .map_err(|e| RuntimeError::Unavailable(format!("invalid request path {}: {}", path, e)))
    }

    /// Restart URL with an explicit stop grace, and a timeout that covers it
    fn restart_request(&self, container_id: &str) -> RuntimeResult<(Url, Duration)> {
        let mut url = self.url(&format!("containers/{}/restart", container_id))?;
        url.query_pairs_mut()
            .append_pair("t", &RESTART_STOP_GRACE.as_secs().to_string());
        Ok((url, self.request_timeout + RESTART_STOP_GRACE))
    }

    /// Map non-success statuses onto runtime errors
    async fn check(response: Response, container_id: Option<&str>) -> RuntimeResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::NOT_FOUND {
            if let Some(id) = container_id {
                return Err(RuntimeError::NotFound(id.to_string()));
            }
        }

        let message = response.text().await.unwrap_or_default();
        Err(RuntimeError::Api {
            status: status.as_u16(),
            message: message.trim().to_string(),
        })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(&self, all: bool) -> RuntimeResult<Vec<ContainerDescriptor>> {
        let mut url = self.url("containers/json")?;
        if all {
            url.query_pairs_mut().append_pair("all", "1");
        }

        let response = self
            .client
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await?;
        let summaries: Vec<ContainerSummary> = Self::check(response, None)
            .await?
            .json()
            .await
            .map_err(|e| RuntimeError::Decode(e.to_string()))?;

        Ok(summaries.into_iter().map(ContainerDescriptor::from).collect())
    }

    async fn inspect(&self, container_id: &str) -> RuntimeResult<ContainerDescriptor> {
        let url = self.url(&format!("containers/{}/json", container_id))?;

        let response = self
            .client
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await?;
        let inspect: ContainerInspect = Self::check(response, Some(container_id))
            .await?
            .json()
            .await
            .map_err(|e| RuntimeError::Decode(e.to_string()))?;

        Ok(inspect.into())
    }

    async fn stream_logs(&self, container_id: &str) -> RuntimeResult<LogChunkStream> {
        let mut url = self.url(&format!("containers/{}/logs", container_id))?;
        url.query_pairs_mut()
            .append_pair("follow", "1")
            .append_pair("stdout", "1")
            .append_pair("stderr", "1")
            .append_pair("tail", "0");

        let response = self.client.get(url).send().await?;
        let response = Self::check(response, Some(container_id)).await?;

        debug!(container_id = %container_id, "Opened log stream");
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(RuntimeError::from))
            .boxed())
    }

    async fn watch_events(&self) -> RuntimeResult<LifecycleEventStream> {
        let mut url = self.url("events")?;
        url.query_pairs_mut()
            .append_pair("filters", r#"{"type":["container"]}"#);

        let response = self.client.get(url).send().await?;
        let response = Self::check(response, None).await?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(forward_events(response, tx));

        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn restart(&self, container_id: &str) -> RuntimeResult<()> {
        let (url, timeout) = self.restart_request(container_id)?;

        let response = self.client.post(url).timeout(timeout).send().await?;
        Self::check(response, Some(container_id)).await?;
        Ok(())
    }

    async fn ping(&self) -> RuntimeResult<()> {
        let url = self.url("_ping")?;

        let response = self
            .client
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;
        Self::check(response, None).await?;
        Ok(())
    }
}

/// Split the newline-delimited event body and forward parsed events
async fn forward_events(response: Response, tx: mpsc::Sender<RuntimeResult<LifecycleEvent>>) {
    let mut body = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                let _ = tx.send(Err(e.into())).await;
                return;
            }
        };

        buffer.extend_from_slice(&chunk);

        while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=pos).collect();
            let Some(event) = parse_event_line(&line) else {
                continue;
            };

            if tx.send(Ok(event)).await.is_err() {
                // Receiver dropped, the watch is no longer wanted
                return;
            }
        }
    }
}

fn parse_event_line(line: &[u8]) -> Option<LifecycleEvent> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    match serde_json::from_str::<EngineEvent>(text) {
        Ok(event) => Some(event.into()),
        Err(e) => {
            warn!(error = %e, "Skipping malformed lifecycle event");
            None
        }
    }
}
