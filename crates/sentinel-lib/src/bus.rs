//! Publication of classified lines to downstream consumers

use crate::models::ClassifiedLine;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Serialized messages above this size are dropped
pub const MAX_PAYLOAD_BYTES: usize = 9_000_000;

/// Id returned for messages dropped for size
pub const SKIPPED_TOO_LARGE: &str = "skipped-too-large";

#[derive(Debug, Error)]
pub enum BusError {
    #[error("message bus closed")]
    Closed,

    #[error("message bus full")]
    Full,

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusMessage {
    pub id: String,
    pub line: ClassifiedLine,
    pub attributes: BTreeMap<String, String>,
    pub published_at: DateTime<Utc>,
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a line, returning the message id
    async fn publish(&self, line: &ClassifiedLine) -> Result<String, BusError>;

    async fn health_check(&self) -> Result<(), BusError>;
}

/// Keep printable ASCII only
pub fn sanitize_attribute(value: &str) -> String {
    value.chars().filter(|c| (' '..='~').contains(c)).collect()
}

fn attributes(line: &ClassifiedLine) -> BTreeMap<String, String> {
    [
        ("severity", line.severity.as_str()),
        ("containerId", line.container_id()),
        ("containerName", line.container_name()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), sanitize_attribute(v)))
    .collect()
}

/// In-process bus over a bounded tokio channel
#[derive(Clone)]
pub struct ChannelBus {
    tx: mpsc::Sender<BusMessage>,
}

impl ChannelBus {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<BusMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl MessageBus for ChannelBus {
    async fn publish(&self, line: &ClassifiedLine) -> Result<String, BusError> {
        let message = BusMessage {
            id: Uuid::new_v4().to_string(),
            line: line.clone(),
            attributes: attributes(line),
            published_at: Utc::now(),
        };

        let payload_bytes = serde_json::to_vec(&message)?.len();
        if payload_bytes > MAX_PAYLOAD_BYTES {
            warn!(
                payload_bytes,
                container_id = %line.container_id(),
                "Bus payload too large, skipping"
            );
            return Ok(SKIPPED_TOO_LARGE.to_string());
        }

        let id = message.id.clone();
        self.tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => BusError::Full,
            mpsc::error::TrySendError::Closed(_) => BusError::Closed,
        })?;

        debug!(message_id = %id, "Published message");
        Ok(id)
    }

    async fn health_check(&self) -> Result<(), BusError> {
        if self.tx.is_closed() {
            Err(BusError::Closed)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LineMetadata, LogStream, ParsedLine, RawLine, Severity};

    fn line(name: &str, message: String) -> ClassifiedLine {
        ClassifiedLine {
            parsed: ParsedLine::unparsed(RawLine {
                container_id: "c1".to_string(),
                container_name: name.to_string(),
                timestamp: Utc::now(),
                stream: LogStream::Stdout,
                message,
            }),
            severity: Severity::Error,
            patterns: vec![],
            metadata: LineMetadata::default(),
        }
    }

    #[test]
    fn test_sanitize_attribute() {
        assert_eq!(sanitize_attribute("api\u{7f}-é\n1"), "api-1");
        assert_eq!(sanitize_attribute("plain ~value"), "plain ~value");
    }

    #[tokio::test]
    async fn test_publish_delivers_message() {
        let (bus, mut rx) = ChannelBus::new(4);

        let id = bus.publish(&line("api\u{1b}", "boom".to_string())).await.unwrap();

        let message = rx.recv().await.unwrap();
        assert_eq!(message.id, id);
        assert_eq!(message.attributes["severity"], "ERROR");
        assert_eq!(message.attributes["containerName"], "api");
        assert_eq!(message.line.message(), "boom");
    }

    #[tokio::test]
    async fn test_oversized_payload_is_skipped() {
        let (bus, mut rx) = ChannelBus::new(4);

        let id = bus
            .publish(&line("api", "x".repeat(MAX_PAYLOAD_BYTES)))
            .await
            .unwrap();

        assert_eq!(id, SKIPPED_TOO_LARGE);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_and_closed() {
        let (bus, rx) = ChannelBus::new(1);
        bus.publish(&line("api", "a".to_string())).await.unwrap();
        assert!(matches!(
            bus.publish(&line("api", "b".to_string())).await,
            Err(BusError::Full)
        ));

        assert!(bus.health_check().await.is_ok());
        drop(rx);
        assert!(matches!(bus.health_check().await, Err(BusError::Closed)));
    }
}
