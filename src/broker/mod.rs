//! AXCP gateway - Publish sink
//!
//! The gateway republishes noised telemetry (and, optionally, accepted
//! envelopes) to a publish/subscribe broker. The broker is an explicit
//! handle owned by the router; publishes are fire-and-forget.
//!
//! Payloads are base64 (standard alphabet) of the encoded protobuf message.
//!
//! `MqttBroker` (feature `mqtt`) publishes to an MQTT server;
//! [`LogBroker`] only logs and is the fallback when no server is configured.

#[cfg(feature = "mqtt")]
mod mqtt;

#[cfg(feature = "mqtt")]
pub use mqtt::*;

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::info;

/// Errors publishing to the broker.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Broker is not reachable.
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// Topic rejected by the broker.
    #[error("invalid topic '{0}'")]
    InvalidTopic(String),
}

/// Publish sink.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Publish `payload` on `topic`.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BrokerError>;
}

/// `<namespace>/<key>`.
pub fn topic_for(namespace: &str, key: &str) -> String {
    format!("{}/{}", namespace.trim_end_matches('/'), key)
}

/// Base64 payload for an encoded message.
pub fn encode_payload(message: &[u8]) -> Bytes {
    Bytes::from(STANDARD.encode(message))
}

/// Decode a base64 payload.
pub fn decode_payload(payload: &[u8]) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(payload)
}

/// A recorded publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    /// Topic.
    pub topic: String,
    /// Payload as published.
    pub payload: Bytes,
}

/// Broker that keeps every publish in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryBroker {
    published: Arc<Mutex<Vec<Published>>>,
    fail_with: Arc<Mutex<Option<BrokerError>>>,
}

impl MemoryBroker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every publish so far.
    pub fn published(&self) -> Vec<Published> {
        self.published.lock().clone()
    }

    /// Publishes on topics starting with `prefix`.
    pub fn published_under(&self, prefix: &str) -> Vec<Published> {
        self.published
            .lock()
            .iter()
            .filter(|p| p.topic.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Make every subsequent publish fail with `err` (or succeed again with `None`).
    pub fn fail_with(&self, err: Option<BrokerError>) {
        *self.fail_with.lock() = err;
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BrokerError> {
        if let Some(err) = self.fail_with.lock().clone() {
            return Err(err);
        }
        self.published.lock().push(Published {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }
}

/// Broker that logs each publish.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogBroker;

#[async_trait]
impl Broker for LogBroker {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BrokerError> {
        info!(topic, bytes = payload.len(), "publish");
        Ok(())
    }
}
