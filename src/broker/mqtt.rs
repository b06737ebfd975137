//! MQTT publish sink.
//!
//! Publishes are queued on a `rumqttc` client and flushed by a background
//! event loop that reconnects on its own. QoS 0, never retained.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Broker, BrokerError};

/// Port used when the broker URL names none.
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Client id used when none is given.
pub const DEFAULT_MQTT_CLIENT_ID: &str = "axcp-gateway";

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const REQUEST_QUEUE: usize = 256;

/// Split `mqtt://host:port`, `tcp://host:port` or `host:port` into host and port.
pub fn parse_broker_url(url: &str) -> Result<(String, u16), BrokerError> {
    let invalid = |why: &str| BrokerError::Unavailable(format!("broker url '{url}': {why}"));

    let rest = match url.split_once("://") {
        Some(("mqtt" | "tcp", rest)) => rest,
        Some((scheme, _)) => return Err(invalid(&format!("unsupported scheme '{scheme}'"))),
        None => url,
    };
    let rest = rest.trim_end_matches('/');

    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse().map_err(|_| invalid("bad port"))?;
            (host, port)
        }
        None => (rest, DEFAULT_MQTT_PORT),
    };
    if host.is_empty() {
        return Err(invalid("missing host"));
    }
    Ok((host.to_string(), port))
}

/// Broker backed by an MQTT server.
#[derive(Debug)]
pub struct MqttBroker {
    client: AsyncClient,
    event_loop: JoinHandle<()>,
}

impl MqttBroker {
    /// Start a client for `url` and its background event loop.
    ///
    /// Must be called inside a tokio runtime. The connection is made
    /// lazily; publishes queue until it is up.
    pub fn spawn(url: &str, client_id: &str) -> Result<Self, BrokerError> {
        let (host, port) = parse_broker_url(url)?;
        let mut options = MqttOptions::new(client_id, host.clone(), port);
        options.set_keep_alive(KEEP_ALIVE);

        let (client, mut events) = AsyncClient::new(options, REQUEST_QUEUE);
        let event_loop = tokio::spawn(async move {
            loop {
                match events.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!(%host, port, "mqtt broker connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(%host, port, error = %e, "mqtt connection error, retrying");
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        });

        Ok(Self { client, event_loop })
    }
}

impl Drop for MqttBroker {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

#[async_trait]
impl Broker for MqttBroker {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BrokerError> {
        if topic.is_empty() || topic.contains(['+', '#']) {
            return Err(BrokerError::InvalidTopic(topic.to_string()));
        }
        debug!(%topic, bytes = payload.len(), "mqtt publish");
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_broker_url() {
        assert_eq!(
            parse_broker_url("mqtt://broker.local:1884").unwrap(),
            ("broker.local".to_string(), 1884)
        );
        assert_eq!(
            parse_broker_url("tcp://10.0.0.2").unwrap(),
            ("10.0.0.2".to_string(), DEFAULT_MQTT_PORT)
        );
        assert_eq!(
            parse_broker_url("localhost:1883/").unwrap(),
            ("localhost".to_string(), 1883)
        );
    }

    #[test]
    fn test_parse_broker_url_rejects() {
        assert!(parse_broker_url("mqtts://broker:8883").is_err());
        assert!(parse_broker_url("mqtt://:1883").is_err());
        assert!(parse_broker_url("mqtt://broker:port").is_err());
    }

    #[tokio::test]
    async fn test_wildcard_topics_refused() {
        let broker = MqttBroker::spawn("mqtt://127.0.0.1:1", DEFAULT_MQTT_CLIENT_ID).unwrap();
        let err = broker
            .publish("telemetry/+", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert_eq!(err, BrokerError::InvalidTopic("telemetry/+".into()));
    }

    #[tokio::test]
    async fn test_publish_queues_while_disconnected() {
        let broker = MqttBroker::spawn("mqtt://127.0.0.1:1", DEFAULT_MQTT_CLIENT_ID).unwrap();
        broker
            .publish("telemetry/rover-1", Bytes::from_static(b"eA=="))
            .await
            .unwrap();
    }
}
