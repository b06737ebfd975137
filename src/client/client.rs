//! High-level AXCP client API.

use std::net::SocketAddr;
use std::time::Duration;

use quinn::{Connection, Endpoint};
use rustls::pki_types::CertificateDer;
use thiserror::Error;
use tracing::debug;

use crate::core::{
    CLOSE_NORMAL, DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_DATAGRAM_SIZE, DEFAULT_MAX_FRAME_SIZE,
    DEFAULT_PORT, ErrorCode,
};
use crate::envelope::{Envelope, TelemetryDatagram};
use crate::negotiation::{NegotiatedProfile, SessionCapabilities};
use crate::transport::{FrameReader, FrameWriter, TransportError, client_endpoint, encode_telemetry};

/// Errors that can occur in the AXCP client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Failed to connect to the gateway.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The gateway finished the stream without replying.
    #[error("no reply from gateway")]
    NoReply,

    /// The gateway answered with an error code.
    #[error("gateway rejected request: {code}: {message}")]
    Rejected {
        /// Wire error code.
        code: ErrorCode,
        /// Diagnostic text.
        message: String,
    },

    /// Operation timed out.
    #[error("operation timed out")]
    Timeout,
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Gateway address to connect to.
    pub server_addr: SocketAddr,

    /// TLS server name.
    pub server_name: String,

    /// Certificates trusted for the gateway.
    pub trusted_certificates: Vec<CertificateDer<'static>>,

    /// Connection timeout.
    pub connect_timeout: Duration,

    /// Idle timeout.
    pub idle_timeout: Duration,

    /// Maximum frame size for replies.
    pub max_frame_size: usize,

    /// Maximum datagram size.
    pub max_datagram_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            server_name: "localhost".to_string(),
            trusted_certificates: Vec::new(),
            connect_timeout: Duration::from_secs(10),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_datagram_size: DEFAULT_MAX_DATAGRAM_SIZE,
        }
    }
}

/// Builder for creating a `GatewayClient`.
#[derive(Debug, Default)]
pub struct GatewayClientBuilder {
    config: ClientConfig,
}

impl GatewayClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the gateway address.
    pub fn server_addr(mut self, addr: SocketAddr) -> Self {
        self.config.server_addr = addr;
        self
    }

    /// Set the TLS server name.
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.config.server_name = name.into();
        self
    }

    /// Trust a gateway certificate.
    pub fn trust(mut self, cert: CertificateDer<'static>) -> Self {
        self.config.trusted_certificates.push(cert);
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Build the client configuration.
    pub fn build(self) -> ClientConfig {
        self.config
    }

    /// Build the configuration and connect.
    pub async fn connect(self) -> Result<GatewayClient, ClientError> {
        GatewayClient::connect(self.config).await
    }
}

/// An AXCP client connection.
///
/// # Example
///
/// ```ignore
/// use axcp_gateway::client::GatewayClientBuilder;
/// use axcp_gateway::negotiation::SessionCapabilities;
///
/// let client = GatewayClientBuilder::new()
///     .server_addr("127.0.0.1:7143".parse()?)
///     .trust(gateway_cert)
///     .connect()
///     .await?;
///
/// let profile = client.negotiate("trace-1", SessionCapabilities::new(0b0111, 1)).await?;
/// client.send_telemetry(&TelemetryDatagram::system(profile.get(), 42, 1 << 30, 55))?;
/// ```
#[derive(Debug)]
pub struct GatewayClient {
    endpoint: Endpoint,
    connection: Connection,
    config: ClientConfig,
}

impl GatewayClient {
    /// Connect to a gateway.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let bind = if config.server_addr.is_ipv6() {
            SocketAddr::from(([0u16; 8], 0))
        } else {
            SocketAddr::from(([0, 0, 0, 0], 0))
        };
        let endpoint = client_endpoint(
            bind,
            &config.trusted_certificates,
            config.idle_timeout,
            config.max_datagram_size,
        )?;

        let connecting = endpoint
            .connect(config.server_addr, &config.server_name)
            .map_err(|e| ClientError::ConnectionFailed(e.to_string()))?;
        let connection = tokio::time::timeout(config.connect_timeout, connecting)
            .await
            .map_err(|_| ClientError::Timeout)?
            .map_err(|e| ClientError::ConnectionFailed(e.to_string()))?;

        debug!(remote = %connection.remote_address(), "connected");
        Ok(Self {
            endpoint,
            connection,
            config,
        })
    }

    /// Send `env` on a fresh stream and wait for the reply.
    ///
    /// Error replies are returned as envelopes; see [`Envelope::outcome`].
    pub async fn request(&self, env: &Envelope) -> Result<Envelope, ClientError> {
        let (send, recv) = self.connection.open_bi().await.map_err(TransportError::from)?;

        let mut writer = FrameWriter::new(send, self.config.max_frame_size);
        writer.send_envelope(env).await?;
        let mut send = writer.into_inner();
        // Already-finished streams are fine here.
        let _ = send.finish();

        let mut reader = FrameReader::new(recv, self.config.max_frame_size);
        reader.next_envelope().await?.ok_or(ClientError::NoReply)
    }

    /// Like [`request`](Self::request), but error replies become [`ClientError::Rejected`].
    pub async fn request_ok(&self, env: &Envelope) -> Result<Envelope, ClientError> {
        let reply = self.request(env).await?;
        let code = reply.outcome();
        if code.is_ok() {
            return Ok(reply);
        }
        let message = reply.error.map(|e| e.message).unwrap_or_default();
        Err(ClientError::Rejected { code, message })
    }

    /// Negotiate a session profile.
    pub async fn negotiate(
        &self,
        trace_id: &str,
        caps: SessionCapabilities,
    ) -> Result<NegotiatedProfile, ClientError> {
        let request = Envelope::negotiation(trace_id, caps.supported, caps.minimum);
        let reply = self.request_ok(&request).await?;
        NegotiatedProfile::new(reply.profile).map_err(|e| ClientError::Rejected {
            code: e.code(),
            message: e.to_string(),
        })
    }

    /// Send a telemetry sample as a datagram, best effort.
    pub fn send_telemetry(&self, td: &TelemetryDatagram) -> Result<(), ClientError> {
        self.connection
            .send_datagram(encode_telemetry(td))
            .map_err(|e| TransportError::ConnectionLost(e.to_string()))?;
        Ok(())
    }

    /// Underlying QUIC connection.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Close the connection and wait for the close to be sent.
    pub async fn close(self) {
        self.connection.close(CLOSE_NORMAL.into(), b"bye");
        self.endpoint.wait_idle().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = GatewayClientBuilder::new()
            .server_name("gateway.local")
            .build();
        assert_eq!(config.server_addr.port(), 7143);
        assert_eq!(config.server_name, "gateway.local");
        assert!(config.trusted_certificates.is_empty());
    }
}
