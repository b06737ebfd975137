//! QUIC transport via `quinn`.
//!
//! TLS 1.3 with the `ring` provider, ALPN `axcp/1`, and datagrams enabled.
//! Certificates are DER; a self-signed one can be generated for local use.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use quinn::crypto::rustls::{QuicClientConfig, QuicServerConfig};
use quinn::{ConnectionError, Endpoint, IdleTimeout, RecvStream, SendStream, TransportConfig};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tracing::debug;

use super::{PeerConnection, TransportError, TransportResult};
use crate::core::{ALPN_AXCP, DEFAULT_KEEP_ALIVE};

/// Certificate chain and key served by the gateway.
#[derive(Debug)]
pub struct TlsIdentity {
    /// Certificate chain, leaf first.
    pub chain: Vec<CertificateDer<'static>>,
    /// Private key.
    pub key: PrivateKeyDer<'static>,
}

impl TlsIdentity {
    /// Generate a self-signed certificate for `names`.
    pub fn self_signed(names: Vec<String>) -> TransportResult<Self> {
        let certified = rcgen::generate_simple_self_signed(names)
            .map_err(|e| TransportError::Endpoint(format!("certificate generation: {e}")))?;
        let key = PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der());
        Ok(Self {
            chain: vec![certified.cert.der().clone()],
            key: PrivateKeyDer::Pkcs8(key),
        })
    }

    /// Build from a DER certificate and a DER PKCS#8 key.
    pub fn from_der(cert: Vec<u8>, key: Vec<u8>) -> Self {
        Self {
            chain: vec![CertificateDer::from(cert)],
            key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key)),
        }
    }

    /// Leaf certificate, for clients to trust.
    pub fn leaf(&self) -> Option<&CertificateDer<'static>> {
        self.chain.first()
    }
}

fn crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn tls_err(e: impl std::fmt::Display) -> TransportError {
    TransportError::Endpoint(e.to_string())
}

fn transport_config(idle_timeout: Duration, max_datagram_size: usize) -> TransportResult<TransportConfig> {
    let mut config = TransportConfig::default();
    config.max_idle_timeout(Some(IdleTimeout::try_from(idle_timeout).map_err(tls_err)?));
    config.keep_alive_interval(Some(DEFAULT_KEEP_ALIVE.min(idle_timeout / 2)));
    config.datagram_receive_buffer_size(Some(max_datagram_size * 256));
    Ok(config)
}

/// Bind a server endpoint.
pub fn server_endpoint(
    addr: SocketAddr,
    identity: TlsIdentity,
    idle_timeout: Duration,
    max_datagram_size: usize,
) -> TransportResult<Endpoint> {
    let mut tls = rustls::ServerConfig::builder_with_provider(crypto_provider())
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(tls_err)?
        .with_no_client_auth()
        .with_single_cert(identity.chain, identity.key)
        .map_err(tls_err)?;
    tls.alpn_protocols = vec![ALPN_AXCP.to_vec()];

    let crypto = QuicServerConfig::try_from(tls).map_err(tls_err)?;
    let mut server_config = quinn::ServerConfig::with_crypto(Arc::new(crypto));
    server_config.transport_config(Arc::new(transport_config(idle_timeout, max_datagram_size)?));

    Ok(Endpoint::server(server_config, addr)?)
}

/// Bind a client endpoint trusting exactly `trusted`.
pub fn client_endpoint(
    bind: SocketAddr,
    trusted: &[CertificateDer<'static>],
    idle_timeout: Duration,
    max_datagram_size: usize,
) -> TransportResult<Endpoint> {
    let mut roots = rustls::RootCertStore::empty();
    for cert in trusted {
        roots.add(cert.clone()).map_err(tls_err)?;
    }

    let mut tls = rustls::ClientConfig::builder_with_provider(crypto_provider())
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(tls_err)?
        .with_root_certificates(roots)
        .with_no_client_auth();
    tls.alpn_protocols = vec![ALPN_AXCP.to_vec()];

    let crypto = QuicClientConfig::try_from(tls).map_err(tls_err)?;
    let mut client_config = quinn::ClientConfig::new(Arc::new(crypto));
    client_config.transport_config(Arc::new(transport_config(idle_timeout, max_datagram_size)?));

    let mut endpoint = Endpoint::client(bind)?;
    endpoint.set_default_client_config(client_config);
    Ok(endpoint)
}

/// Accepted QUIC connection.
#[derive(Debug, Clone)]
pub struct QuicConnection {
    inner: quinn::Connection,
}

impl QuicConnection {
    /// Wrap an established connection.
    pub fn new(inner: quinn::Connection) -> Self {
        Self { inner }
    }

    /// Underlying connection.
    pub fn inner(&self) -> &quinn::Connection {
        &self.inner
    }
}

impl From<ConnectionError> for TransportError {
    fn from(e: ConnectionError) -> Self {
        TransportError::ConnectionLost(e.to_string())
    }
}

// Orderly shutdowns end the sequence; anything else is an error.
fn map_connection_error<T>(e: ConnectionError) -> TransportResult<Option<T>> {
    match e {
        ConnectionError::ApplicationClosed(_)
        | ConnectionError::ConnectionClosed(_)
        | ConnectionError::LocallyClosed
        | ConnectionError::TimedOut => {
            debug!(reason = %e, "connection ended");
            Ok(None)
        }
        other => Err(TransportError::ConnectionLost(other.to_string())),
    }
}

#[async_trait]
impl PeerConnection for QuicConnection {
    type SendStream = SendStream;
    type RecvStream = RecvStream;

    async fn accept_stream(&self) -> TransportResult<Option<(SendStream, RecvStream)>> {
        match self.inner.accept_bi().await {
            Ok(pair) => Ok(Some(pair)),
            Err(e) => map_connection_error(e),
        }
    }

    async fn read_datagram(&self) -> TransportResult<Option<Bytes>> {
        match self.inner.read_datagram().await {
            Ok(data) => Ok(Some(data)),
            Err(e) => map_connection_error(e),
        }
    }

    fn close(&self, code: u32, reason: &str) {
        self.inner.close(code.into(), reason.as_bytes());
    }

    fn remote_label(&self) -> String {
        self.inner.remote_address().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_signed_identity() {
        let identity = TlsIdentity::self_signed(vec!["localhost".into()]).unwrap();
        assert_eq!(identity.chain.len(), 1);
        assert!(!identity.leaf().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_server_endpoint_binds() {
        let identity = TlsIdentity::self_signed(vec!["localhost".into()]).unwrap();
        let endpoint = server_endpoint(
            "127.0.0.1:0".parse().unwrap(),
            identity,
            Duration::from_secs(5),
            1200,
        )
        .unwrap();
        assert_ne!(endpoint.local_addr().unwrap().port(), 0);
    }
}
