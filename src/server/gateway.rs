//! QUIC accept loop.

use std::net::SocketAddr;
use std::sync::Arc;

use quinn::Endpoint;
use rustls::pki_types::CertificateDer;
use tracing::{info, warn};

use super::{GatewayConfig, GatewayMetrics, Router};
use crate::broker::Broker;
use crate::core::{CLOSE_NORMAL, GatewayError, GatewayResult};
use crate::transport::{QuicConnection, TlsIdentity, server_endpoint};

/// A bound AXCP gateway.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use axcp_gateway::broker::LogBroker;
/// use axcp_gateway::server::{Gateway, GatewayConfigBuilder, MetricsRegistry};
/// use axcp_gateway::transport::TlsIdentity;
///
/// let config = GatewayConfigBuilder::new()
///     .bind_addr("0.0.0.0:7143".parse()?)
///     .build()?;
/// let identity = TlsIdentity::self_signed(vec!["localhost".into()])?;
///
/// let metrics = MetricsRegistry::new()?;
/// let gateway = Gateway::bind(
///     config,
///     identity,
///     Arc::new(LogBroker),
///     metrics.gateway_metrics().clone(),
/// )?;
/// gateway.run().await?;
/// ```
#[derive(Debug)]
pub struct Gateway {
    endpoint: Endpoint,
    router: Router,
    certificate: CertificateDer<'static>,
}

impl Gateway {
    /// Validate `config` and bind the endpoint.
    pub fn bind(
        config: GatewayConfig,
        identity: TlsIdentity,
        broker: Arc<dyn Broker>,
        metrics: GatewayMetrics,
    ) -> GatewayResult<Self> {
        config.validate()?;
        let certificate = identity
            .leaf()
            .cloned()
            .ok_or_else(|| GatewayError::Config("empty certificate chain".into()))?;
        let endpoint = server_endpoint(
            config.bind_addr,
            identity,
            config.idle_timeout,
            config.max_datagram_size,
        )?;

        Ok(Self {
            endpoint,
            router: Router::new(config, broker, metrics),
            certificate,
        })
    }

    /// Get the local address the gateway is bound to.
    pub fn local_addr(&self) -> GatewayResult<SocketAddr> {
        Ok(self.endpoint.local_addr()?)
    }

    /// Leaf certificate served to peers.
    pub fn certificate_der(&self) -> &CertificateDer<'static> {
        &self.certificate
    }

    /// The router handling connections.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Accept connections until the endpoint is closed.
    pub async fn run(&self) -> GatewayResult<()> {
        info!(addr = %self.local_addr()?, "gateway listening");

        while let Some(incoming) = self.endpoint.accept().await {
            let router = self.router.clone();
            tokio::spawn(async move {
                let conn = match incoming.await {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "handshake failed");
                        return;
                    }
                };
                let conn = Arc::new(QuicConnection::new(conn));
                if let Err(e) = router.serve_connection(conn).await {
                    warn!(error = %e, "connection ended with error");
                }
            });
        }
        Ok(())
    }

    /// Close the endpoint; `run` returns once pending accepts drain.
    pub fn shutdown(&self) {
        self.endpoint.close(CLOSE_NORMAL.into(), b"shutdown");
    }

    /// Wait for every connection to finish closing.
    pub async fn wait_idle(&self) {
        self.endpoint.wait_idle().await;
    }
}
