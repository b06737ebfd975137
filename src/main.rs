//! AXCP gateway binary
//!
//! ## Usage
//!
//! ```bash
//! # Listen on the default address with a generated self-signed certificate
//! axcp-gateway -v --cert-out gateway.der
//!
//! # Gaussian noise with a tighter budget
//! AXCP_DP_EPSILON=0.5 AXCP_DP_DELTA=1e-6 axcp-gateway --mechanism gaussian
//!
//! # Per-topic budgets and a fixed profile
//! axcp-gateway --budget-config budgets.toml --default-profile 2
//!
//! # Publish to MQTT and expose Prometheus metrics
//! axcp-gateway --broker-url mqtt://localhost:1883 --metrics-addr 127.0.0.1:9100
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use axcp_gateway::broker::{Broker, LogBroker};
use axcp_gateway::privacy::{BudgetPolicy, Mechanism};
use axcp_gateway::server::{
    Gateway, GatewayConfig, GatewayConfigBuilder, MetricsRegistry, SharedMetricsRegistry,
};
use axcp_gateway::transport::TlsIdentity;

/// AXCP gateway - profile negotiation, private telemetry and shared context over QUIC
#[derive(Parser)]
#[command(name = "axcp-gateway")]
#[command(version)]
#[command(about = "AXCP gateway - profile negotiation, private telemetry and shared context over QUIC")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Address to listen on
    #[arg(long, env = "AXCP_ADDR", default_value = "0.0.0.0:7143")]
    addr: SocketAddr,

    /// Epsilon cap per session (overrides the "*" budget)
    #[arg(long, env = "AXCP_DP_EPSILON")]
    epsilon: Option<f64>,

    /// Delta cap per session (overrides the "*" budget)
    #[arg(long, env = "AXCP_DP_DELTA")]
    delta: Option<f64>,

    /// Sensitivity bound (overrides the "*" budget)
    #[arg(long, env = "AXCP_DP_CLIP")]
    clip: Option<f64>,

    /// Epsilon charged per telemetry datagram (overrides the "*" budget)
    #[arg(long)]
    epsilon_per_sample: Option<f64>,

    /// Noise mechanism: laplace or gaussian
    #[arg(long, default_value = "laplace")]
    mechanism: Mechanism,

    /// TOML file with per-topic budgets
    #[arg(long, env = "AXCP_BUDGET_CONFIG")]
    budget_config: Option<PathBuf>,

    /// Locally supported profile mask (e.g. 0b1111, 0xF or 15)
    #[arg(long, default_value = "0b1111", value_parser = parse_mask)]
    supported_profiles: u32,

    /// Smallest profile accepted
    #[arg(long, default_value_t = 0)]
    min_profile: u32,

    /// Skip negotiation and use this profile for every session
    #[arg(long)]
    default_profile: Option<u32>,

    /// Republish accepted envelopes to the broker
    #[arg(long)]
    forward_envelopes: bool,

    /// Topic namespace for telemetry
    #[arg(long, default_value = "telemetry")]
    telemetry_namespace: String,

    /// Topic namespace for forwarded envelopes
    #[arg(long, default_value = "axcp")]
    envelope_namespace: String,

    /// DER certificate (generated self-signed when omitted)
    #[arg(long, requires = "key")]
    cert: Option<PathBuf>,

    /// DER PKCS#8 private key
    #[arg(long, requires = "cert")]
    key: Option<PathBuf>,

    /// Write the served certificate (DER) here for clients to trust
    #[arg(long)]
    cert_out: Option<PathBuf>,

    /// MQTT broker (mqtt://host:port); publishes are only logged when omitted
    #[arg(long, env = "AXCP_BROKER_URL")]
    broker_url: Option<String>,

    /// MQTT client id
    #[arg(long, env = "AXCP_BROKER_CLIENT_ID", default_value = "axcp-gateway")]
    broker_client_id: String,

    /// Serve Prometheus metrics on this address (GET /metrics)
    #[arg(long, env = "AXCP_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = build_config(&cli)?;
    let identity = load_identity(cli.cert.as_deref(), cli.key.as_deref())?;
    let broker = build_broker(cli.broker_url.as_deref(), &cli.broker_client_id)?;
    let metrics: SharedMetricsRegistry =
        Arc::new(MetricsRegistry::new().context("registering metrics")?);
    if let Some(addr) = cli.metrics_addr {
        spawn_metrics_endpoint(addr, metrics.clone()).await?;
    }

    let gateway = Gateway::bind(config, identity, broker, metrics.gateway_metrics().clone())?;

    if let Some(path) = &cli.cert_out {
        std::fs::write(path, gateway.certificate_der().as_ref())
            .with_context(|| format!("writing certificate to {}", path.display()))?;
        info!(path = %path.display(), "certificate written");
    }

    tokio::select! {
        result = gateway.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            gateway.shutdown();
            gateway.wait_idle().await;
        }
    }
    Ok(())
}

fn build_config(cli: &Cli) -> Result<GatewayConfig> {
    let mut policy = match &cli.budget_config {
        Some(path) => BudgetPolicy::load(path)?,
        None => BudgetPolicy::default(),
    };

    let wildcard = policy.wildcard_mut();
    if let Some(epsilon) = cli.epsilon {
        wildcard.epsilon = epsilon;
    }
    if let Some(delta) = cli.delta {
        wildcard.delta = delta;
    }
    if let Some(clip) = cli.clip {
        wildcard.clip_norm = clip;
    }
    if let Some(per_sample) = cli.epsilon_per_sample {
        wildcard.epsilon_per_sample = per_sample;
    }

    let config = GatewayConfigBuilder::new()
        .bind_addr(cli.addr)
        .supported_profiles(cli.supported_profiles)
        .minimum_profile(cli.min_profile)
        .default_profile(cli.default_profile)
        .forward_envelopes(cli.forward_envelopes)
        .telemetry_namespace(cli.telemetry_namespace.as_str())
        .envelope_namespace(cli.envelope_namespace.as_str())
        .mechanism(cli.mechanism)
        .budget_policy(policy)
        .build()?;
    Ok(config)
}

fn build_broker(url: Option<&str>, client_id: &str) -> Result<Arc<dyn Broker>> {
    let Some(url) = url else {
        warn!("no broker url configured, publishes are only logged");
        return Ok(Arc::new(LogBroker));
    };

    #[cfg(feature = "mqtt")]
    {
        let broker = axcp_gateway::broker::MqttBroker::spawn(url, client_id)?;
        info!(%url, client_id, "publishing to mqtt broker");
        Ok(Arc::new(broker))
    }
    #[cfg(not(feature = "mqtt"))]
    {
        let _ = client_id;
        anyhow::bail!("--broker-url {url} needs the mqtt feature")
    }
}

async fn spawn_metrics_endpoint(addr: SocketAddr, metrics: SharedMetricsRegistry) -> Result<()> {
    #[cfg(feature = "http")]
    {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding metrics endpoint {addr}"))?;
        tokio::spawn(async move {
            if let Err(e) = axcp_gateway::server::serve_metrics(listener, metrics).await {
                warn!(error = %e, "metrics endpoint stopped");
            }
        });
        Ok(())
    }
    #[cfg(not(feature = "http"))]
    {
        let _ = metrics;
        anyhow::bail!("--metrics-addr {addr} needs the http feature")
    }
}

fn load_identity(cert: Option<&Path>, key: Option<&Path>) -> Result<TlsIdentity> {
    match (cert, key) {
        (Some(cert), Some(key)) => {
            let cert = std::fs::read(cert).with_context(|| format!("reading {}", cert.display()))?;
            let key = std::fs::read(key).with_context(|| format!("reading {}", key.display()))?;
            Ok(TlsIdentity::from_der(cert, key))
        }
        _ => {
            info!("generating self-signed certificate");
            Ok(TlsIdentity::self_signed(vec!["localhost".into()])?)
        }
    }
}

/// Parse a profile mask written in binary, hex or decimal.
fn parse_mask(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let parsed = if let Some(bin) = s.strip_prefix("0b") {
        u32::from_str_radix(bin, 2)
    } else if let Some(hex) = s.strip_prefix("0x") {
        u32::from_str_radix(hex, 16)
    } else {
        s.parse()
    };
    parsed.map_err(|e| format!("invalid profile mask '{s}': {e}"))
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();
}
