//! Prometheus metrics for the gateway.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `axcp_sessions_active` | Gauge | |
//! | `axcp_envelopes_received_total` | Counter | |
//! | `axcp_envelopes_replied_total` | Counter | `code` |
//! | `axcp_telemetry_received_total` | Counter | |
//! | `axcp_telemetry_published_total` | Counter | |
//! | `axcp_telemetry_dropped_total` | Counter | `reason` |
//! | `axcp_budget_rejected_total` | Counter | |
//! | `axcp_broker_publish_failures_total` | Counter | |
//!
//! Label values come from fixed sets, so cardinality is bounded.

use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use thiserror::Error;

use super::DatagramOutcome;
use crate::core::ErrorCode;

/// Errors from metric registration or export.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Failed to register a metric with Prometheus.
    #[error("failed to register metric: {0}")]
    RegistrationFailed(#[from] prometheus::Error),

    /// Failed to encode metrics output.
    #[error("failed to encode metrics: {0}")]
    EncodingFailed(String),
}

/// Result type for metrics operations.
pub type MetricsResult<T> = Result<T, MetricsError>;

/// Router counters.
///
/// Cheap to clone; clones share the underlying series.
#[derive(Clone)]
pub struct GatewayMetrics {
    sessions_active: IntGauge,
    envelopes_received: IntCounter,
    envelopes_replied: IntCounterVec,
    telemetry_received: IntCounter,
    telemetry_published: IntCounter,
    telemetry_dropped: IntCounterVec,
    budget_rejected: IntCounter,
    broker_failures: IntCounter,
}

fn counter(registry: &Registry, name: &str, help: &str) -> MetricsResult<IntCounter> {
    let counter = IntCounter::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

fn counter_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    label: &str,
) -> MetricsResult<IntCounterVec> {
    let counter = IntCounterVec::new(Opts::new(name, help), &[label])?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

impl GatewayMetrics {
    /// Create the gateway series and register them with `registry`.
    ///
    /// # Errors
    ///
    /// Fails if a series with the same name is already registered.
    pub fn new(registry: &Registry) -> MetricsResult<Self> {
        let sessions_active = IntGauge::with_opts(Opts::new(
            "axcp_sessions_active",
            "Number of live sessions",
        ))?;
        registry.register(Box::new(sessions_active.clone()))?;

        Ok(Self {
            sessions_active,
            envelopes_received: counter(
                registry,
                "axcp_envelopes_received_total",
                "Envelopes read from peer streams",
            )?,
            envelopes_replied: counter_vec(
                registry,
                "axcp_envelopes_replied_total",
                "Replies sent, by outcome code",
                "code",
            )?,
            telemetry_received: counter(
                registry,
                "axcp_telemetry_received_total",
                "Datagrams received from peers",
            )?,
            telemetry_published: counter(
                registry,
                "axcp_telemetry_published_total",
                "Noised telemetry samples handed to the broker",
            )?,
            telemetry_dropped: counter_vec(
                registry,
                "axcp_telemetry_dropped_total",
                "Datagrams dropped before publishing, by reason",
                "reason",
            )?,
            budget_rejected: counter(
                registry,
                "axcp_budget_rejected_total",
                "Telemetry charges refused by an exhausted privacy budget",
            )?,
            broker_failures: counter(
                registry,
                "axcp_broker_publish_failures_total",
                "Broker publishes that failed and were dropped",
            )?,
        })
    }

    /// A session was registered.
    pub fn session_opened(&self) {
        self.sessions_active.inc();
    }

    /// A session was removed.
    pub fn session_closed(&self) {
        self.sessions_active.dec();
    }

    /// Live sessions.
    pub fn active_sessions(&self) -> i64 {
        self.sessions_active.get()
    }

    /// An envelope was read.
    pub fn envelope_received(&self) {
        self.envelopes_received.inc();
    }

    /// A reply carrying `code` was built.
    pub fn envelope_replied(&self, code: ErrorCode) {
        self.envelopes_replied
            .with_label_values(&[code.as_str()])
            .inc();
    }

    /// Envelopes read so far.
    pub fn envelopes_received(&self) -> u64 {
        self.envelopes_received.get()
    }

    /// Replies sent with `code`.
    pub fn envelopes_replied(&self, code: ErrorCode) -> u64 {
        self.envelopes_replied
            .with_label_values(&[code.as_str()])
            .get()
    }

    /// Record what happened to one datagram.
    pub fn datagram(&self, outcome: DatagramOutcome) {
        self.telemetry_received.inc();
        match outcome.drop_reason() {
            None => self.telemetry_published.inc(),
            Some(reason) => {
                if outcome == DatagramOutcome::BudgetExhausted {
                    self.budget_rejected.inc();
                }
                self.telemetry_dropped.with_label_values(&[reason]).inc();
            }
        }
    }

    /// Datagrams received so far.
    pub fn telemetry_received(&self) -> u64 {
        self.telemetry_received.get()
    }

    /// Samples handed to the broker.
    pub fn telemetry_published(&self) -> u64 {
        self.telemetry_published.get()
    }

    /// Datagrams dropped for `reason`.
    pub fn telemetry_dropped(&self, reason: &str) -> u64 {
        self.telemetry_dropped.with_label_values(&[reason]).get()
    }

    /// Charges refused by an exhausted budget.
    pub fn budget_rejected(&self) -> u64 {
        self.budget_rejected.get()
    }

    /// A broker publish failed.
    pub fn broker_failed(&self) {
        self.broker_failures.inc();
    }

    /// Failed broker publishes.
    pub fn broker_failures(&self) -> u64 {
        self.broker_failures.get()
    }
}

/// Prometheus registry holding the gateway series.
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Registry,
    gateway: GatewayMetrics,
}

impl MetricsRegistry {
    /// Create a registry with every gateway series registered.
    pub fn new() -> MetricsResult<Self> {
        let registry = Registry::new();
        let gateway = GatewayMetrics::new(&registry)?;
        Ok(Self { registry, gateway })
    }

    /// The gateway series.
    pub fn gateway_metrics(&self) -> &GatewayMetrics {
        &self.gateway
    }

    /// Encode every series in the Prometheus text format.
    pub fn encode_text(&self) -> MetricsResult<String> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|e| MetricsError::EncodingFailed(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| MetricsError::EncodingFailed(e.to_string()))
    }

    /// The underlying Prometheus registry.
    pub fn prometheus_registry(&self) -> &Registry {
        &self.registry
    }
}

/// Registry shared between the router and the scrape endpoint.
pub type SharedMetricsRegistry = Arc<MetricsRegistry>;

#[cfg(feature = "http")]
mod http {
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use tokio::net::TcpListener;
    use tracing::{error, info};

    use super::SharedMetricsRegistry;

    async fn metrics_handler(State(registry): State<SharedMetricsRegistry>) -> impl IntoResponse {
        match registry.encode_text() {
            Ok(body) => (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
                .into_response(),
            Err(e) => {
                error!(error = %e, "failed to encode metrics");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
            }
        }
    }

    async fn live_handler() -> impl IntoResponse {
        StatusCode::OK
    }

    /// Serve `GET /metrics` and `GET /live` on `listener`.
    pub async fn serve_metrics(
        listener: TcpListener,
        registry: SharedMetricsRegistry,
    ) -> std::io::Result<()> {
        let app = axum::Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/live", get(live_handler))
            .with_state(registry);

        info!(addr = %listener.local_addr()?, "metrics endpoint listening");
        axum::serve(listener, app).await
    }
}

#[cfg(feature = "http")]
pub use http::serve_metrics;
