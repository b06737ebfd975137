//! # AXCP Gateway
//!
//! Server side of the AXCP agent-exchange protocol. Peers connect over QUIC,
//! send protobuf envelopes on bidirectional streams and telemetry samples as
//! unreliable datagrams. The gateway:
//!
//! - **Negotiates** a capability profile (0..3) per session from bitmask offers
//! - **Validates** every envelope against the negotiated profile
//! - **Merges** context deltas into a per-session document, last writer wins
//! - **Privatizes** telemetry with Laplace or Gaussian noise under a finite
//!   epsilon budget, then publishes it to a broker
//!
//! ## Feature Flags
//!
//! - `quic` (default): QUIC endpoint, client and self-signed certificates
//! - `cli` (default): the `axcp-gateway` binary
//! - `mqtt` (default): `MqttBroker`, an MQTT publish sink
//! - `http` (default): Prometheus scrape endpoint
//!
//! ## Modules
//!
//! - [`core`]: Constants, wire error codes and the aggregate error type
//! - [`envelope`]: Envelope and telemetry messages
//! - [`negotiation`]: Profile negotiation and envelope validation
//! - [`privacy`]: Noise mechanisms, budgets and per-topic policy
//! - [`context`]: Context values and the delta merge engine
//! - [`transport`]: Stream framing, datagram tagging and connections
//! - [`broker`]: Outbound publish seam
//! - [`server`]: Sessions, router, metrics and the QUIC accept loop
//! - `client`: QUIC client (requires `quic` feature)
//!
//! ## Example Usage
//!
//! ```rust
//! use axcp_gateway::prelude::*;
//!
//! let local = SessionCapabilities::new(0b1111, 1);
//! let peer = SessionCapabilities::new(0b0110, 0);
//! let profile = negotiate(&local, &peer).unwrap();
//! assert_eq!(profile.get(), 2);
//!
//! let mut doc = ContextDocument::new();
//! let op = PatchOp::replace("k", &serde_json::json!({"a": 1}), 100);
//! assert_eq!(doc.apply(&op).unwrap(), ApplyOutcome::Applied);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod broker;
pub mod context;
pub mod core;
pub mod envelope;
pub mod negotiation;
pub mod privacy;
pub mod server;
pub mod transport;

// Client API (feature-gated)
#[cfg(feature = "quic")]
#[cfg_attr(docsrs, doc(cfg(feature = "quic")))]
pub mod client;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::*;

    pub use crate::broker::{Broker, BrokerError, LogBroker, MemoryBroker};
    pub use crate::context::{ApplyOutcome, ContextDocument, ContextValue, MergeError};
    pub use crate::envelope::{Envelope, ErrorMessage, PatchOp, TelemetryDatagram};
    pub use crate::negotiation::{
        NegotiatedProfile, NegotiationError, SessionCapabilities, negotiate, validate_envelope,
    };
    pub use crate::privacy::{BudgetPolicy, BudgetSpec, Mechanism, PrivacyBudget, PrivacyError};
    pub use crate::server::{
        GatewayConfig, GatewayConfigBuilder, GatewayMetrics, MetricsRegistry, Router, Session,
    };
    pub use crate::transport::{
        FrameReader, FrameWriter, MemoryConnection, PeerConnection, TransportError,
    };

    #[cfg(feature = "quic")]
    pub use crate::client::{GatewayClient, GatewayClientBuilder};
    #[cfg(feature = "quic")]
    pub use crate::server::Gateway;
    #[cfg(feature = "quic")]
    pub use crate::transport::TlsIdentity;
    #[cfg(feature = "mqtt")]
    pub use crate::broker::MqttBroker;
}

// Re-export commonly used items at crate root
pub use core::{ErrorCode, GatewayError, GatewayResult};
pub use envelope::{Envelope, TelemetryDatagram};
pub use negotiation::{NegotiatedProfile, SessionCapabilities};
