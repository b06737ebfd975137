//! AXCP gateway - Server
//!
//! Sessions, configuration, Prometheus counters and the router that
//! composes negotiation, privacy accounting and delta merge. The QUIC accept loop (`Gateway`)
//! requires the `quic` feature.

mod config;
#[cfg(feature = "quic")]
mod gateway;
mod metrics;
mod router;
mod session;

pub use config::*;
#[cfg(feature = "quic")]
pub use gateway::*;
pub use metrics::*;
pub use router::*;
pub use session::*;
