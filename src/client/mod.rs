//! AXCP gateway - Client
//!
//! QUIC peer for talking to a gateway: negotiate a profile, exchange
//! envelopes, and send telemetry datagrams.

#[allow(clippy::module_inception)]
mod client;

pub use client::*;
