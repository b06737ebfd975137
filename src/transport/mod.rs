//! AXCP gateway - Transport layer
//!
//! Moves bytes between peers and the router. It provides:
//!
//! - **Stream framing**: [`FrameReader`] / [`FrameWriter`], 4-byte little-endian
//!   length prefix followed by an encoded envelope
//! - **Datagram tagging**: [`decode_datagram`], one tag byte followed by the payload
//! - **Connections**: the [`PeerConnection`] trait, implemented by
//!   [`MemoryConnection`] and, with the `quic` feature, `QuicConnection`
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │               Router                    │
//! ├────────────────────┬────────────────────┤
//! │  framed streams    │  tagged datagrams  │  ← This module
//! ├────────────────────┴────────────────────┤
//! │                 QUIC                    │
//! └─────────────────────────────────────────┘
//! ```
//!
//! QUIC handshake, congestion control and encryption are left to `quinn`.

mod connection;
mod datagram;
mod error;
mod frame;
mod memory;
#[cfg(feature = "quic")]
mod quic;

pub use connection::*;
pub use datagram::*;
pub use error::*;
pub use frame::*;
pub use memory::*;
#[cfg(feature = "quic")]
pub use quic::*;
