//! AXCP gateway - Envelope model
//!
//! Wire-level message shapes exchanged with peers. All messages are
//! protocol-buffer encoded with [`prost`]:
//!
//! - [`Envelope`]: versioned unit carried on QUIC streams
//! - [`PatchOp`]: one field-level context update inside an envelope
//! - [`TelemetryDatagram`]: telemetry sample carried on QUIC datagrams
//!
//! Stream framing and datagram tagging live in [`crate::transport`].

mod message;
mod telemetry;

pub use message::*;
pub use telemetry::*;

use prost::Message;
use thiserror::Error;

/// Errors decoding wire messages.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The bytes are not a valid protobuf encoding of the message.
    #[error("invalid encoding: {0}")]
    InvalidEncoding(#[from] prost::DecodeError),
}

/// Encode a message to its protobuf bytes.
pub fn encode<M: Message>(msg: &M) -> Vec<u8> {
    msg.encode_to_vec()
}

/// Decode a message from its protobuf bytes.
pub fn decode<M: Message + Default>(data: &[u8]) -> Result<M, DecodeError> {
    Ok(M::decode(data)?)
}
