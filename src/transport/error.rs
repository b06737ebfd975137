//! Transport layer error types.

use std::io;

use thiserror::Error;

use crate::core::ErrorCode;
use crate::envelope::DecodeError;

/// Errors reading a length-prefixed stream frame.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Declared length exceeds the configured maximum.
    #[error("frame exceeds {max} bytes")]
    TooLarge {
        /// Configured maximum frame size.
        max: usize,
    },

    /// Frame body is not a valid envelope.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
}

/// Errors in the transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Stream framing error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// I/O error on a stream, including truncated reads.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Peer closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// Connection failed.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Datagram larger than the configured maximum.
    /// Dropped without a response.
    #[error("datagram of {len} bytes exceeds {max}")]
    DatagramTooLarge {
        /// Datagram length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Datagram with no tag byte.
    #[error("empty datagram")]
    EmptyDatagram,

    /// Datagram tag not known to this build.
    #[error("unknown datagram tag: 0x{0:02x}")]
    UnknownDatagramTag(u8),

    /// Datagram payload failed to decode.
    #[error("datagram decode error: {0}")]
    DatagramDecode(DecodeError),

    /// Endpoint or TLS setup failed.
    #[error("endpoint error: {0}")]
    Endpoint(String),
}

impl TransportError {
    /// Check if this error should result in silent drop (no response sent).
    pub fn is_silent_drop(&self) -> bool {
        matches!(
            self,
            TransportError::DatagramTooLarge { .. }
                | TransportError::EmptyDatagram
                | TransportError::UnknownDatagramTag(_)
                | TransportError::DatagramDecode(_)
        )
    }

    /// Check if this error is fatal to the connection.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::Frame(_)
                | TransportError::Io(_)
                | TransportError::ConnectionClosed
                | TransportError::ConnectionLost(_)
        )
    }

    /// Wire code reported to the peer.
    pub fn code(&self) -> ErrorCode {
        match self {
            TransportError::Frame(FrameError::TooLarge { .. })
            | TransportError::DatagramTooLarge { .. } => ErrorCode::PayloadTooLarge,
            _ => ErrorCode::MalformedRequest,
        }
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_drop_errors() {
        assert!(TransportError::EmptyDatagram.is_silent_drop());
        assert!(TransportError::UnknownDatagramTag(0x01).is_silent_drop());
        assert!(TransportError::DatagramTooLarge { len: 2000, max: 1200 }.is_silent_drop());

        assert!(!TransportError::ConnectionClosed.is_silent_drop());
        assert!(!TransportError::Frame(FrameError::TooLarge { max: 8 }).is_silent_drop());
    }

    #[test]
    fn test_fatal_errors() {
        assert!(TransportError::Frame(FrameError::TooLarge { max: 8 }).is_fatal());
        assert!(TransportError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "eof")).is_fatal());
        assert!(TransportError::ConnectionClosed.is_fatal());

        assert!(!TransportError::UnknownDatagramTag(0x01).is_fatal());
        assert!(!TransportError::EmptyDatagram.is_fatal());
    }

    #[test]
    fn test_codes() {
        assert_eq!(
            TransportError::Frame(FrameError::TooLarge { max: 8 }).code(),
            ErrorCode::PayloadTooLarge
        );
        assert_eq!(TransportError::ConnectionClosed.code(), ErrorCode::MalformedRequest);
    }
}
