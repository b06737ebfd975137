//! Type-tagged QUIC datagrams.
//!
//! ```text
//! +-----+------------------+
//! | tag | encoded payload  |
//! +-----+------------------+
//! ```
//!
//! `0xA0` carries a [`TelemetryDatagram`]. Other tags are dropped.

use bytes::{BufMut, Bytes, BytesMut};

use super::{TransportError, TransportResult};
use crate::core::{DATAGRAM_TAG_SIZE, DATAGRAM_TAG_TELEMETRY};
use crate::envelope::{self, TelemetryDatagram};

/// Datagram kinds known to the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DatagramTag {
    /// Telemetry sample.
    Telemetry = DATAGRAM_TAG_TELEMETRY,
}

impl DatagramTag {
    /// Parse a tag byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            DATAGRAM_TAG_TELEMETRY => Some(Self::Telemetry),
            _ => None,
        }
    }

    /// Tag byte.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Decoded inbound datagram.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundDatagram {
    /// Telemetry sample.
    Telemetry(TelemetryDatagram),
}

/// Prefix `payload` with `tag`.
pub fn tag_datagram(tag: DatagramTag, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(DATAGRAM_TAG_SIZE + payload.len());
    buf.put_u8(tag.as_byte());
    buf.put_slice(payload);
    buf.freeze()
}

/// Tag and encode a telemetry sample.
pub fn encode_telemetry(td: &TelemetryDatagram) -> Bytes {
    tag_datagram(DatagramTag::Telemetry, &envelope::encode(td))
}

/// Untag and decode a datagram of at most `max_size` bytes.
pub fn decode_datagram(data: &[u8], max_size: usize) -> TransportResult<InboundDatagram> {
    if data.len() > max_size {
        return Err(TransportError::DatagramTooLarge {
            len: data.len(),
            max: max_size,
        });
    }

    let (&tag, payload) = data.split_first().ok_or(TransportError::EmptyDatagram)?;
    match DatagramTag::from_byte(tag) {
        Some(DatagramTag::Telemetry) => envelope::decode(payload)
            .map(InboundDatagram::Telemetry)
            .map_err(TransportError::DatagramDecode),
        None => Err(TransportError::UnknownDatagramTag(tag)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DEFAULT_MAX_DATAGRAM_SIZE;

    #[test]
    fn test_telemetry_tag() {
        let td = TelemetryDatagram::system(1, 40, 2048, 35);
        let bytes = encode_telemetry(&td);
        assert_eq!(bytes[0], 0xA0);

        let decoded = decode_datagram(&bytes, DEFAULT_MAX_DATAGRAM_SIZE).unwrap();
        assert_eq!(decoded, InboundDatagram::Telemetry(td));
    }

    #[test]
    fn test_unknown_tag_dropped() {
        let err = decode_datagram(&[0x42, 1, 2], DEFAULT_MAX_DATAGRAM_SIZE).unwrap_err();
        assert!(matches!(err, TransportError::UnknownDatagramTag(0x42)));
        assert!(err.is_silent_drop());
    }

    #[test]
    fn test_empty_and_oversize() {
        assert!(matches!(
            decode_datagram(&[], DEFAULT_MAX_DATAGRAM_SIZE),
            Err(TransportError::EmptyDatagram)
        ));

        let big = vec![0xA0; 64];
        assert!(matches!(
            decode_datagram(&big, 32),
            Err(TransportError::DatagramTooLarge { len: 64, max: 32 })
        ));
    }

    #[test]
    fn test_bad_payload() {
        let err = decode_datagram(&[0xA0, 0xFF, 0xFF], DEFAULT_MAX_DATAGRAM_SIZE).unwrap_err();
        assert!(matches!(err, TransportError::DatagramDecode(_)));
    }
}
