//! Peer connection abstraction.
//!
//! The router drives a connection as two sequences: incoming bidirectional
//! streams and incoming datagrams. Both end when the peer goes away.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};

use super::TransportResult;

/// An accepted connection carrying reliable streams and unreliable datagrams.
#[async_trait]
pub trait PeerConnection: Send + Sync + 'static {
    /// Send half of a bidirectional stream.
    type SendStream: AsyncWrite + Unpin + Send + 'static;
    /// Receive half of a bidirectional stream.
    type RecvStream: AsyncRead + Unpin + Send + 'static;

    /// Next peer-initiated stream, or `None` once the connection is closed.
    async fn accept_stream(&self) -> TransportResult<Option<(Self::SendStream, Self::RecvStream)>>;

    /// Next datagram, or `None` once the connection is closed.
    async fn read_datagram(&self) -> TransportResult<Option<Bytes>>;

    /// Close the connection with an application error code.
    fn close(&self, code: u32, reason: &str);

    /// Human-readable peer label for logs.
    fn remote_label(&self) -> String;
}
