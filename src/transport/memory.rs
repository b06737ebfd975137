//! In-process connection pair.
//!
//! Streams are `tokio::io::duplex` pipes, peer datagrams an mpsc channel.
//! Used to drive the router without sockets.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};

use super::{PeerConnection, TransportError, TransportResult};

/// Per-direction pipe buffer.
pub const MEMORY_STREAM_BUFFER: usize = 64 * 1024;

const DATAGRAM_QUEUE: usize = 1024;
const STREAM_QUEUE: usize = 16;

type StreamPair = (WriteHalf<DuplexStream>, ReadHalf<DuplexStream>);

/// Close code and reason recorded when the gateway closes a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// Application close code.
    pub code: u32,
    /// Reason text.
    pub reason: String,
}

/// Gateway side of an in-memory connection.
#[derive(Debug)]
pub struct MemoryConnection {
    streams: AsyncMutex<mpsc::Receiver<StreamPair>>,
    datagrams: AsyncMutex<mpsc::Receiver<Bytes>>,
    closed: watch::Sender<Option<CloseInfo>>,
    label: String,
}

/// Peer side of an in-memory connection.
#[derive(Debug)]
pub struct MemoryPeer {
    streams: mpsc::Sender<StreamPair>,
    datagrams: mpsc::Sender<Bytes>,
    closed: watch::Receiver<Option<CloseInfo>>,
}

impl MemoryConnection {
    /// Create a connected pair.
    pub fn pair(label: impl Into<String>) -> (Arc<MemoryConnection>, MemoryPeer) {
        let (stream_tx, stream_rx) = mpsc::channel(STREAM_QUEUE);
        let (datagram_tx, datagram_rx) = mpsc::channel(DATAGRAM_QUEUE);
        let (closed_tx, closed_rx) = watch::channel(None);

        let conn = MemoryConnection {
            streams: AsyncMutex::new(stream_rx),
            datagrams: AsyncMutex::new(datagram_rx),
            closed: closed_tx,
            label: label.into(),
        };
        let peer = MemoryPeer {
            streams: stream_tx,
            datagrams: datagram_tx,
            closed: closed_rx,
        };
        (Arc::new(conn), peer)
    }

    fn is_closed(&self) -> bool {
        self.closed.borrow().is_some()
    }
}

#[async_trait]
impl PeerConnection for MemoryConnection {
    type SendStream = WriteHalf<DuplexStream>;
    type RecvStream = ReadHalf<DuplexStream>;

    async fn accept_stream(&self) -> TransportResult<Option<StreamPair>> {
        if self.is_closed() {
            return Ok(None);
        }
        Ok(self.streams.lock().await.recv().await)
    }

    async fn read_datagram(&self) -> TransportResult<Option<Bytes>> {
        if self.is_closed() {
            return Ok(None);
        }
        Ok(self.datagrams.lock().await.recv().await)
    }

    fn close(&self, code: u32, reason: &str) {
        self.closed.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }
            *state = Some(CloseInfo {
                code,
                reason: reason.to_string(),
            });
            true
        });
    }

    fn remote_label(&self) -> String {
        self.label.clone()
    }
}

impl MemoryPeer {
    /// Open a bidirectional stream; returns the peer's write and read halves.
    pub async fn open_stream(&self) -> TransportResult<StreamPair> {
        let (local, remote) = tokio::io::duplex(MEMORY_STREAM_BUFFER);
        let (local_read, local_write) = tokio::io::split(local);
        let (remote_read, remote_write) = tokio::io::split(remote);

        self.streams
            .send((remote_write, remote_read))
            .await
            .map_err(|_| TransportError::ConnectionClosed)?;
        Ok((local_write, local_read))
    }

    /// Send a datagram to the gateway, best effort.
    pub fn send_datagram(&self, data: Bytes) -> TransportResult<()> {
        self.datagrams
            .try_send(data)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Close info, if the gateway closed the connection.
    pub fn close_info(&self) -> Option<CloseInfo> {
        self.closed.borrow().clone()
    }

    /// Wait until the gateway closes the connection.
    pub async fn closed(&mut self) -> Option<CloseInfo> {
        loop {
            if let Some(info) = self.closed.borrow_and_update().clone() {
                return Some(info);
            }
            if self.closed.changed().await.is_err() {
                return self.closed.borrow().clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_stream_pipe() {
        let (conn, peer) = MemoryConnection::pair("mem-1");

        let (mut write, _read) = peer.open_stream().await.unwrap();
        write.write_all(b"hello").await.unwrap();

        let (_send, mut recv) = conn.accept_stream().await.unwrap().unwrap();
        let mut buf = [0u8; 5];
        recv.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn test_datagrams_end_when_peer_dropped() {
        let (conn, peer) = MemoryConnection::pair("mem-2");
        peer.send_datagram(Bytes::from_static(b"x")).unwrap();
        drop(peer);

        assert_eq!(conn.read_datagram().await.unwrap(), Some(Bytes::from_static(b"x")));
        assert_eq!(conn.read_datagram().await.unwrap(), None);
        assert!(conn.accept_stream().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_is_recorded_once() {
        let (conn, mut peer) = MemoryConnection::pair("mem-3");
        conn.close(1, "decode error");
        conn.close(0, "later");

        let info = peer.closed().await.unwrap();
        assert_eq!(info.code, 1);
        assert_eq!(info.reason, "decode error");
        assert!(conn.read_datagram().await.unwrap().is_none());
    }
}
