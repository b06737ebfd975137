//! Length-prefixed envelope framing for QUIC streams.
//!
//! ```text
//! +----------------+---------------------------+
//! | length (u32 LE)| encoded Envelope (length) |
//! +----------------+---------------------------+
//! ```

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::length_delimited::LengthDelimitedCodecError;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use super::{FrameError, TransportError, TransportResult};
use crate::core::FRAME_LENGTH_PREFIX_SIZE;
use crate::envelope::{self, Envelope};

/// Codec for `[u32 LE length][body]` frames.
pub fn envelope_codec(max_frame_size: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(FRAME_LENGTH_PREFIX_SIZE)
        .little_endian()
        .max_frame_length(max_frame_size)
        .new_codec()
}

/// Encode one frame into a standalone buffer.
pub fn encode_frame(env: &Envelope) -> Vec<u8> {
    let body = envelope::encode(env);
    let mut out = Vec::with_capacity(FRAME_LENGTH_PREFIX_SIZE + body.len());
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    out
}

/// Reads envelopes from the receive half of a stream.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: FramedRead<R, LengthDelimitedCodec>,
    max_frame_size: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a reader.
    pub fn new(reader: R, max_frame_size: usize) -> Self {
        Self {
            inner: FramedRead::new(reader, envelope_codec(max_frame_size)),
            max_frame_size,
        }
    }

    /// Next envelope, or `None` when the peer finished the stream cleanly.
    ///
    /// Oversize frames, truncated frames and undecodable bodies are errors.
    pub async fn next_envelope(&mut self) -> TransportResult<Option<Envelope>> {
        match self.inner.next().await {
            None => Ok(None),
            Some(Ok(frame)) => {
                let env = envelope::decode(&frame).map_err(FrameError::Decode)?;
                Ok(Some(env))
            }
            Some(Err(e)) => Err(self.classify(e)),
        }
    }

    fn classify(&self, e: std::io::Error) -> TransportError {
        let too_large = e
            .get_ref()
            .is_some_and(|inner| inner.is::<LengthDelimitedCodecError>());
        if too_large {
            FrameError::TooLarge {
                max: self.max_frame_size,
            }
            .into()
        } else {
            TransportError::Io(e)
        }
    }
}

/// Writes envelopes to the send half of a stream.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: FramedWrite<W, LengthDelimitedCodec>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wrap a writer.
    pub fn new(writer: W, max_frame_size: usize) -> Self {
        Self {
            inner: FramedWrite::new(writer, envelope_codec(max_frame_size)),
        }
    }

    /// Write one envelope and flush.
    pub async fn send_envelope(&mut self, env: &Envelope) -> TransportResult<()> {
        self.inner.send(Bytes::from(envelope::encode(env))).await?;
        Ok(())
    }

    /// Recover the underlying writer.
    pub fn into_inner(self) -> W {
        self.inner.into_inner()
    }
}
