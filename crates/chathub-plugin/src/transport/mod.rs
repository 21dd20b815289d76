//! Transport framing over a process-to-process byte channel.
//!
//! The transport knows nothing about hooks or APIs: it moves [`Frame`]s
//! and reports closure. Retry policy lives in the supervisor.

pub mod codec;
pub mod frame;
pub mod handshake;

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};

pub use codec::FrameCodec;
pub use frame::{Frame, PROTOCOL_VERSION, Reply};
pub use handshake::{accept_handshake, offer_handshake};

/// Boxed read half of a plugin channel.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
/// Boxed write half of a plugin channel.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
/// Stream of decoded frames.
pub type FrameReader = FramedRead<BoxedReader, FrameCodec>;
/// Sink of frames to encode.
pub type FrameWriter = FramedWrite<BoxedWriter, FrameCodec>;

/// Errors raised while moving frames.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Reading or writing the underlying channel failed, or a frame
    /// exceeded the size limit.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame did not contain valid protocol JSON.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The other side closed the channel.
    #[error("channel closed")]
    Closed,

    /// No handshake frame arrived in time.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// The server refused the handshake.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    /// A frame other than the expected handshake frame arrived.
    #[error("unexpected '{0}' frame during handshake")]
    UnexpectedFrame(&'static str),

    /// The two sides speak different protocol versions.
    #[error("protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        /// Version this side speaks.
        expected: u32,
        /// Version the other side announced.
        actual: u32,
    },

    /// The plugin announced a different id than it was launched as.
    #[error("plugin id mismatch: expected '{expected}', got '{actual}'")]
    PluginIdMismatch {
        /// Id the supervisor launched.
        expected: String,
        /// Id the process announced.
        actual: String,
    },
}

/// A framed, bidirectional plugin channel.
pub struct Transport {
    reader: FrameReader,
    writer: FrameWriter,
}

impl Transport {
    /// Wraps a pair of byte streams.
    pub fn new<R, W>(reader: R, writer: W, max_frame_bytes: usize) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let reader: BoxedReader = Box::new(reader);
        let writer: BoxedWriter = Box::new(writer);
        Self {
            reader: FramedRead::new(reader, FrameCodec::new(max_frame_bytes)),
            writer: FramedWrite::new(writer, FrameCodec::new(max_frame_bytes)),
        }
    }

    /// Sends one frame and flushes it.
    pub async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.writer.send(frame).await
    }

    /// Receives the next frame, or [`TransportError::Closed`] at end of stream.
    pub async fn recv(&mut self) -> Result<Frame, TransportError> {
        match self.reader.next().await {
            Some(frame) => frame,
            None => Err(TransportError::Closed),
        }
    }

    /// Splits into independent read and write halves.
    pub fn into_parts(self) -> (FrameReader, FrameWriter) {
        (self.reader, self.writer)
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}
