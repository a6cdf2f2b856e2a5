//! Error types for stream operations.

use thiserror::Error;

/// Stream-level errors surfaced through operation callbacks.
///
/// Once a terminal condition records itself as the stream's close reason,
/// every later operation on that stream fails with the recorded value.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Malformed user call (zero length, buffer smaller than claimed size).
    #[error("invalid argument")]
    InvalidArgument,

    /// A read was issued while another read is still pending.
    #[error("stream already has a pending read")]
    StreamIsReading,

    /// Read on a direction the remote has half-closed.
    #[error("stream is not readable")]
    StreamNotReadable,

    /// Write on a direction closed locally.
    #[error("stream is not writable")]
    StreamNotWritable,

    /// The write queue cannot accept the new chunk.
    #[error("stream write buffer overflow")]
    StreamWriteBufferOverflow,

    /// Window adjustment outside the permitted bounds.
    #[error("invalid window size")]
    InvalidWindowSize,

    /// The peer sent more data than its credit allows; fatal for the stream.
    #[error("receive window overflow")]
    ReceiveWindowOverflow,

    /// Clean local close. Surfaces as success to the close callback and as
    /// an error to any read or write still outstanding.
    #[error("stream closed by host")]
    StreamClosedByHost,

    /// Abortive close initiated locally.
    #[error("stream reset by host")]
    StreamResetByHost,

    /// Abortive close initiated by the peer.
    #[error("stream reset by peer")]
    StreamResetByPeer,

    /// Write accounting invariants broken.
    #[error("internal error")]
    InternalError,

    /// The underlying connection is gone.
    #[error("connection closed")]
    ConnectionClosed,
}

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;
