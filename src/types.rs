//! Core types shared across the stream engine.
//!
//! Stream identifiers, callback signatures, and the per-stream sizing
//! configuration. All callbacks are one-shot boxed closures; the stream
//! invokes each accepted operation's callback exactly once, always through
//! the muxer's deferred-call scheduler.

#![forbid(unsafe_code)]

use bytes::BytesMut;

use crate::error::Result;

/// Stream identifier, unique within one connection. Always positive; the
/// muxer allocates odd/even ranges per side.
pub type StreamId = u32;

/// Initial per-stream window as given by the yamux specification (256 KiB).
pub const DEFAULT_INITIAL_WINDOW_SIZE: usize = 256 * 1024;

/// Default ceiling for window adjustment.
pub const DEFAULT_MAXIMUM_WINDOW_SIZE: usize = 1024 * 1024;

/// Default bound on buffered outbound bytes per stream.
pub const DEFAULT_WRITE_QUEUE_LIMIT: usize = 1024 * 1024;

/// Completion callback for `read` / `read_some`.
///
/// Receives the number of bytes delivered (or the failure) together with the
/// destination buffer handed to the read call. The buffer travels through
/// the callback because a pending read parks it inside the stream; if the
/// stream is reset while the read is outstanding, callback and buffer are
/// dropped together without firing.
pub type ReadCallback = Box<dyn FnOnce(Result<usize>, BytesMut)>;

/// Completion callback for `write` / `write_some`. Receives the number of
/// bytes committed to the wire, or the stream's close reason.
pub type WriteCallback = Box<dyn FnOnce(Result<usize>)>;

/// Completion callback for `close` and `adjust_window_size`.
pub type CloseCallback = Box<dyn FnOnce(Result<()>)>;

/// Thunk scheduled through [`StreamFeedback::defer_call`].
///
/// [`StreamFeedback::defer_call`]: crate::stream::StreamFeedback::defer_call
pub type DeferredCall = Box<dyn FnOnce()>;

/// Half-close state of a stream, derived from its direction flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Both directions open.
    Open,

    /// We sent FIN; reads may still deliver peer data.
    HalfClosedLocal,

    /// Peer sent FIN; we may still write.
    HalfClosedRemote,

    /// Terminal. All subsequent operations fail with the recorded reason.
    Closed,
}

/// Per-stream sizing limits supplied at construction.
///
/// Both windows start at `window_size`; `adjust_window_size` may grow the
/// receive window up to `maximum_window_size`. The write queue limit must
/// cover at least one full window so a sender blocked on credit can always
/// buffer what the window would admit.
#[derive(Debug, Clone, Copy)]
pub struct StreamConfig {
    /// Initial send and receive window, in bytes.
    pub window_size: usize,

    /// Ceiling for window adjustment, in bytes.
    pub maximum_window_size: usize,

    /// Maximum buffered outbound bytes, in bytes.
    pub write_queue_limit: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            maximum_window_size: DEFAULT_MAXIMUM_WINDOW_SIZE,
            write_queue_limit: DEFAULT_WRITE_QUEUE_LIMIT,
        }
    }
}

impl StreamConfig {
    /// Check the limits against each other.
    pub fn validate(&self) -> Result<()> {
        use crate::error::Error;

        if self.maximum_window_size == 0 || self.window_size > self.maximum_window_size {
            return Err(Error::InvalidWindowSize);
        }
        if self.write_queue_limit < self.maximum_window_size {
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }
}
