//! Muxer-facing surface of a stream.
//!
//! The stream produces effects (frames to emit, callbacks to schedule) by
//! calling into the muxer through [`StreamFeedback`], and reports the fate
//! of each inbound data frame back to the muxer as an [`IngressDirective`].
//! This is the seam that keeps the state machine free of framing, stream
//! tables, and I/O.

use bytes::Bytes;

use crate::types::{DeferredCall, StreamId};

/// Callback surface the muxer implements for its streams.
///
/// All methods are invoked from within stream operations on the session's
/// single execution context; implementations must not call back into the
/// stream synchronously.
pub trait StreamFeedback {
    /// Hand a chunk of outbound stream data to the framer.
    ///
    /// The chunk has already been debited from the stream's send window.
    /// The muxer must report the bytes back through `on_data_written` once
    /// the frame has been committed to the wire.
    fn write_stream_data(&self, stream_id: StreamId, data: Bytes, some: bool);

    /// Schedule a WINDOW_UPDATE advancing the peer's send window by `bytes`.
    fn ack_received_bytes(&self, stream_id: StreamId, bytes: usize);

    /// Emit a FIN frame: the local side will send no more data.
    fn stream_closed(&self, stream_id: StreamId);

    /// Emit a RST frame and evict the stream from the session table.
    fn reset_stream(&self, stream_id: StreamId);

    /// Run `thunk` in a future scheduler tick on the same context.
    ///
    /// Every user-visible callback funnels through here so that no user
    /// code ever runs inside the stream call that scheduled it. Thunks must
    /// run in scheduling order.
    fn defer_call(&self, thunk: DeferredCall);
}

/// What the muxer should do with a stream after feeding it inbound data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngressDirective {
    /// Stream stays in the session table.
    Keep,

    /// Remove the stream; no further frames for it are expected.
    Remove,

    /// Remove the stream and answer the peer with RST.
    RemoveAndSendRst,
}
