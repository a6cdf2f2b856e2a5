//! Per-stream state machine.
//!
//! Pure state machine — accepts user calls and muxer ingress, produces
//! frames and deferred callbacks through [`StreamFeedback`]. One instance
//! mediates a single logical bidirectional byte stream: it enforces the
//! per-direction flow-control window, parks at most one user read while
//! data is outstanding, queues writes against send-window credit, and
//! walks the half-close lifecycle (local FIN, remote FIN, RST, overflow)
//! to a single recorded close reason.

#![forbid(unsafe_code)]

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use bytes::{Bytes, BytesMut};
use tracing::{debug, error, trace};

use crate::connection::{Multiaddr, PeerId, SecureConnection};
use crate::error::{Error, Result};
use crate::stream::buffer::{ReadBuffer, WriteQueue};
use crate::stream::feedback::{IngressDirective, StreamFeedback};
use crate::types::{
    CloseCallback, ReadCallback, StreamConfig, StreamId, StreamState, WriteCallback,
};

/// A user read waiting for inbound data.
struct PendingRead {
    /// Destination buffer, returned through the callback.
    out: BytesMut,
    /// Bytes the caller asked for; delivery happens into `out[..wanted]`.
    wanted: usize,
    /// Bytes delivered so far.
    filled: usize,
    /// True for `read_some`: any delivery completes the read.
    some: bool,
    cb: ReadCallback,
}

/// A latched `adjust_window_size` completion.
struct WindowAdjust {
    /// Completes once the receive window has re-advanced to this value.
    target: usize,
    cb: CloseCallback,
}

/// One logical bidirectional byte stream multiplexed on a shared secure
/// connection.
///
/// Constructed by the muxer via [`Stream::new`], which returns the shared
/// handle the session table holds. All operations run on the session's
/// single execution context; completion callbacks never fire inside the
/// call that scheduled them but in a later tick of the muxer's deferred-call
/// scheduler, and are silently dropped once the stream is reset.
pub struct Stream {
    connection: Rc<dyn SecureConnection>,
    feedback: Rc<dyn StreamFeedback>,
    stream_id: StreamId,

    /// Bytes the peer currently permits us to send.
    send_window: usize,
    /// Bytes we currently permit the peer to send.
    receive_window: usize,
    /// Ceiling for window adjustment.
    maximum_window: usize,

    is_readable: bool,
    is_writable: bool,
    /// Set once FIN has been handed to the muxer.
    fin_sent: bool,
    /// Set by reset; from then on no user callback may fire.
    no_more_callbacks: bool,
    /// Write-once terminal reason. `None` means the stream is open.
    close_reason: Option<Error>,

    read_buffer: ReadBuffer,
    write_queue: WriteQueue,
    pending_read: Option<PendingRead>,
    close_cb: Option<CloseCallback>,
    window_adjust: Option<WindowAdjust>,

    /// Handed to deferred thunks so a destroyed stream drops its callbacks.
    weak_self: Weak<RefCell<Stream>>,
}

impl Stream {
    /// Create a stream with both windows at `config.window_size`.
    ///
    /// Fails with [`Error::InvalidArgument`] for a zero stream id and with
    /// the config's own validation error for inconsistent limits.
    pub fn new(
        connection: Rc<dyn SecureConnection>,
        feedback: Rc<dyn StreamFeedback>,
        stream_id: StreamId,
        config: StreamConfig,
    ) -> Result<Rc<RefCell<Stream>>> {
        if stream_id == 0 {
            return Err(Error::InvalidArgument);
        }
        config.validate()?;

        Ok(Rc::new_cyclic(|weak| {
            RefCell::new(Stream {
                connection,
                feedback,
                stream_id,
                send_window: config.window_size,
                receive_window: config.window_size,
                maximum_window: config.maximum_window_size,
                is_readable: true,
                is_writable: true,
                fin_sent: false,
                no_more_callbacks: false,
                close_reason: None,
                read_buffer: ReadBuffer::new(),
                write_queue: WriteQueue::new(config.write_queue_limit),
                pending_read: None,
                close_cb: None,
                window_adjust: None,
                weak_self: weak.clone(),
            })
        }))
    }

    // ========================================================================
    // User-facing API
    // ========================================================================

    /// Read exactly `n` bytes into `out`.
    ///
    /// Completes once `n` bytes have been delivered, or with the failure
    /// that prevented delivery. `out` travels back through the callback.
    pub fn read(&mut self, out: BytesMut, n: usize, cb: ReadCallback) {
        self.do_read(out, n, cb, false);
    }

    /// Read between 1 and `n` bytes into `out`.
    pub fn read_some(&mut self, out: BytesMut, n: usize, cb: ReadCallback) {
        self.do_read(out, n, cb, true);
    }

    /// Write exactly the first `n` bytes of `data`.
    ///
    /// The callback fires with `n` once every byte has been committed to
    /// the wire, or with the failure that stopped it.
    pub fn write(&mut self, data: Bytes, n: usize, cb: WriteCallback) {
        self.do_write(data, n, cb, false);
    }

    /// Write up to the first `n` bytes of `data`, tolerating partial
    /// completion under send-window pressure.
    pub fn write_some(&mut self, data: Bytes, n: usize, cb: WriteCallback) {
        self.do_write(data, n, cb, true);
    }

    /// Close the local write direction.
    ///
    /// Queued writes drain first; FIN goes out once the queue is empty.
    /// `cb` fires when the stream reaches the fully closed state: with
    /// success if the cause was this clean local close, otherwise with the
    /// recorded close reason. A second call replaces a previously installed
    /// callback.
    pub fn close(&mut self, cb: Option<CloseCallback>) {
        self.close_cb = cb;

        if self.is_closed() {
            if self.close_cb.is_some() {
                self.defer_close_completed();
            }
            return;
        }

        if self.is_writable {
            self.is_writable = false;
            // FIN follows the drained data.
            self.drain_write_queue();
        }
    }

    /// Terminate the stream unilaterally.
    ///
    /// Both directions close, every stored callback is dropped without
    /// firing, buffers are discarded, and the muxer emits RST.
    pub fn reset(&mut self) {
        self.is_readable = false;
        self.is_writable = false;
        self.no_more_callbacks = true;
        if self.close_reason.is_none() {
            self.close_reason = Some(Error::StreamResetByHost);
        }
        self.write_queue.clear();
        self.read_buffer.clear();
        self.pending_read = None;
        self.window_adjust = None;
        self.close_cb = None;
        self.feedback.reset_stream(self.stream_id);
    }

    /// Grow the receive window to `new_size`, granting the peer the delta.
    ///
    /// `cb` latches until the window counter has re-advanced to
    /// `new_size` (or completes with the close reason if the stream dies
    /// first). A repeated call replaces a still-latched callback.
    pub fn adjust_window_size(&mut self, new_size: usize, cb: Option<CloseCallback>) {
        if self.close_reason.is_some()
            || new_size > self.maximum_window
            || new_size < self.receive_window
        {
            if let Some(cb) = cb {
                let res = match self.close_reason {
                    Some(reason) => Err(reason),
                    None => Err(Error::InvalidWindowSize),
                };
                self.defer_result_callback(res, cb);
            }
            return;
        }

        let delta = new_size - self.receive_window;
        if delta > 0 {
            self.feedback.ack_received_bytes(self.stream_id, delta);
        }
        if let Some(cb) = cb {
            self.window_adjust = Some(WindowAdjust {
                target: new_size,
                cb,
            });
            self.check_window_adjust();
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Stream identifier within its connection.
    pub fn id(&self) -> StreamId {
        self.stream_id
    }

    /// True once a close reason has been recorded.
    pub fn is_closed(&self) -> bool {
        self.close_reason.is_some()
    }

    /// True if the remote half-closed or the stream is closed.
    pub fn is_closed_for_read(&self) -> bool {
        !self.is_readable
    }

    /// True if the local side half-closed or the stream is closed.
    pub fn is_closed_for_write(&self) -> bool {
        !self.is_writable
    }

    /// Half-close state derived from the direction flags.
    pub fn state(&self) -> StreamState {
        if self.close_reason.is_some() {
            return StreamState::Closed;
        }
        match (self.is_readable, self.is_writable) {
            (true, true) => StreamState::Open,
            (true, false) => StreamState::HalfClosedLocal,
            (false, true) => StreamState::HalfClosedRemote,
            (false, false) => StreamState::Closed,
        }
    }

    /// Identity of the remote peer, per the underlying connection.
    pub fn remote_peer_id(&self) -> Result<PeerId> {
        self.connection.remote_peer()
    }

    /// Whether the local side initiated the underlying connection.
    pub fn is_initiator(&self) -> Result<bool> {
        self.connection.is_initiator()
    }

    /// Local address of the underlying connection.
    pub fn local_multiaddr(&self) -> Result<Multiaddr> {
        self.connection.local_multiaddr()
    }

    /// Remote address of the underlying connection.
    pub fn remote_multiaddr(&self) -> Result<Multiaddr> {
        self.connection.remote_multiaddr()
    }

    #[cfg(test)]
    pub(crate) fn send_window(&self) -> usize {
        self.send_window
    }

    #[cfg(test)]
    pub(crate) fn receive_window(&self) -> usize {
        self.receive_window
    }

    // ========================================================================
    // Muxer-facing ingress
    // ========================================================================

    /// Feed inbound stream data (and/or FIN / RST flags) from the wire.
    ///
    /// Delivers into a pending read when one is installed, parks the rest,
    /// polices the receive window, and walks the half-close transitions.
    /// The directive tells the muxer whether to keep the stream in its
    /// table and whether to answer with RST.
    pub fn on_data_read(&mut self, bytes: Bytes, fin: bool, rst: bool) -> IngressDirective {
        let size = bytes.len();
        trace!(
            "stream {}: {} inbound bytes (fin={}, rst={})",
            self.stream_id,
            size,
            fin,
            rst
        );

        let mut overflow = false;
        let mut bytes_consumed = 0;

        if size > 0 {
            if let Some(mut pending) = self.pending_read.take() {
                debug_assert!(self.read_buffer.is_empty());

                bytes_consumed = self
                    .read_buffer
                    .add_and_consume(bytes, &mut pending.out[pending.filled..pending.wanted]);
                pending.filled += bytes_consumed;

                if pending.some || pending.filled == pending.wanted {
                    let count = pending.filled;
                    self.defer_read_callback(Ok(count), pending.out, pending.cb);
                } else {
                    self.pending_read = Some(pending);
                }
            } else {
                self.read_buffer.add(bytes);
            }

            let external = self
                .pending_read
                .as_ref()
                .map_or(0, |p| p.wanted - p.filled);
            overflow = self.receive_window < self.read_buffer.len() + external;
        }

        if self.is_closed() {
            return IngressDirective::RemoveAndSendRst;
        }

        if rst {
            self.do_close(Error::StreamResetByPeer, false);
            return IngressDirective::Remove;
        }

        if fin {
            self.is_readable = false;
            if !self.is_writable {
                self.do_close(Error::StreamClosedByHost, false);
                return IngressDirective::Remove;
            }
            return IngressDirective::Keep;
        }

        if overflow {
            self.do_close(Error::ReceiveWindowOverflow, false);
            return IngressDirective::RemoveAndSendRst;
        }

        if bytes_consumed > 0 {
            self.feedback.ack_received_bytes(self.stream_id, bytes_consumed);
            self.grow_receive_window(bytes_consumed);
        }

        IngressDirective::Keep
    }

    /// The muxer confirms `bytes` previously dequeued have been framed and
    /// handed to the wire.
    pub fn on_data_written(&mut self, bytes: usize) {
        match self.write_queue.ack(bytes) {
            Some(completed) => {
                for (cb, count) in completed {
                    self.defer_write_callback(Ok(count), cb);
                }
            }
            None => {
                error!(
                    "stream {}: write ack of {} bytes does not match outstanding data",
                    self.stream_id, bytes
                );
                self.feedback.reset_stream(self.stream_id);
                self.do_close(Error::InternalError, true);
            }
        }
    }

    /// The peer granted `delta` more bytes of send credit.
    pub fn increase_send_window(&mut self, delta: usize) {
        self.send_window += delta;
        trace!(
            "stream {}: send window grew by {} to {}",
            self.stream_id,
            delta,
            self.send_window
        );
        self.drain_write_queue();
    }

    /// The session is dying; fail everything with its reason.
    pub fn closed_by_connection(&mut self, reason: Error) {
        self.do_close(reason, true);
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn do_read(&mut self, mut out: BytesMut, n: usize, cb: ReadCallback, some: bool) {
        if n == 0 || out.is_empty() || out.len() < n {
            return self.defer_read_callback(Err(Error::InvalidArgument), out, cb);
        }

        // Parked bytes are drainable even on a closed stream.
        let available = self.read_buffer.len();
        if available >= n || (some && available > 0) {
            let consumed = self.read_buffer.consume(&mut out[..n]);
            debug_assert!(consumed > 0);
            if self.is_readable {
                self.feedback.ack_received_bytes(self.stream_id, consumed);
                self.grow_receive_window(consumed);
            }
            return self.defer_read_callback(Ok(consumed), out, cb);
        }

        if let Some(reason) = self.close_reason {
            return self.defer_read_callback(Err(reason), out, cb);
        }

        if self.pending_read.is_some() {
            return self.defer_read_callback(Err(Error::StreamIsReading), out, cb);
        }

        if !self.is_readable {
            // Remote half-closed and nothing left to drain.
            return self.defer_read_callback(Err(Error::StreamNotReadable), out, cb);
        }

        let mut pending = PendingRead {
            out,
            wanted: n,
            filled: 0,
            some,
            cb,
        };
        if available > 0 {
            let consumed = self.read_buffer.consume(&mut pending.out[..n]);
            pending.filled = consumed;
            self.feedback.ack_received_bytes(self.stream_id, consumed);
            self.grow_receive_window(consumed);
        }
        self.pending_read = Some(pending);
    }

    fn do_write(&mut self, data: Bytes, n: usize, cb: WriteCallback, some: bool) {
        if n == 0 || data.is_empty() || data.len() < n {
            return self.defer_write_callback(Err(Error::InvalidArgument), cb);
        }

        if !self.is_writable {
            return self.defer_write_callback(Err(Error::StreamNotWritable), cb);
        }

        if let Some(reason) = self.close_reason {
            return self.defer_write_callback(Err(reason), cb);
        }

        if !self.write_queue.can_enqueue(n) {
            return self.defer_write_callback(Err(Error::StreamWriteBufferOverflow), cb);
        }

        self.write_queue.enqueue(data.slice(..n), some, cb);
        self.drain_write_queue();
    }

    /// Pull chunks from the write queue while send-window credit lasts and
    /// hand them to the framer. Once the local side is closed for writes
    /// and the queue has drained, emit FIN exactly once.
    fn drain_write_queue(&mut self) {
        while self.close_reason.is_none() {
            let Some(chunk) = self.write_queue.dequeue(self.send_window) else {
                break;
            };
            self.send_window = chunk.remaining_credit;
            trace!(
                "stream {}: {} bytes to connection, send window now {}",
                self.stream_id,
                chunk.data.len(),
                self.send_window
            );
            self.feedback
                .write_stream_data(self.stream_id, chunk.data, chunk.some);
        }

        // Leftover credit means the queue yielded everything it had.
        if !self.is_writable && !self.fin_sent && self.close_reason.is_none() && self.send_window > 0
        {
            self.fin_sent = true;
            self.feedback.stream_closed(self.stream_id);

            if !self.is_readable {
                self.do_close(Error::StreamClosedByHost, false);
            } else {
                // No reader will drain further credit; open the window fully
                // so the peer's remaining bytes and FIN are still accepted.
                self.receive_window = self.maximum_window;
                self.check_window_adjust();
            }
        }
    }

    /// Shared teardown. Records the reason (first writer wins), fails the
    /// pending read, completes the close callback, fails the latched window
    /// adjustment, and walks the write queue's callbacks oldest-first.
    fn do_close(&mut self, reason: Error, clear_read_side: bool) {
        let reason = match self.close_reason {
            Some(recorded) => recorded,
            None => {
                self.close_reason = Some(reason);
                reason
            }
        };
        self.is_readable = false;
        self.is_writable = false;

        if clear_read_side {
            self.read_buffer.clear();
        }
        if let Some(pending) = self.pending_read.take() {
            self.defer_read_callback(Err(reason), pending.out, pending.cb);
        }

        if self.close_cb.is_some() {
            self.defer_close_completed();
        }

        if let Some(adjust) = self.window_adjust.take() {
            self.defer_result_callback(Err(reason), adjust.cb);
        }

        if !self.no_more_callbacks {
            let mut failed = Vec::new();
            self.write_queue.broadcast(|cb| {
                failed.push(cb);
                true
            });
            self.write_queue.clear();
            for cb in failed {
                if self.no_more_callbacks {
                    break;
                }
                self.defer_write_callback(Err(reason), cb);
            }
        }
    }

    /// Advance the receive window for ACKed bytes, bounded by the ceiling.
    fn grow_receive_window(&mut self, bytes: usize) {
        self.receive_window = (self.receive_window + bytes).min(self.maximum_window);
        self.check_window_adjust();
    }

    fn check_window_adjust(&mut self) {
        let reached = self
            .window_adjust
            .as_ref()
            .is_some_and(|adjust| self.receive_window >= adjust.target);
        if reached {
            if let Some(adjust) = self.window_adjust.take() {
                self.defer_result_callback(Ok(()), adjust.cb);
            }
        }
    }

    fn take_close_completion(&mut self) -> Option<(CloseCallback, Result<()>)> {
        let reason = match self.close_reason {
            Some(reason) => reason,
            None => {
                self.close_reason = Some(Error::StreamClosedByHost);
                Error::StreamClosedByHost
            }
        };
        let cb = self.close_cb.take()?;
        let res = if reason == Error::StreamClosedByHost {
            Ok(())
        } else {
            Err(reason)
        };
        Some((cb, res))
    }

    // ========================================================================
    // Deferred-callback trampolines
    // ========================================================================

    fn defer_read_callback(&self, res: Result<usize>, out: BytesMut, cb: ReadCallback) {
        if self.no_more_callbacks {
            debug!("stream {}: reset locally, dropping read callback", self.stream_id);
            return;
        }
        let stream = self.weak_self.clone();
        self.feedback.defer_call(Box::new(move || {
            let alive = stream
                .upgrade()
                .is_some_and(|s| !s.borrow().no_more_callbacks);
            if alive {
                cb(res, out);
            }
        }));
    }

    fn defer_write_callback(&self, res: Result<usize>, cb: WriteCallback) {
        if self.no_more_callbacks {
            debug!("stream {}: reset locally, dropping write callback", self.stream_id);
            return;
        }
        let stream = self.weak_self.clone();
        self.feedback.defer_call(Box::new(move || {
            let alive = stream
                .upgrade()
                .is_some_and(|s| !s.borrow().no_more_callbacks);
            if alive {
                cb(res);
            }
        }));
    }

    fn defer_result_callback(&self, res: Result<()>, cb: CloseCallback) {
        if self.no_more_callbacks {
            debug!("stream {}: reset locally, dropping callback", self.stream_id);
            return;
        }
        let stream = self.weak_self.clone();
        self.feedback.defer_call(Box::new(move || {
            let alive = stream
                .upgrade()
                .is_some_and(|s| !s.borrow().no_more_callbacks);
            if alive {
                cb(res);
            }
        }));
    }

    /// Schedule the close callback. The completion status is computed at
    /// fire time so it reflects the reason recorded by then.
    fn defer_close_completed(&self) {
        if self.no_more_callbacks {
            return;
        }
        let stream = self.weak_self.clone();
        self.feedback.defer_call(Box::new(move || {
            let completion = stream.upgrade().and_then(|s| {
                let mut inner = s.borrow_mut();
                if inner.no_more_callbacks {
                    None
                } else {
                    inner.take_close_completion()
                }
            });
            if let Some((cb, res)) = completion {
                cb(res);
            }
        }));
    }
}
