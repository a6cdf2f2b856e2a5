//! Per-stream data buffers.
//!
//! [`ReadBuffer`] stages inbound bytes between the wire and the user's read
//! calls; [`WriteQueue`] holds outbound chunks until send-window credit
//! admits them and the muxer confirms them written. Both are plain in-order
//! byte containers; reordering and framing live in the muxer.

#![forbid(unsafe_code)]

use std::collections::VecDeque;

use bytes::{Buf, Bytes};

use crate::types::WriteCallback;

// ============================================================================
// Read Buffer
// ============================================================================

/// Append-and-drain buffer for inbound stream data.
///
/// Bytes arriving while no read is pending are parked here; a later read
/// drains them front-first. Chunks are reference-counted slices of the
/// frames they arrived in, so parking is copy-free.
#[derive(Debug, Default)]
pub struct ReadBuffer {
    chunks: VecDeque<Bytes>,
    size: usize,
}

impl ReadBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently parked.
    pub fn len(&self) -> usize {
        self.size
    }

    /// True if nothing is parked.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Park a chunk at the back.
    pub fn add(&mut self, bytes: Bytes) {
        if !bytes.is_empty() {
            self.size += bytes.len();
            self.chunks.push_back(bytes);
        }
    }

    /// Drain up to `dst.len()` bytes into `dst`, front-first.
    ///
    /// Returns the number of bytes copied, which is zero when the buffer is
    /// empty.
    pub fn consume(&mut self, dst: &mut [u8]) -> usize {
        let mut copied = 0;
        while copied < dst.len() {
            let Some(chunk) = self.chunks.front_mut() else {
                break;
            };
            let n = chunk.len().min(dst.len() - copied);
            dst[copied..copied + n].copy_from_slice(&chunk[..n]);
            chunk.advance(n);
            copied += n;
            self.size -= n;
            if chunk.is_empty() {
                self.chunks.pop_front();
            }
        }
        copied
    }

    /// Append `src` and drain into `dst` in one step.
    ///
    /// When the buffer is empty this delivers straight from `src` to `dst`
    /// without parking, and only the undelivered tail of `src` (if any) is
    /// parked. Otherwise equivalent to `add` followed by `consume`.
    pub fn add_and_consume(&mut self, src: Bytes, dst: &mut [u8]) -> usize {
        if self.is_empty() {
            let n = src.len().min(dst.len());
            dst[..n].copy_from_slice(&src[..n]);
            if n < src.len() {
                self.add(src.slice(n..));
            }
            n
        } else {
            self.add(src);
            self.consume(dst)
        }
    }

    /// Discard everything.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.size = 0;
    }
}

// ============================================================================
// Write Queue
// ============================================================================

/// One chunk pulled out of the queue by [`WriteQueue::dequeue`].
#[derive(Debug)]
pub struct DequeuedChunk {
    /// The bytes to frame, at most the offered credit.
    pub data: Bytes,

    /// Whether the originating write accepts partial completion.
    pub some: bool,

    /// Credit left over after debiting this chunk.
    pub remaining_credit: usize,
}

struct WriteQueueEntry {
    data: Bytes,
    some: bool,
    cb: Option<WriteCallback>,
    /// Bytes of this entry handed to the framer so far.
    dequeued: usize,
    /// Bytes of this entry confirmed written so far. Never exceeds `dequeued`.
    acked: usize,
}

/// Bounded FIFO of outbound chunks awaiting window credit and wire
/// confirmation.
///
/// Every accepted entry produces exactly one callback invocation: with the
/// committed byte count once its bytes are confirmed written, or with the
/// stream's close reason through `broadcast`. `clear` is the one exception
/// and drops callbacks unfired; the stream only uses it after a reset, when
/// callbacks are forbidden anyway.
pub struct WriteQueue {
    limit: usize,
    /// Bytes enqueued and not yet released by entry completion.
    total: usize,
    entries: VecDeque<WriteQueueEntry>,
}

impl WriteQueue {
    /// Create a queue admitting at most `limit` pending bytes.
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            total: 0,
            entries: VecDeque::new(),
        }
    }

    /// True if `bytes` more can be accepted without exceeding the limit.
    pub fn can_enqueue(&self, bytes: usize) -> bool {
        self.total + bytes <= self.limit
    }

    /// Bytes currently held against the limit.
    pub fn pending_bytes(&self) -> usize {
        self.total
    }

    /// True if no entries are held.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry. The caller checks `can_enqueue` first.
    pub fn enqueue(&mut self, data: Bytes, some: bool, cb: WriteCallback) {
        self.total += data.len();
        self.entries.push_back(WriteQueueEntry {
            data,
            some,
            cb: Some(cb),
            dequeued: 0,
            acked: 0,
        });
    }

    /// Pull the next undelivered prefix, bounded by `credit` bytes.
    ///
    /// Returns `None` when the credit is exhausted or nothing remains to
    /// send. Successive calls continue where the previous slice ended, so a
    /// large entry drains across several window grants.
    pub fn dequeue(&mut self, credit: usize) -> Option<DequeuedChunk> {
        if credit == 0 {
            return None;
        }
        let entry = self.entries.iter_mut().find(|e| e.dequeued < e.data.len())?;
        let n = credit.min(entry.data.len() - entry.dequeued);
        let data = entry.data.slice(entry.dequeued..entry.dequeued + n);
        entry.dequeued += n;
        Some(DequeuedChunk {
            data,
            some: entry.some,
            remaining_credit: credit - n,
        })
    }

    /// Account `bytes` as committed to the wire, front-first.
    ///
    /// Returns the callbacks that completed, oldest first, each with its
    /// byte count: a whole-entry write completes when every byte of the
    /// entry is covered, a partial-tolerant write completes on the first
    /// ack covering everything dequeued from it so far (its undelivered
    /// tail is discarded). Returns `None` when `bytes` exceeds the total
    /// dequeued-but-unacked amount, which means the caller's accounting
    /// has diverged from ours.
    pub fn ack(&mut self, bytes: usize) -> Option<Vec<(WriteCallback, usize)>> {
        let outstanding: usize = self.entries.iter().map(|e| e.dequeued - e.acked).sum();
        if bytes > outstanding {
            return None;
        }

        let mut completed = Vec::new();
        let mut remaining = bytes;
        while remaining > 0 {
            let Some(entry) = self.entries.front_mut() else {
                break;
            };
            let n = remaining.min(entry.dequeued - entry.acked);
            if n == 0 {
                break;
            }
            entry.acked += n;
            remaining -= n;

            let done = if entry.some {
                entry.acked >= entry.dequeued
            } else {
                entry.acked == entry.data.len()
            };
            if done {
                if let Some(entry) = self.entries.pop_front() {
                    self.total -= entry.data.len();
                    if let Some(cb) = entry.cb {
                        completed.push((cb, entry.acked));
                    }
                }
            }
        }
        debug_assert_eq!(remaining, 0);
        Some(completed)
    }

    /// Hand each still-pending callback to `f`, oldest first, while `f`
    /// keeps returning true. Entries stay queued; only their callbacks are
    /// taken.
    pub fn broadcast(&mut self, mut f: impl FnMut(WriteCallback) -> bool) {
        for entry in self.entries.iter_mut() {
            if let Some(cb) = entry.cb.take() {
                if !f(cb) {
                    return;
                }
            }
        }
    }

    /// Discard all entries without invoking callbacks.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.total = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::error::Result;

    fn cb_slot() -> (Rc<RefCell<Option<Result<usize>>>>, WriteCallback) {
        let slot = Rc::new(RefCell::new(None));
        let out = slot.clone();
        (slot, Box::new(move |res| *out.borrow_mut() = Some(res)))
    }

    fn drop_cb() -> WriteCallback {
        Box::new(|_| {})
    }

    // ========================================================================
    // ReadBuffer Tests
    // ========================================================================

    #[test]
    fn test_read_buffer_new() {
        let buf = ReadBuffer::new();
        assert!(buf.is_empty());
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn test_read_buffer_add_and_drain() {
        let mut buf = ReadBuffer::new();
        buf.add(Bytes::from_static(b"hello"));
        assert_eq!(buf.len(), 5);

        let mut dst = [0u8; 16];
        let n = buf.consume(&mut dst);
        assert_eq!(n, 5);
        assert_eq!(&dst[..5], b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_read_buffer_partial_consume() {
        let mut buf = ReadBuffer::new();
        buf.add(Bytes::from_static(b"hello world"));

        let mut dst = [0u8; 5];
        assert_eq!(buf.consume(&mut dst), 5);
        assert_eq!(&dst, b"hello");
        assert_eq!(buf.len(), 6);

        let mut rest = [0u8; 16];
        assert_eq!(buf.consume(&mut rest), 6);
        assert_eq!(&rest[..6], b" world");
    }

    #[test]
    fn test_read_buffer_consume_spans_chunks() {
        let mut buf = ReadBuffer::new();
        buf.add(Bytes::from_static(b"ab"));
        buf.add(Bytes::from_static(b"cd"));
        buf.add(Bytes::from_static(b"ef"));

        let mut dst = [0u8; 5];
        assert_eq!(buf.consume(&mut dst), 5);
        assert_eq!(&dst, b"abcde");
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn test_read_buffer_consume_empty_returns_zero() {
        let mut buf = ReadBuffer::new();
        let mut dst = [0u8; 4];
        assert_eq!(buf.consume(&mut dst), 0);
    }

    #[test]
    fn test_read_buffer_empty_add_is_ignored() {
        let mut buf = ReadBuffer::new();
        buf.add(Bytes::new());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_read_buffer_add_and_consume_direct() {
        let mut buf = ReadBuffer::new();
        let mut dst = [0u8; 3];

        // Empty buffer: delivery bypasses parking, tail is parked.
        let n = buf.add_and_consume(Bytes::from_static(b"abcde"), &mut dst);
        assert_eq!(n, 3);
        assert_eq!(&dst, b"abc");
        assert_eq!(buf.len(), 2);

        let mut rest = [0u8; 4];
        assert_eq!(buf.consume(&mut rest), 2);
        assert_eq!(&rest[..2], b"de");
    }

    #[test]
    fn test_read_buffer_add_and_consume_preserves_order() {
        let mut buf = ReadBuffer::new();
        buf.add(Bytes::from_static(b"old"));

        let mut dst = [0u8; 4];
        let n = buf.add_and_consume(Bytes::from_static(b"new"), &mut dst);
        assert_eq!(n, 4);
        assert_eq!(&dst, b"oldn");
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_read_buffer_clear() {
        let mut buf = ReadBuffer::new();
        buf.add(Bytes::from_static(b"data"));
        buf.clear();
        assert!(buf.is_empty());
        let mut dst = [0u8; 4];
        assert_eq!(buf.consume(&mut dst), 0);
    }

    // ========================================================================
    // WriteQueue Tests
    // ========================================================================

    #[test]
    fn test_write_queue_enqueue_limit() {
        let mut q = WriteQueue::new(8);
        assert!(q.can_enqueue(8));
        assert!(!q.can_enqueue(9));

        q.enqueue(Bytes::from_static(b"AAAAAAAA"), false, drop_cb());
        assert_eq!(q.pending_bytes(), 8);
        assert!(!q.can_enqueue(1));
    }

    #[test]
    fn test_write_queue_dequeue_respects_credit() {
        let mut q = WriteQueue::new(64);
        q.enqueue(Bytes::from_static(b"abcdef"), false, drop_cb());

        let chunk = q.dequeue(3).unwrap();
        assert_eq!(&chunk.data[..], b"abc");
        assert!(!chunk.some);
        assert_eq!(chunk.remaining_credit, 0);

        // No credit, nothing comes out.
        assert!(q.dequeue(0).is_none());

        let chunk = q.dequeue(10).unwrap();
        assert_eq!(&chunk.data[..], b"def");
        assert_eq!(chunk.remaining_credit, 7);

        // Fully dequeued, nothing left to pull.
        assert!(q.dequeue(10).is_none());
    }

    #[test]
    fn test_write_queue_dequeue_fifo_across_entries() {
        let mut q = WriteQueue::new(64);
        q.enqueue(Bytes::from_static(b"first"), false, drop_cb());
        q.enqueue(Bytes::from_static(b"second"), false, drop_cb());

        let a = q.dequeue(16).unwrap();
        assert_eq!(&a.data[..], b"first");
        let b = q.dequeue(16).unwrap();
        assert_eq!(&b.data[..], b"second");
    }

    #[test]
    fn test_write_queue_ack_completes_whole_entry() {
        let mut q = WriteQueue::new(64);
        let (slot, cb) = cb_slot();
        q.enqueue(Bytes::from_static(b"abcdef"), false, cb);

        q.dequeue(3).unwrap();
        let done = q.ack(3).unwrap();
        assert!(done.is_empty());
        assert!(slot.borrow().is_none());

        q.dequeue(3).unwrap();
        let done = q.ack(3).unwrap();
        assert_eq!(done.len(), 1);
        for (cb, n) in done {
            cb(Ok(n));
        }
        assert_eq!(*slot.borrow(), Some(Ok(6)));
        assert_eq!(q.pending_bytes(), 0);
    }

    #[test]
    fn test_write_queue_ack_spans_entries() {
        let mut q = WriteQueue::new(64);
        q.enqueue(Bytes::from_static(b"ab"), false, drop_cb());
        q.enqueue(Bytes::from_static(b"cd"), false, drop_cb());
        q.dequeue(4).unwrap();
        q.dequeue(4).unwrap();

        let done = q.ack(4).unwrap();
        assert_eq!(done.len(), 2);
        assert!(q.is_empty());
    }

    #[test]
    fn test_write_queue_partial_entry_completes_on_covering_ack() {
        let mut q = WriteQueue::new(64);
        let (slot, cb) = cb_slot();
        q.enqueue(Bytes::from_static(b"abcdef"), true, cb);

        // Only a 4-byte prefix fits the window.
        let chunk = q.dequeue(4).unwrap();
        assert!(chunk.some);

        let done = q.ack(4).unwrap();
        assert_eq!(done.len(), 1);
        for (cb, n) in done {
            cb(Ok(n));
        }
        // Partial-tolerant write reports the covered prefix; the tail is
        // discarded with the entry.
        assert_eq!(*slot.borrow(), Some(Ok(4)));
        assert!(q.is_empty());
        assert_eq!(q.pending_bytes(), 0);
    }

    #[test]
    fn test_write_queue_ack_overshoot_rejected() {
        let mut q = WriteQueue::new(64);
        q.enqueue(Bytes::from_static(b"abcd"), false, drop_cb());
        q.dequeue(2).unwrap();

        // Only 2 bytes are outstanding; acking 3 is an accounting error.
        assert!(q.ack(3).is_none());

        // The failed ack must not have consumed anything.
        let done = q.ack(2).unwrap();
        assert!(done.is_empty());
    }

    #[test]
    fn test_write_queue_broadcast_stops_on_false() {
        let mut q = WriteQueue::new(64);
        q.enqueue(Bytes::from_static(b"a"), false, drop_cb());
        q.enqueue(Bytes::from_static(b"b"), false, drop_cb());
        q.enqueue(Bytes::from_static(b"c"), false, drop_cb());

        let mut seen = 0;
        q.broadcast(|_cb| {
            seen += 1;
            seen < 2
        });
        assert_eq!(seen, 2);

        // Callbacks already taken are not offered again.
        let mut second = 0;
        q.broadcast(|_cb| {
            second += 1;
            true
        });
        assert_eq!(second, 1);
    }

    #[test]
    fn test_write_queue_clear_drops_callbacks() {
        let mut q = WriteQueue::new(64);
        let (slot, cb) = cb_slot();
        q.enqueue(Bytes::from_static(b"abcd"), false, cb);
        q.clear();

        assert!(q.is_empty());
        assert_eq!(q.pending_bytes(), 0);
        assert!(slot.borrow().is_none());
        assert!(q.can_enqueue(64));
    }
}
