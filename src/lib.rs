//! # yamux-stream: per-stream engine of a yamux-style multiplexer
//!
//! This crate implements the stream half of a yamux-style multiplexing
//! session: the state machine for one logical bidirectional byte stream
//! carried inside a shared secure connection. The session-level muxer —
//! frame parsing, the stream table, keepalive, GOAWAY — lives elsewhere and
//! talks to each stream through the narrow interfaces defined here.
//!
//! ## Architecture Overview
//!
//! ```text
//! yamux-stream/
//! ├── error        - unified error taxonomy for stream operations
//! ├── types        - ids, callback signatures, sizing configuration
//! ├── connection   - identity/address queries on the shared secure connection
//! └── stream
//!     ├── state    - the half-close-aware stream state machine
//!     ├── buffer   - inbound read buffer and outbound write queue
//!     └── feedback - muxer callback surface and ingress directives
//! ```
//!
//! ## Design Principles
//!
//! 1. **Pure State Machine**: No I/O, sockets, or timers. The stream
//!    consumes user calls and muxer ingress and produces frames and
//!    deferred callbacks through [`StreamFeedback`].
//!
//! 2. **Single-Threaded Cooperative**: Everything runs on the muxer's one
//!    execution context. There are no locks and no atomics; sharing is
//!    `Rc`-based, and deferred thunks hold `Weak` handles so a destroyed
//!    stream drops its callbacks instead of firing them.
//!
//! 3. **Deterministic Callback Discipline**: User callbacks never fire
//!    inside the call that scheduled them — every completion is routed
//!    through [`StreamFeedback::defer_call`] and runs in a later scheduler
//!    tick. Within one direction, callbacks fire in acceptance order.
//!
//! 4. **Credit-Based Flow Control**: Each direction carries a byte window.
//!    Outbound chunks are dequeued only against send-window credit granted
//!    by the peer; inbound bytes are policed against the receive window and
//!    credited back as the user consumes them.
//!
//! ## Usage Sketch
//!
//! ```rust,ignore
//! use yamux_stream::{Stream, StreamConfig};
//!
//! // The muxer creates one Stream per yamux stream id.
//! let stream = Stream::new(connection, feedback, stream_id, StreamConfig::default())?;
//!
//! // User side: queue a write; the callback fires once bytes hit the wire.
//! stream.borrow_mut().write(data, data.len(), Box::new(|res| { /* ... */ }));
//!
//! // Muxer side: route an inbound DATA frame and obey the directive.
//! match stream.borrow_mut().on_data_read(payload, fin, rst) {
//!     IngressDirective::Keep => {}
//!     IngressDirective::Remove => { /* drop from table */ }
//!     IngressDirective::RemoveAndSendRst => { /* drop and answer RST */ }
//! }
//! ```

#![forbid(unsafe_code)]

pub mod connection;
pub mod error;
pub mod stream;
pub mod types;

pub use connection::{Multiaddr, PeerId, SecureConnection};
pub use error::{Error, Result};
pub use stream::{IngressDirective, ReadBuffer, Stream, StreamFeedback, WriteQueue};
pub use types::{
    CloseCallback, DeferredCall, ReadCallback, StreamConfig, StreamId, StreamState,
    WriteCallback, DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAXIMUM_WINDOW_SIZE,
    DEFAULT_WRITE_QUEUE_LIMIT,
};
