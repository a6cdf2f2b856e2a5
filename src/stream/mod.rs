//! Stream layer: the per-stream state machine and its data buffers.
//!
//! - [`Stream`] — half-close-aware read/write engine, one per logical stream
//! - [`ReadBuffer`] / [`WriteQueue`] — inbound staging and outbound queueing
//! - [`StreamFeedback`] / [`IngressDirective`] — the muxer seam

pub mod buffer;
pub mod feedback;
pub mod state;


pub use buffer::{DequeuedChunk, ReadBuffer, WriteQueue};
pub use feedback::{IngressDirective, StreamFeedback};
pub use state::Stream;
