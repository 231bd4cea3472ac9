//! Streaming/buffering engine for incremental web-radio playback.
//!
//! Shepherds bytes from a remote broadcast into an appendable, single-writer
//! playback buffer without waiting for the whole file:
//!
//! - [`ChunkSource`] pulls the remote stream chunk-by-chunk and supports
//!   cooperative cancellation.
//! - [`BufferSegment`] mediates append access to one playback buffer and
//!   absorbs backpressure in a FIFO queue.
//! - [`BufferSink`] owns the sequence of segments, rotates to a fresh
//!   segment when the buffer capacity is exceeded (losing no chunk), and
//!   announces each segment to the host exactly once.
//!
//! The engine does not decode audio and holds no playback UI state. It talks
//! to the outside world through the [`PlaybackElement`] boundary and reports
//! failures through an injected [`pmodiag::Diagnostics`].

pub mod error;
pub mod playback;
pub mod segment;
pub mod sink;
pub mod source;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use error::{AppendError, PlaybackError, Result, StreamError};
pub use playback::{
    BufferBinding, BufferEvent, MediaHandle, PlaybackBuffer, PlaybackElement, PlayerEvent,
};
pub use segment::{BufferSegment, SegmentError, SegmentStatus};
pub use sink::{BufferSink, SinkCommand, SinkEvent};
pub use source::{ChunkSource, SourceConfig};
