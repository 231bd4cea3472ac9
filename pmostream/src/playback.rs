//! Boundary between the engine and the external playback element.
//!
//! The engine assumes nothing about the element beyond four signals: an
//! opaque attach operation, readiness-to-append, append-completion, and the
//! playback lifecycle. Buffers are single-writer: the caller must not start
//! a second append before the previous one reported
//! [`BufferEvent::UpdateEnd`]. [`crate::BufferSegment`] enforces that
//! discipline.

use crate::error::{AppendError, PlaybackError};
use bytes::Bytes;
use tokio::sync::mpsc;

/// Opaque token the host uses to point the playback element at a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaHandle(u64);

impl MediaHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Events of one appendable buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferEvent {
    /// The buffer is attached to the element and accepts appends.
    Writable,
    /// The append started by the last `begin_append` finished.
    UpdateEnd,
}

/// Lifecycle events of the playback element itself.
///
/// "Is playing" must only ever be derived from these events, never flipped
/// optimistically: the element's own start can fail asynchronously after
/// being requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    Playing,
    Paused,
    /// The element consumed the currently attached media to its end.
    Ended,
    Error(String),
}

/// One append-only, single-writer media buffer.
pub trait PlaybackBuffer: Send {
    /// Starts an asynchronous append of `chunk`. Completion is reported as
    /// [`BufferEvent::UpdateEnd`] on the binding's event channel.
    ///
    /// `Bytes` is reference-counted; implementations clone it if they need
    /// to keep the data beyond this call.
    fn begin_append(&mut self, chunk: &Bytes) -> Result<(), AppendError>;

    /// Marks the end of the media stream. The element plays out what was
    /// appended and then emits [`PlayerEvent::Ended`]. Idempotent.
    fn close(&mut self);
}

/// A freshly created buffer plus everything needed to drive it.
pub struct BufferBinding {
    pub handle: MediaHandle,
    pub buffer: Box<dyn PlaybackBuffer>,
    pub events: mpsc::Receiver<BufferEvent>,
}

/// The external playback element (an `<audio>` tag, a renderer, a test
/// double). Exclusively owned by one coordinator; only one session may hold
/// write access to it at a time.
#[async_trait::async_trait]
pub trait PlaybackElement: Send + Sync {
    /// Creates a fresh appendable buffer. The buffer only becomes writable
    /// after [`PlaybackElement::attach`] is called with its handle.
    async fn create_buffer(&self) -> Result<BufferBinding, PlaybackError>;

    /// Points the element at the buffer identified by `handle`.
    async fn attach(&self, handle: &MediaHandle) -> Result<(), PlaybackError>;

    async fn play(&self) -> Result<(), PlaybackError>;

    async fn pause(&self) -> Result<(), PlaybackError>;

    /// Subscribes to the element's lifecycle events.
    fn subscribe(&self, tx: mpsc::Sender<PlayerEvent>);
}
