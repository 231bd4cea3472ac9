//! Error taxonomy of the streaming engine.
//!
//! Only session-fatal conditions become [`StreamError`]. Capacity overflow
//! is recoverable (the sink rotates segments) and therefore stays inside
//! [`AppendError`]; cancellation is not an error at all.

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, StreamError>;

/// Fatal errors that end a streaming session.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Opening or reading the network stream failed.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The remote answered with a non-success status.
    #[error("HTTP status {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// The playback buffer rejected an append for a reason other than capacity.
    #[error("playback buffer failure: {0}")]
    BufferFatal(String),

    /// The playback element could not hand out or attach a buffer.
    #[error("playback element failure: {0}")]
    Playback(#[from] PlaybackError),

    /// The consuming side of the engine disappeared mid-stream.
    #[error("chunk consumer closed")]
    SinkClosed,
}

/// Outcome of starting an append on a playback buffer.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AppendError {
    /// The buffer is full; the owning segment must rotate. Recoverable.
    #[error("buffer capacity exceeded")]
    CapacityExceeded,

    /// Any other append failure. Fatal for the session.
    #[error("append failed: {0}")]
    Fatal(String),
}

/// Failures surfaced by the external playback element.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlaybackError {
    /// An asynchronous play request was pre-empted by a racing stop.
    #[error("play request interrupted")]
    Interrupted,

    /// No media is attached to the element.
    #[error("no media attached")]
    Detached,

    #[error("playback element error: {0}")]
    Failed(String),
}
