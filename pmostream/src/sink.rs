//! Buffer-sink manager.
//!
//! [`BufferSink`] serializes chunk delivery into the single-writer playback
//! buffer, absorbs backpressure, and survives capacity overflow by rotating
//! to a fresh buffer segment while losing no chunk. One `run` loop owns
//! every delivery path (network chunks, buffer events, host commands,
//! cancellation), so no two paths ever race into the same segment.
//!
//! Segment lifecycle as seen from the host:
//!
//! 1. The sink announces a segment exactly once with
//!    [`SinkEvent::SegmentReady`]; the host attaches the playback element to
//!    the carried handle.
//! 2. The element reports the buffer writable; queued chunks start flowing.
//! 3. On capacity overflow the overflowed buffer is closed (the element
//!    plays out what it already holds) and a successor is created, seeded
//!    with the failed chunk plus everything still queued, in original order.
//! 4. When the element finishes consuming the attached segment, the host
//!    feeds [`SinkCommand::SegmentExhausted`] back in and the next successor
//!    is announced.

use crate::error::{Result, StreamError};
use crate::playback::{BufferEvent, MediaHandle, PlaybackElement};
use crate::segment::{BufferSegment, SegmentError, SegmentStatus};
use bytes::Bytes;
use pmodiag::Diagnostics;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Events the sink emits toward the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    /// A new playback source is available; the host should attach the
    /// element to `handle`. Emitted exactly once per segment.
    SegmentReady { segment_id: u64, handle: MediaHandle },
}

/// Commands the host feeds back into the sink.
#[derive(Debug, Clone, Copy)]
pub enum SinkCommand {
    /// The element finished consuming the currently attached segment.
    SegmentExhausted,
}

/// Owns the active [`BufferSegment`] and its not-yet-activated successors.
pub struct BufferSink {
    element: Arc<dyn PlaybackElement>,
    diagnostics: Arc<dyn Diagnostics>,
    events_tx: mpsc::Sender<SinkEvent>,
    /// The announced segment; stays here (closed) after rotation until the
    /// element reports it exhausted.
    current: Option<BufferSegment>,
    successors: VecDeque<BufferSegment>,
    next_segment_id: u64,
    source_ended: bool,
    closed: bool,
}

impl BufferSink {
    pub fn new(
        element: Arc<dyn PlaybackElement>,
        diagnostics: Arc<dyn Diagnostics>,
        events_tx: mpsc::Sender<SinkEvent>,
    ) -> Self {
        Self {
            element,
            diagnostics,
            events_tx,
            current: None,
            successors: VecDeque::new(),
            next_segment_id: 0,
            source_ended: false,
            closed: false,
        }
    }

    /// Consumes `chunks` until the source ends and everything queued has
    /// been appended, a fatal error occurs, or `stop` is cancelled.
    ///
    /// Always releases every segment and reports the closing reason to
    /// Diagnostics before returning.
    pub async fn run(
        mut self,
        mut chunks: mpsc::Receiver<Bytes>,
        mut commands: mpsc::Receiver<SinkCommand>,
        stop: CancellationToken,
    ) -> Result<()> {
        let first = match self.new_segment().await {
            Ok(segment) => segment,
            Err(err) => {
                self.close(&format!("failed to open first segment: {err}"))
                    .await;
                return Err(err);
            }
        };
        if let Err(err) = self.announce(first).await {
            self.close("host disappeared before start").await;
            return Err(err);
        }

        let result = self.pump(&mut chunks, &mut commands, &stop).await;
        match &result {
            Ok(()) => self.close("stream ended").await,
            Err(err) => self.close(&format!("fatal: {err}")).await,
        }
        result
    }

    async fn pump(
        &mut self,
        chunks: &mut mpsc::Receiver<Bytes>,
        commands: &mut mpsc::Receiver<SinkCommand>,
        stop: &CancellationToken,
    ) -> Result<()> {
        loop {
            if self.finished() {
                return Ok(());
            }
            let source_ended = self.source_ended;
            tokio::select! {
                _ = stop.cancelled() => {
                    self.close("aborted").await;
                    return Ok(());
                }
                maybe_chunk = chunks.recv(), if !source_ended => match maybe_chunk {
                    Some(chunk) => self.on_chunk(chunk).await?,
                    None => {
                        // An aborted source also closes its channel; that
                        // must not be mistaken for natural end-of-stream.
                        if stop.is_cancelled() {
                            self.close("aborted").await;
                            return Ok(());
                        }
                        self.source_ended = true;
                        self.maybe_finish();
                    }
                },
                maybe_command = commands.recv() => match maybe_command {
                    Some(SinkCommand::SegmentExhausted) => self.on_segment_exhausted().await?,
                    // Command side gone: the session is being torn down.
                    None => return Ok(()),
                },
                maybe_event = Self::next_buffer_event(&mut self.current) => match maybe_event {
                    Some(event) => self.on_buffer_event(event).await?,
                    None => {
                        return Err(StreamError::BufferFatal(
                            "playback element dropped the buffer event feed".to_string(),
                        ));
                    }
                },
            }
        }
    }

    /// Resolves to the next event of the announced segment; pends forever
    /// when no segment is listening (closed or not yet announced).
    async fn next_buffer_event(current: &mut Option<BufferSegment>) -> Option<BufferEvent> {
        match current {
            Some(segment) if segment.status() != SegmentStatus::Closed => {
                segment.next_event().await
            }
            _ => std::future::pending().await,
        }
    }

    async fn on_chunk(&mut self, chunk: Bytes) -> Result<()> {
        if let Some(current) = self.current.as_mut() {
            if current.status() != SegmentStatus::Closed {
                return match current.push(chunk) {
                    Ok(()) => Ok(()),
                    Err(SegmentError::CapacityExceeded(id)) => self.rotate(id).await,
                    Err(SegmentError::Fatal { id, message }) => self.fatal(id, message).await,
                };
            }
        }

        // Post-rotation: the attached segment no longer accepts data, so new
        // chunks queue on the newest successor.
        if self.successors.is_empty() {
            let segment = self.new_segment().await?;
            self.successors.push_back(segment);
        }
        if let Some(successor) = self.successors.back_mut() {
            successor.enqueue(chunk);
        }
        Ok(())
    }

    async fn on_buffer_event(&mut self, event: BufferEvent) -> Result<()> {
        let Some(current) = self.current.as_mut() else {
            return Ok(());
        };
        let result = match event {
            BufferEvent::Writable => current.on_writable(),
            BufferEvent::UpdateEnd => current.on_update_end(),
        };
        match result {
            Ok(()) => {
                self.maybe_finish();
                Ok(())
            }
            Err(SegmentError::CapacityExceeded(id)) => self.rotate(id).await,
            Err(SegmentError::Fatal { id, message }) => self.fatal(id, message).await,
        }
    }

    /// Capacity overflow: replay everything unappended on a fresh segment.
    /// Not a user-facing failure.
    async fn rotate(&mut self, overflowed: u64) -> Result<()> {
        let replay = match self.current.as_mut() {
            Some(current) => current.take_pending(),
            None => VecDeque::new(),
        };
        tracing::warn!(
            segment = overflowed,
            replayed = replay.len(),
            "buffer capacity exceeded, rotating to a new segment"
        );
        let mut segment = self.new_segment().await?;
        segment.preload(replay);
        self.successors.push_back(segment);
        Ok(())
    }

    async fn on_segment_exhausted(&mut self) -> Result<()> {
        match self.current.as_ref() {
            Some(current) if current.status() != SegmentStatus::Closed => {
                // The element reported an end we did not produce; the
                // attached segment is still live, so there is nothing to
                // activate.
                tracing::debug!(
                    segment = current.id(),
                    "exhaustion signal for a live segment, ignored"
                );
                return Ok(());
            }
            _ => {}
        }
        self.current = None;
        match self.successors.pop_front() {
            Some(next) => self.announce(next).await,
            None => {
                tracing::debug!("playback exhausted with no successor queued");
                self.maybe_finish();
                Ok(())
            }
        }
    }

    async fn announce(&mut self, mut segment: BufferSegment) -> Result<()> {
        segment.mark_open();
        let event = SinkEvent::SegmentReady {
            segment_id: segment.id(),
            handle: segment.handle().clone(),
        };
        tracing::debug!(segment = segment.id(), "announcing new playback source");
        self.current = Some(segment);
        self.events_tx
            .send(event)
            .await
            .map_err(|_| StreamError::SinkClosed)
    }

    async fn new_segment(&mut self) -> Result<BufferSegment> {
        let binding = self.element.create_buffer().await?;
        let id = self.next_segment_id;
        self.next_segment_id += 1;
        tracing::debug!(segment = id, "created buffer segment");
        Ok(BufferSegment::new(id, binding))
    }

    async fn fatal(&mut self, segment: u64, message: String) -> Result<()> {
        self.diagnostics
            .report("BufferSink::append", &message)
            .await;
        Err(StreamError::BufferFatal(format!(
            "segment {segment}: {message}"
        )))
    }

    /// After the source ends, closes the attached buffer once its queue has
    /// fully drained and no successor is waiting; this tells the element the
    /// media stream is complete.
    fn maybe_finish(&mut self) {
        if !self.source_ended || !self.successors.is_empty() {
            return;
        }
        if let Some(current) = self.current.as_mut() {
            if current.is_drained() {
                current.close();
            }
        }
    }

    fn finished(&self) -> bool {
        self.source_ended
            && self.successors.is_empty()
            && self
                .current
                .as_ref()
                .map_or(true, |c| c.status() == SegmentStatus::Closed && c.pending_len() == 0)
    }

    /// Releases every segment. Idempotent; always reports to Diagnostics.
    async fn close(&mut self, reason: &str) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(mut current) = self.current.take() {
            current.close();
        }
        for mut segment in self.successors.drain(..) {
            segment.close();
        }
        tracing::debug!(reason, "buffer sink closed");
        self.diagnostics.report("BufferSink::close", reason).await;
    }
}
