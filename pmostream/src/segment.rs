//! Single-writer discipline around one appendable playback buffer.
//!
//! A [`BufferSegment`] is an explicit finite-state object: at most one
//! append is in flight per segment at any time, chunks that cannot be
//! appended yet wait in a FIFO queue, and a capacity overflow closes the
//! segment while preserving every unappended chunk for replay on a
//! successor.

use crate::error::AppendError;
use crate::playback::{BufferBinding, BufferEvent, MediaHandle, PlaybackBuffer};
use bytes::Bytes;
use std::collections::VecDeque;
use tokio::sync::mpsc;

/// Lifecycle of one buffer segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentStatus {
    /// Buffer handle exists but has not been announced to the host yet.
    Created,
    /// Announced; waiting for the element to report the buffer writable.
    Open,
    /// One append is in flight.
    Appending,
    /// Writable, with no append in flight.
    Idle,
    /// Superseded by rotation or released; accepts no appends.
    Closed,
}

/// Errors a segment surfaces to its sink.
#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    /// The buffer rejected an append because it is full. Recoverable by
    /// rotating to a successor: the chunk that failed is preserved at the
    /// head of the pending queue.
    #[error("segment {0} exceeded its buffer capacity")]
    CapacityExceeded(u64),

    /// Any other append failure. Fatal for the session.
    #[error("segment {id} append failed: {message}")]
    Fatal { id: u64, message: String },
}

/// One appendable playback buffer plus its pending-chunk queue.
pub struct BufferSegment {
    id: u64,
    handle: MediaHandle,
    buffer: Box<dyn PlaybackBuffer>,
    events: mpsc::Receiver<BufferEvent>,
    pending: VecDeque<Bytes>,
    status: SegmentStatus,
}

impl BufferSegment {
    pub(crate) fn new(id: u64, binding: BufferBinding) -> Self {
        Self {
            id,
            handle: binding.handle,
            buffer: binding.buffer,
            events: binding.events,
            pending: VecDeque::new(),
            status: SegmentStatus::Created,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn handle(&self) -> &MediaHandle {
        &self.handle
    }

    pub fn status(&self) -> SegmentStatus {
        self.status
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Marks the segment as announced to the host.
    pub(crate) fn mark_open(&mut self) {
        if self.status == SegmentStatus::Created {
            self.status = SegmentStatus::Open;
        }
    }

    /// Receives the next buffer event. Driven by the sink's select loop.
    pub(crate) async fn next_event(&mut self) -> Option<BufferEvent> {
        self.events.recv().await
    }

    /// Queues one chunk without attempting an append. Never drops.
    pub(crate) fn enqueue(&mut self, chunk: Bytes) {
        self.pending.push_back(chunk);
    }

    /// Accepts one chunk: appends immediately when idle, queues otherwise.
    pub(crate) fn push(&mut self, chunk: Bytes) -> Result<(), SegmentError> {
        match self.status {
            SegmentStatus::Idle => self.start_append(chunk),
            _ => {
                self.enqueue(chunk);
                Ok(())
            }
        }
    }

    /// The element reported the buffer attached and writable. Only valid
    /// before the first append; a spurious repeat while an append is in
    /// flight must not start a second one.
    pub(crate) fn on_writable(&mut self) -> Result<(), SegmentError> {
        if !matches!(self.status, SegmentStatus::Created | SegmentStatus::Open) {
            return Ok(());
        }
        self.status = SegmentStatus::Idle;
        self.flush_next()
    }

    /// The append started earlier finished; feed the next queued chunk.
    pub(crate) fn on_update_end(&mut self) -> Result<(), SegmentError> {
        if self.status == SegmentStatus::Closed {
            return Ok(());
        }
        self.status = SegmentStatus::Idle;
        self.flush_next()
    }

    fn flush_next(&mut self) -> Result<(), SegmentError> {
        match self.pending.pop_front() {
            Some(chunk) => self.start_append(chunk),
            None => Ok(()),
        }
    }

    fn start_append(&mut self, chunk: Bytes) -> Result<(), SegmentError> {
        debug_assert_eq!(self.status, SegmentStatus::Idle, "append while not idle");
        match self.buffer.begin_append(&chunk) {
            Ok(()) => {
                self.status = SegmentStatus::Appending;
                Ok(())
            }
            Err(AppendError::CapacityExceeded) => {
                // The failed chunk must replay ahead of everything queued.
                self.pending.push_front(chunk);
                self.close();
                Err(SegmentError::CapacityExceeded(self.id))
            }
            Err(AppendError::Fatal(message)) => {
                self.close();
                Err(SegmentError::Fatal {
                    id: self.id,
                    message,
                })
            }
        }
    }

    /// Hands over everything not yet appended, in original order.
    pub(crate) fn take_pending(&mut self) -> VecDeque<Bytes> {
        std::mem::take(&mut self.pending)
    }

    /// Seeds the queue of a fresh successor with replayed chunks.
    pub(crate) fn preload(&mut self, chunks: VecDeque<Bytes>) {
        debug_assert!(self.pending.is_empty());
        self.pending = chunks;
    }

    /// Closes the underlying buffer. Idempotent.
    pub(crate) fn close(&mut self) {
        if self.status != SegmentStatus::Closed {
            self.buffer.close();
            self.status = SegmentStatus::Closed;
        }
    }

    /// True once every accepted chunk has been handed to the buffer.
    pub(crate) fn is_drained(&self) -> bool {
        self.pending.is_empty()
            && matches!(self.status, SegmentStatus::Idle | SegmentStatus::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Scripted buffer: appends succeed until `results` runs dry, then Ok.
    struct FakeBuffer {
        appended: Arc<Mutex<Vec<Bytes>>>,
        results: VecDeque<Result<(), AppendError>>,
        closed: Arc<Mutex<bool>>,
    }

    impl PlaybackBuffer for FakeBuffer {
        fn begin_append(&mut self, chunk: &Bytes) -> Result<(), AppendError> {
            let result = self.results.pop_front().unwrap_or(Ok(()));
            if result.is_ok() {
                self.appended.lock().unwrap().push(chunk.clone());
            }
            result
        }

        fn close(&mut self) {
            *self.closed.lock().unwrap() = true;
        }
    }

    struct Harness {
        segment: BufferSegment,
        appended: Arc<Mutex<Vec<Bytes>>>,
        closed: Arc<Mutex<bool>>,
    }

    fn harness(results: Vec<Result<(), AppendError>>) -> Harness {
        let appended = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(Mutex::new(false));
        let (_tx, rx) = mpsc::channel(4);
        let binding = BufferBinding {
            handle: MediaHandle::new(1),
            buffer: Box::new(FakeBuffer {
                appended: appended.clone(),
                results: results.into(),
                closed: closed.clone(),
            }),
            events: rx,
        };
        let mut segment = BufferSegment::new(1, binding);
        segment.mark_open();
        Harness {
            segment,
            appended,
            closed,
        }
    }

    fn chunk(byte: u8) -> Bytes {
        Bytes::from(vec![byte; 4])
    }

    #[test]
    fn chunks_queue_until_writable() {
        let mut h = harness(vec![]);
        h.segment.push(chunk(1)).unwrap();
        h.segment.push(chunk(2)).unwrap();

        assert_eq!(h.segment.status(), SegmentStatus::Open);
        assert_eq!(h.segment.pending_len(), 2);
        assert!(h.appended.lock().unwrap().is_empty());

        h.segment.on_writable().unwrap();
        assert_eq!(h.segment.status(), SegmentStatus::Appending);
        assert_eq!(*h.appended.lock().unwrap(), vec![chunk(1)]);
    }

    #[test]
    fn single_writer_one_append_in_flight() {
        let mut h = harness(vec![]);
        h.segment.on_writable().unwrap();
        assert_eq!(h.segment.status(), SegmentStatus::Idle);

        h.segment.push(chunk(1)).unwrap();
        assert_eq!(h.segment.status(), SegmentStatus::Appending);

        // Further chunks queue; no second append is started.
        h.segment.push(chunk(2)).unwrap();
        h.segment.push(chunk(3)).unwrap();
        assert_eq!(h.appended.lock().unwrap().len(), 1);
        assert_eq!(h.segment.pending_len(), 2);
    }

    #[test]
    fn update_end_flushes_the_queue_in_order() {
        let mut h = harness(vec![]);
        h.segment.on_writable().unwrap();
        for b in 1..=3 {
            h.segment.push(chunk(b)).unwrap();
        }

        h.segment.on_update_end().unwrap();
        h.segment.on_update_end().unwrap();
        h.segment.on_update_end().unwrap();

        assert_eq!(
            *h.appended.lock().unwrap(),
            vec![chunk(1), chunk(2), chunk(3)]
        );
        assert_eq!(h.segment.status(), SegmentStatus::Idle);
        assert!(h.segment.is_drained());
    }

    #[test]
    fn repeated_writable_does_not_start_a_second_append() {
        let mut h = harness(vec![]);
        h.segment.on_writable().unwrap();
        h.segment.push(chunk(1)).unwrap();
        h.segment.push(chunk(2)).unwrap();
        assert_eq!(h.segment.status(), SegmentStatus::Appending);

        // A duplicate writable report must not bypass the in-flight append.
        h.segment.on_writable().unwrap();
        assert_eq!(h.segment.status(), SegmentStatus::Appending);
        assert_eq!(h.appended.lock().unwrap().len(), 1);

        h.segment.on_update_end().unwrap();
        assert_eq!(*h.appended.lock().unwrap(), vec![chunk(1), chunk(2)]);
    }

    #[test]
    fn capacity_overflow_preserves_failed_chunk_ahead_of_queue() {
        // First two appends succeed, the third hits the capacity limit.
        let mut h = harness(vec![Ok(()), Ok(()), Err(AppendError::CapacityExceeded)]);
        h.segment.on_writable().unwrap();
        for b in 1..=5 {
            h.segment.push(chunk(b)).unwrap();
        }

        h.segment.on_update_end().unwrap();
        let err = h.segment.on_update_end().unwrap_err();
        assert!(matches!(err, SegmentError::CapacityExceeded(1)));
        assert_eq!(h.segment.status(), SegmentStatus::Closed);
        assert!(*h.closed.lock().unwrap());

        // Chunk 3 failed with 4 and 5 still queued: replay order is 3, 4, 5.
        let replay: Vec<Bytes> = h.segment.take_pending().into();
        assert_eq!(replay, vec![chunk(3), chunk(4), chunk(5)]);
    }

    #[test]
    fn fatal_append_failure_closes_the_segment() {
        let mut h = harness(vec![Err(AppendError::Fatal("boom".into()))]);
        h.segment.on_writable().unwrap();
        let err = h.segment.push(chunk(1)).unwrap_err();

        assert!(matches!(err, SegmentError::Fatal { id: 1, .. }));
        assert_eq!(h.segment.status(), SegmentStatus::Closed);
    }

    #[test]
    fn events_after_close_are_ignored() {
        let mut h = harness(vec![]);
        h.segment.close();
        h.segment.on_writable().unwrap();
        h.segment.on_update_end().unwrap();
        assert_eq!(h.segment.status(), SegmentStatus::Closed);
    }
}
