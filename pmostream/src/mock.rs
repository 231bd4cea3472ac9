//! Deterministic in-process playback element.
//!
//! Models the four signals the engine relies on — attach, readiness,
//! append-completion, playback lifecycle — without any real media stack:
//! appends complete immediately (the `UpdateEnd` event is emitted as soon as
//! an append begins), a buffer becomes writable the moment it is attached,
//! and play/pause emit lifecycle events synchronously. Optional knobs
//! reproduce the awkward parts of real elements: a per-buffer byte capacity
//! and scripted play failures.

use crate::error::{AppendError, PlaybackError};
use crate::playback::{
    BufferBinding, BufferEvent, MediaHandle, PlaybackBuffer, PlaybackElement, PlayerEvent,
};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

const BUFFER_EVENT_CAPACITY: usize = 64;

#[derive(Default)]
struct BufferState {
    appended: Vec<Bytes>,
    total_bytes: usize,
    capacity: Option<usize>,
    closed: bool,
    fail_message: Option<String>,
}

struct ElementState {
    next_buffer_id: u64,
    buffers: HashMap<u64, Arc<Mutex<BufferState>>>,
    buffer_events: HashMap<u64, mpsc::Sender<BufferEvent>>,
    subscribers: Vec<mpsc::Sender<PlayerEvent>>,
    attached: Option<u64>,
    attach_log: Vec<MediaHandle>,
    playing: bool,
    play_calls: usize,
    pause_calls: usize,
    next_play_failure: Option<PlaybackError>,
    buffer_capacity: Option<usize>,
    fail_appends: Option<String>,
    fail_attach: Option<String>,
}

/// Scriptable playback element for tests and examples.
pub struct MockPlaybackElement {
    state: Mutex<ElementState>,
}

impl MockPlaybackElement {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ElementState {
                next_buffer_id: 1,
                buffers: HashMap::new(),
                buffer_events: HashMap::new(),
                subscribers: Vec::new(),
                attached: None,
                attach_log: Vec::new(),
                playing: false,
                play_calls: 0,
                pause_calls: 0,
                next_play_failure: None,
                buffer_capacity: None,
                fail_appends: None,
                fail_attach: None,
            }),
        })
    }

    /// Every buffer created from now on rejects appends past `bytes`.
    pub fn with_buffer_capacity(bytes: usize) -> Arc<Self> {
        let element = Self::new();
        element.set_buffer_capacity(Some(bytes));
        element
    }

    pub fn set_buffer_capacity(&self, bytes: Option<usize>) {
        self.state.lock().unwrap().buffer_capacity = bytes;
    }

    /// The next `play()` call fails with `error` instead of starting.
    pub fn fail_next_play(&self, error: PlaybackError) {
        self.state.lock().unwrap().next_play_failure = Some(error);
    }

    /// Every buffer created from now on fails appends fatally.
    pub fn fail_appends(&self, message: &str) {
        self.state.lock().unwrap().fail_appends = Some(message.to_string());
    }

    /// Every `attach()` call from now on is rejected.
    pub fn fail_attach(&self, message: &str) {
        self.state.lock().unwrap().fail_attach = Some(message.to_string());
    }

    /// Chunks appended to the buffer behind `handle`, in append order.
    pub fn appended(&self, handle: &MediaHandle) -> Vec<Bytes> {
        self.state
            .lock()
            .unwrap()
            .buffers
            .get(&handle.id())
            .map(|b| b.lock().unwrap().appended.clone())
            .unwrap_or_default()
    }

    pub fn is_buffer_closed(&self, handle: &MediaHandle) -> bool {
        self.state
            .lock()
            .unwrap()
            .buffers
            .get(&handle.id())
            .map(|b| b.lock().unwrap().closed)
            .unwrap_or(false)
    }

    pub fn attach_log(&self) -> Vec<MediaHandle> {
        self.state.lock().unwrap().attach_log.clone()
    }

    pub fn play_calls(&self) -> usize {
        self.state.lock().unwrap().play_calls
    }

    pub fn pause_calls(&self) -> usize {
        self.state.lock().unwrap().pause_calls
    }

    /// Signals that the attached media was consumed to its end.
    pub async fn emit_ended(&self) {
        let subscribers = {
            let mut state = self.state.lock().unwrap();
            state.playing = false;
            state.subscribers.clone()
        };
        Self::broadcast(&subscribers, PlayerEvent::Ended).await;
    }

    /// Emits an element-level error to subscribers.
    pub async fn emit_error(&self, message: &str) {
        let subscribers = self.state.lock().unwrap().subscribers.clone();
        Self::broadcast(&subscribers, PlayerEvent::Error(message.to_string())).await;
    }

    async fn broadcast(subscribers: &[mpsc::Sender<PlayerEvent>], event: PlayerEvent) {
        for tx in subscribers {
            let _ = tx.send(event.clone()).await;
        }
    }
}

#[async_trait::async_trait]
impl PlaybackElement for MockPlaybackElement {
    async fn create_buffer(&self) -> Result<BufferBinding, PlaybackError> {
        let (events_tx, events_rx) = mpsc::channel(BUFFER_EVENT_CAPACITY);
        let mut state = self.state.lock().unwrap();
        let id = state.next_buffer_id;
        state.next_buffer_id += 1;

        let shared = Arc::new(Mutex::new(BufferState {
            capacity: state.buffer_capacity,
            fail_message: state.fail_appends.clone(),
            ..BufferState::default()
        }));
        state.buffers.insert(id, shared.clone());
        state.buffer_events.insert(id, events_tx.clone());

        Ok(BufferBinding {
            handle: MediaHandle::new(id),
            buffer: Box::new(MockBuffer {
                shared,
                events: events_tx,
            }),
            events: events_rx,
        })
    }

    async fn attach(&self, handle: &MediaHandle) -> Result<(), PlaybackError> {
        let events = {
            let mut state = self.state.lock().unwrap();
            if let Some(message) = &state.fail_attach {
                return Err(PlaybackError::Failed(message.clone()));
            }
            if !state.buffers.contains_key(&handle.id()) {
                return Err(PlaybackError::Failed(format!(
                    "unknown media handle {}",
                    handle.id()
                )));
            }
            state.attached = Some(handle.id());
            state.attach_log.push(handle.clone());
            state.buffer_events.get(&handle.id()).cloned()
        };
        if let Some(events) = events {
            let _ = events.send(BufferEvent::Writable).await;
        }
        Ok(())
    }

    async fn play(&self) -> Result<(), PlaybackError> {
        let (failure, subscribers, should_emit) = {
            let mut state = self.state.lock().unwrap();
            state.play_calls += 1;
            if state.attached.is_none() {
                return Err(PlaybackError::Detached);
            }
            if let Some(failure) = state.next_play_failure.take() {
                (Some(failure), Vec::new(), false)
            } else {
                let should_emit = !state.playing;
                state.playing = true;
                (None, state.subscribers.clone(), should_emit)
            }
        };
        if let Some(failure) = failure {
            return Err(failure);
        }
        if should_emit {
            Self::broadcast(&subscribers, PlayerEvent::Playing).await;
        }
        Ok(())
    }

    async fn pause(&self) -> Result<(), PlaybackError> {
        let (subscribers, should_emit) = {
            let mut state = self.state.lock().unwrap();
            state.pause_calls += 1;
            if state.attached.is_none() {
                return Err(PlaybackError::Detached);
            }
            let should_emit = state.playing;
            state.playing = false;
            (state.subscribers.clone(), should_emit)
        };
        if should_emit {
            Self::broadcast(&subscribers, PlayerEvent::Paused).await;
        }
        Ok(())
    }

    fn subscribe(&self, tx: mpsc::Sender<PlayerEvent>) {
        self.state.lock().unwrap().subscribers.push(tx);
    }
}

struct MockBuffer {
    shared: Arc<Mutex<BufferState>>,
    events: mpsc::Sender<BufferEvent>,
}

impl PlaybackBuffer for MockBuffer {
    fn begin_append(&mut self, chunk: &Bytes) -> Result<(), AppendError> {
        let mut state = self.shared.lock().unwrap();
        if let Some(message) = &state.fail_message {
            return Err(AppendError::Fatal(message.clone()));
        }
        if state.closed {
            return Err(AppendError::Fatal("append on closed buffer".to_string()));
        }
        if let Some(capacity) = state.capacity {
            if state.total_bytes + chunk.len() > capacity {
                return Err(AppendError::CapacityExceeded);
            }
        }
        state.appended.push(chunk.clone());
        state.total_bytes += chunk.len();
        // Appends complete instantly in the mock.
        let _ = self.events.try_send(BufferEvent::UpdateEnd);
        Ok(())
    }

    fn close(&mut self) {
        self.shared.lock().unwrap().closed = true;
    }
}
