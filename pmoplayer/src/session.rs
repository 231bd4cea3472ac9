//! One fetch-and-buffer run for a single broadcast.
//!
//! A [`StreamSession`] owns a network source task and a buffer sink task
//! under one [`CancellationToken`], plus a supervisor that folds both task
//! outcomes into a single [`SessionStatus`] published over a `watch`
//! channel. A session is single-use: once it reaches a terminal status it
//! stays there, and switching broadcasts means aborting one session and
//! starting another.

use crate::sources::SourceDescriptor;
use pmodiag::Diagnostics;
use pmostream::sink::{BufferSink, SinkCommand, SinkEvent};
use pmostream::source::{ChunkSource, SourceConfig};
use pmostream::{PlaybackElement, StreamError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

/// Capacity of the network-chunk channel between source and sink.
const CHUNK_CHANNEL_SIZE: usize = 16;
/// Capacity of the sink-event channel toward the host.
const EVENT_CHANNEL_SIZE: usize = 8;
/// Capacity of the host-command channel toward the sink.
const COMMAND_CHANNEL_SIZE: usize = 4;

/// Lifecycle of one streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// No work started yet.
    Idle,
    /// Source and sink are running; bytes are flowing.
    Fetching,
    /// The network stream ended; the sink is draining its queues.
    Draining,
    /// Abort requested; teardown in progress.
    Aborting,
    /// Terminal: torn down on request.
    Aborted,
    /// Terminal: the stream was consumed to its natural end.
    Ended,
    /// Terminal: source or sink failed.
    Errored,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Aborted | Self::Ended | Self::Errored)
    }
}

/// A running source/sink pair for one broadcast URL.
pub struct StreamSession {
    descriptor: SourceDescriptor,
    stop: CancellationToken,
    aborted: Arc<AtomicBool>,
    status_tx: Arc<watch::Sender<SessionStatus>>,
    status_rx: watch::Receiver<SessionStatus>,
    supervisor: Option<JoinHandle<()>>,
    events: Option<mpsc::Receiver<SinkEvent>>,
    commands: mpsc::Sender<SinkCommand>,
}

impl StreamSession {
    /// Spawns the source, the sink, and their supervisor. Bytes start
    /// flowing immediately.
    pub fn start(
        descriptor: SourceDescriptor,
        element: Arc<dyn PlaybackElement>,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> Self {
        Self::start_with_config(descriptor, element, diagnostics, SourceConfig::default())
    }

    pub fn start_with_config(
        descriptor: SourceDescriptor,
        element: Arc<dyn PlaybackElement>,
        diagnostics: Arc<dyn Diagnostics>,
        config: SourceConfig,
    ) -> Self {
        let stop = CancellationToken::new();
        let aborted = Arc::new(AtomicBool::new(false));
        let (status_tx, status_rx) = watch::channel(SessionStatus::Idle);
        let status_tx = Arc::new(status_tx);

        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_CHANNEL_SIZE);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);

        let source = ChunkSource::with_config(&descriptor.url, config);
        let sink = BufferSink::new(element, diagnostics.clone(), event_tx);

        tracing::info!(station = %descriptor.name, url = %descriptor.url, "session started");
        let _ = status_tx.send(SessionStatus::Fetching);

        let source_handle = tokio::spawn(source.run(chunk_tx, stop.clone()));
        let sink_handle = tokio::spawn(sink.run(chunk_rx, command_rx, stop.clone()));
        let supervisor = tokio::spawn(Self::supervise(
            source_handle,
            sink_handle,
            stop.clone(),
            aborted.clone(),
            status_tx.clone(),
            diagnostics,
        ));

        Self {
            descriptor,
            stop,
            aborted,
            status_tx,
            status_rx,
            supervisor: Some(supervisor),
            events: Some(event_rx),
            commands: command_tx,
        }
    }

    pub fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    pub fn status(&self) -> SessionStatus {
        *self.status_rx.borrow()
    }

    /// Watch receiver for status transitions.
    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.status_rx.clone()
    }

    /// Hands the sink-event receiver to whoever drives the playback element.
    /// Yields `Some` exactly once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<SinkEvent>> {
        self.events.take()
    }

    /// Forwards the element's end-of-media signal so the sink can activate
    /// the next buffer segment.
    pub async fn notify_segment_exhausted(&self) {
        if self
            .commands
            .send(SinkCommand::SegmentExhausted)
            .await
            .is_err()
        {
            tracing::debug!("segment-exhausted signal after sink shutdown");
        }
    }

    /// Requests teardown and waits for it to complete. Idempotent. After
    /// this returns, no chunk of this session will ever be appended.
    pub async fn abort(&mut self) {
        if !self.status_rx.borrow().is_terminal() {
            self.aborted.store(true, Ordering::SeqCst);
            self.status_tx.send_if_modified(|status| {
                if status.is_terminal() {
                    false
                } else {
                    *status = SessionStatus::Aborting;
                    true
                }
            });
            self.stop.cancel();
        }
        if let Some(supervisor) = self.supervisor.take() {
            let _ = supervisor.await;
        } else {
            // Supervisor already awaited elsewhere; follow the watch.
            while !self.status_rx.borrow_and_update().is_terminal() {
                if self.status_rx.changed().await.is_err() {
                    break;
                }
            }
        }
    }

    async fn supervise(
        mut source_handle: JoinHandle<pmostream::Result<()>>,
        mut sink_handle: JoinHandle<pmostream::Result<()>>,
        stop: CancellationToken,
        aborted: Arc<AtomicBool>,
        status_tx: Arc<watch::Sender<SessionStatus>>,
        diagnostics: Arc<dyn Diagnostics>,
    ) {
        let mut source_result: Option<pmostream::Result<()>> = None;
        let sink_result = loop {
            tokio::select! {
                joined = &mut source_handle, if source_result.is_none() => {
                    let result = Self::flatten(joined);
                    match &result {
                        Ok(()) if !stop.is_cancelled() => {
                            status_tx.send_if_modified(|status| {
                                if *status == SessionStatus::Fetching {
                                    *status = SessionStatus::Draining;
                                    true
                                } else {
                                    false
                                }
                            });
                        }
                        // The sink dropped its receiver first; its own
                        // outcome tells the real story.
                        Err(StreamError::SinkClosed) => {}
                        Err(err) => {
                            tracing::error!(error = %err, "network source failed");
                            diagnostics
                                .report("StreamSession::source", &err.to_string())
                                .await;
                            stop.cancel();
                        }
                        Ok(()) => {}
                    }
                    source_result = Some(result);
                }
                joined = &mut sink_handle => break Self::flatten(joined),
            }
        };

        if source_result.is_none() {
            // The sink finished first; release the source and collect it.
            stop.cancel();
            let result = Self::flatten((&mut source_handle).await);
            if let Err(err) = &result {
                if !matches!(err, StreamError::SinkClosed) {
                    diagnostics
                        .report("StreamSession::source", &err.to_string())
                        .await;
                }
            }
            source_result = Some(result);
        }

        if let Err(err) = &sink_result {
            tracing::error!(error = %err, "buffer sink failed");
            diagnostics
                .report("StreamSession::sink", &err.to_string())
                .await;
        }

        let source_failed = matches!(
            &source_result,
            Some(Err(err)) if !matches!(err, StreamError::SinkClosed)
        );
        let final_status = if sink_result.is_err() || source_failed {
            SessionStatus::Errored
        } else if aborted.load(Ordering::SeqCst) {
            SessionStatus::Aborted
        } else {
            SessionStatus::Ended
        };
        tracing::debug!(status = ?final_status, "session finished");
        let _ = status_tx.send(final_status);
    }

    fn flatten(joined: Result<pmostream::Result<()>, JoinError>) -> pmostream::Result<()> {
        match joined {
            Ok(result) => result,
            Err(err) => Err(StreamError::BufferFatal(format!("task failed: {err}"))),
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
