//! Source switching and playback intent.
//!
//! [`PlayerController`] owns the playback element on behalf of at most one
//! live [`StreamSession`]. Switching broadcasts is strictly
//! abort-then-start: the old session's teardown is awaited before the new
//! one spawns, so two sessions never write to the element at the same time.
//!
//! Playback state is a projection: `play()`/`pause()` only issue intent,
//! and `is_playing` changes exclusively on the element's own
//! [`PlayerEvent::Playing`]/[`PlayerEvent::Paused`] reports. The element's
//! start can fail asynchronously after being requested, so flipping the
//! flag optimistically would lie to observers.

use crate::session::{SessionStatus, StreamSession};
use crate::sources::SourceDescriptor;
use pmodiag::Diagnostics;
use pmostream::sink::SinkEvent;
use pmostream::source::SourceConfig;
use pmostream::{PlaybackElement, PlayerEvent};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

const PLAYER_EVENT_CHANNEL_SIZE: usize = 8;

/// Controller tunables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Request playback as soon as a source is attached.
    pub autoplay: bool,
    /// Network tunables forwarded to each session's source.
    pub source: SourceConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            autoplay: true,
            source: SourceConfig::default(),
        }
    }
}

/// What the controller observed while pumping events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    /// A buffer segment was attached to the playback element.
    SourceAttached { segment_id: u64 },
    /// The element confirmed playback started.
    PlaybackStarted,
    /// The element confirmed playback paused.
    PlaybackPaused,
    /// The element consumed the attached segment to its end.
    PlaybackEnded,
    /// Attach or playback failed; the session may still be alive.
    PlaybackFailed(String),
    /// The session consumed its stream to the natural end.
    SessionEnded,
    /// The session died; the controller cleared its selection.
    SessionErrored,
}

/// Drives one playback element across successive broadcast sessions.
pub struct PlayerController {
    element: Arc<dyn PlaybackElement>,
    diagnostics: Arc<dyn Diagnostics>,
    config: PlayerConfig,
    player_events: mpsc::Receiver<PlayerEvent>,
    session: Option<StreamSession>,
    sink_events: Option<mpsc::Receiver<SinkEvent>>,
    status_rx: Option<watch::Receiver<SessionStatus>>,
    current: Option<SourceDescriptor>,
    attached: bool,
    is_playing: bool,
    error: bool,
}

impl PlayerController {
    pub fn new(element: Arc<dyn PlaybackElement>, diagnostics: Arc<dyn Diagnostics>) -> Self {
        Self::with_config(element, diagnostics, PlayerConfig::default())
    }

    pub fn with_config(
        element: Arc<dyn PlaybackElement>,
        diagnostics: Arc<dyn Diagnostics>,
        config: PlayerConfig,
    ) -> Self {
        let (tx, player_events) = mpsc::channel(PLAYER_EVENT_CHANNEL_SIZE);
        element.subscribe(tx);
        Self {
            element,
            diagnostics,
            config,
            player_events,
            session: None,
            sink_events: None,
            status_rx: None,
            current: None,
            attached: false,
            is_playing: false,
            error: false,
        }
    }

    pub fn current_source(&self) -> Option<&SourceDescriptor> {
        self.current.as_ref()
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn has_error(&self) -> bool {
        self.error
    }

    pub fn session_status(&self) -> SessionStatus {
        self.session
            .as_ref()
            .map_or(SessionStatus::Idle, |s| s.status())
    }

    /// Selects a broadcast: aborts the current session, waits for its
    /// teardown to complete, then starts a fresh one.
    pub async fn switch_to(&mut self, descriptor: SourceDescriptor) {
        self.stop().await;
        tracing::info!(station = %descriptor.name, "switching to broadcast");

        let mut session = StreamSession::start_with_config(
            descriptor.clone(),
            self.element.clone(),
            self.diagnostics.clone(),
            self.config.source.clone(),
        );
        self.sink_events = session.take_events();
        self.status_rx = Some(session.subscribe_status());
        self.session = Some(session);
        self.current = Some(descriptor);
        self.error = false;
    }

    /// Aborts the current session, if any, and clears the selection.
    pub async fn stop(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.abort().await;
        }
        self.sink_events = None;
        self.status_rx = None;
        self.current = None;
        self.attached = false;
        self.is_playing = false;
    }

    /// Requests playback. No-op while nothing is attached or playback is
    /// already running; `is_playing` only changes when the element reports.
    pub async fn play(&mut self) {
        if !self.attached || self.is_playing {
            return;
        }
        if let Err(err) = self.element.play().await {
            self.error = true;
            tracing::warn!(error = %err, "play request failed");
            self.diagnostics
                .report("PlayerController::play", &err.to_string())
                .await;
        }
    }

    /// Requests a pause. No-op while nothing is attached or already paused.
    pub async fn pause(&mut self) {
        if !self.attached || !self.is_playing {
            return;
        }
        if let Err(err) = self.element.pause().await {
            self.error = true;
            tracing::warn!(error = %err, "pause request failed");
            self.diagnostics
                .report("PlayerController::pause", &err.to_string())
                .await;
        }
    }

    /// Pumps engine and element events until one is worth reporting.
    ///
    /// Returns `None` only when the playback element's event feed closes.
    /// With no live session this pends on element events alone; callers
    /// drive it from their own loop (or under a timeout in tests).
    pub async fn next_event(&mut self) -> Option<ControllerEvent> {
        loop {
            tokio::select! {
                maybe_event = Self::recv_sink(&mut self.sink_events) => match maybe_event {
                    Some(event) => {
                        if let Some(out) = self.on_sink_event(event).await {
                            return Some(out);
                        }
                    }
                    None => self.sink_events = None,
                },
                maybe_event = self.player_events.recv() => match maybe_event {
                    Some(event) => {
                        if let Some(out) = self.on_player_event(event).await {
                            return Some(out);
                        }
                    }
                    None => return None,
                },
                status = Self::status_changed(&mut self.status_rx) => {
                    if let Some(out) = self.on_status(status) {
                        return Some(out);
                    }
                }
            }
        }
    }

    async fn recv_sink(rx: &mut Option<mpsc::Receiver<SinkEvent>>) -> Option<SinkEvent> {
        match rx {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        }
    }

    async fn status_changed(rx: &mut Option<watch::Receiver<SessionStatus>>) -> SessionStatus {
        match rx {
            Some(watch) => {
                if watch.changed().await.is_ok() {
                    *watch.borrow_and_update()
                } else {
                    std::future::pending().await
                }
            }
            None => std::future::pending().await,
        }
    }

    async fn on_sink_event(&mut self, event: SinkEvent) -> Option<ControllerEvent> {
        match event {
            SinkEvent::SegmentReady { segment_id, handle } => {
                if let Err(err) = self.element.attach(&handle).await {
                    tracing::error!(error = %err, "failed to attach playback source");
                    self.diagnostics
                        .report("PlayerController::attach", &err.to_string())
                        .await;
                    // The session would keep buffering into a segment that
                    // can never become writable; tear it down.
                    self.stop().await;
                    self.error = true;
                    return Some(ControllerEvent::PlaybackFailed(err.to_string()));
                }
                self.attached = true;
                tracing::debug!(segment = segment_id, "playback source attached");

                if self.config.autoplay && !self.is_playing {
                    if let Err(err) = self.element.play().await {
                        self.error = true;
                        self.diagnostics
                            .report("PlayerController::play", &err.to_string())
                            .await;
                        return Some(ControllerEvent::PlaybackFailed(err.to_string()));
                    }
                }
                Some(ControllerEvent::SourceAttached { segment_id })
            }
        }
    }

    async fn on_player_event(&mut self, event: PlayerEvent) -> Option<ControllerEvent> {
        match event {
            PlayerEvent::Playing => {
                self.is_playing = true;
                Some(ControllerEvent::PlaybackStarted)
            }
            PlayerEvent::Paused => {
                self.is_playing = false;
                Some(ControllerEvent::PlaybackPaused)
            }
            PlayerEvent::Ended => {
                self.is_playing = false;
                if let Some(session) = &self.session {
                    session.notify_segment_exhausted().await;
                }
                Some(ControllerEvent::PlaybackEnded)
            }
            PlayerEvent::Error(message) => {
                self.error = true;
                self.diagnostics
                    .report("PlayerController::element", &message)
                    .await;
                Some(ControllerEvent::PlaybackFailed(message))
            }
        }
    }

    fn on_status(&mut self, status: SessionStatus) -> Option<ControllerEvent> {
        match status {
            SessionStatus::Errored => {
                self.status_rx = None;
                self.sink_events = None;
                self.session = None;
                self.current = None;
                self.attached = false;
                self.is_playing = false;
                self.error = true;
                Some(ControllerEvent::SessionErrored)
            }
            SessionStatus::Ended => {
                self.status_rx = None;
                Some(ControllerEvent::SessionEnded)
            }
            SessionStatus::Aborted => {
                self.status_rx = None;
                None
            }
            _ => None,
        }
    }
}
