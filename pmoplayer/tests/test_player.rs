//! Controller tests: source switching, playback intent, and the event
//! projection driving `is_playing`.

use pmodiag::MemoryDiagnostics;
use pmoplayer::{
    ControllerEvent, PlayerConfig, PlayerController, SessionStatus, SourceDescriptor,
};
use pmostream::mock::MockPlaybackElement;
use pmostream::PlaybackError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn serve_stream(route: &str, body: Vec<u8>, delay: Option<Duration>) -> MockServer {
    let server = MockServer::start().await;
    let mut template = ResponseTemplate::new(200)
        .set_body_bytes(body)
        .insert_header("content-type", "audio/mpeg");
    if let Some(delay) = delay {
        template = template.set_delay(delay);
    }
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(template)
        .mount(&server)
        .await;
    server
}

fn manual_controller(
    element: Arc<MockPlaybackElement>,
    diagnostics: Arc<MemoryDiagnostics>,
) -> PlayerController {
    let config = PlayerConfig {
        autoplay: false,
        ..PlayerConfig::default()
    };
    PlayerController::with_config(element, diagnostics, config)
}

async fn next_event(controller: &mut PlayerController) -> ControllerEvent {
    timeout(Duration::from_secs(2), controller.next_event())
        .await
        .expect("no controller event")
        .expect("element event feed closed")
}

/// Pumps events until `SourceAttached` shows up.
async fn pump_until_attached(controller: &mut PlayerController) -> u64 {
    for _ in 0..8 {
        if let ControllerEvent::SourceAttached { segment_id } = next_event(controller).await {
            return segment_id;
        }
    }
    panic!("source never attached");
}

#[tokio::test]
async fn switch_aborts_the_old_session_before_starting_the_new_one() {
    // The first broadcast answers slowly; the second immediately.
    let slow = serve_stream("/one.mp3", vec![1u8; 64 * 1024], Some(Duration::from_secs(5))).await;
    let fast_body = vec![2u8; 8 * 1024];
    let fast = serve_stream("/two.mp3", fast_body.clone(), None).await;

    let element = MockPlaybackElement::new();
    let diagnostics = MemoryDiagnostics::new();
    let mut controller = manual_controller(element.clone(), diagnostics.clone());

    controller
        .switch_to(SourceDescriptor::new("One", format!("{}/one.mp3", slow.uri())))
        .await;
    pump_until_attached(&mut controller).await;
    let first_handle = element.attach_log()[0].clone();

    controller
        .switch_to(SourceDescriptor::new("Two", format!("{}/two.mp3", fast.uri())))
        .await;
    assert_eq!(
        diagnostics.messages("BufferSink::close").await,
        vec!["aborted"]
    );

    pump_until_attached(&mut controller).await;
    assert_eq!(next_event(&mut controller).await, ControllerEvent::SessionEnded);

    let second_handle = element.attach_log()[1].clone();
    assert_ne!(first_handle, second_handle);

    // Every byte of the second broadcast landed; none of the first ever did.
    let received: Vec<u8> = element
        .appended(&second_handle)
        .iter()
        .flat_map(|chunk| chunk.to_vec())
        .collect();
    assert_eq!(received, fast_body);
    assert!(element.appended(&first_handle).is_empty());
}

#[tokio::test]
async fn autoplay_requests_playback_on_attach() {
    let server = serve_stream("/live.mp3", vec![3u8; 4096], None).await;
    let element = MockPlaybackElement::new();
    let mut controller =
        PlayerController::new(element.clone(), MemoryDiagnostics::new());

    controller
        .switch_to(SourceDescriptor::new("Live", format!("{}/live.mp3", server.uri())))
        .await;

    pump_until_attached(&mut controller).await;
    assert_eq!(next_event(&mut controller).await, ControllerEvent::PlaybackStarted);
    assert!(controller.is_playing());
    assert_eq!(element.play_calls(), 1);
}

#[tokio::test]
async fn play_and_pause_are_projections_of_element_events() {
    let server = serve_stream("/live.mp3", vec![4u8; 4096], Some(Duration::from_secs(5))).await;
    let element = MockPlaybackElement::new();
    let mut controller = manual_controller(element.clone(), MemoryDiagnostics::new());

    // Nothing attached yet: intent is a no-op.
    controller.play().await;
    assert_eq!(element.play_calls(), 0);

    controller
        .switch_to(SourceDescriptor::new("Live", format!("{}/live.mp3", server.uri())))
        .await;
    pump_until_attached(&mut controller).await;
    assert!(!controller.is_playing());

    controller.play().await;
    // The flag only flips once the element reports.
    assert_eq!(next_event(&mut controller).await, ControllerEvent::PlaybackStarted);
    assert!(controller.is_playing());

    controller.pause().await;
    assert_eq!(next_event(&mut controller).await, ControllerEvent::PlaybackPaused);
    assert!(!controller.is_playing());

    // A duplicate pause issues no intent and produces no transition.
    controller.pause().await;
    assert_eq!(element.pause_calls(), 1);

    controller.stop().await;
}

#[tokio::test]
async fn interrupted_play_flags_an_error_without_killing_the_session() {
    let server = serve_stream("/live.mp3", vec![5u8; 4096], Some(Duration::from_secs(5))).await;
    let element = MockPlaybackElement::new();
    let diagnostics = MemoryDiagnostics::new();
    let mut controller = manual_controller(element.clone(), diagnostics.clone());

    controller
        .switch_to(SourceDescriptor::new("Live", format!("{}/live.mp3", server.uri())))
        .await;
    pump_until_attached(&mut controller).await;

    element.fail_next_play(PlaybackError::Interrupted);
    controller.play().await;

    assert!(controller.has_error());
    assert!(!controller.is_playing());
    assert!(!controller.session_status().is_terminal());
    let reports = diagnostics.messages("PlayerController::play").await;
    assert_eq!(reports.len(), 1);

    // The session is still usable: a second play goes through.
    controller.play().await;
    assert_eq!(next_event(&mut controller).await, ControllerEvent::PlaybackStarted);
    assert!(controller.is_playing());

    controller.stop().await;
}

#[tokio::test]
async fn element_end_of_media_is_forwarded_and_session_finishes() {
    let server = serve_stream("/live.mp3", vec![6u8; 4096], None).await;
    let element = MockPlaybackElement::new();
    let mut controller = manual_controller(element.clone(), MemoryDiagnostics::new());

    controller
        .switch_to(SourceDescriptor::new("Live", format!("{}/live.mp3", server.uri())))
        .await;
    pump_until_attached(&mut controller).await;
    assert_eq!(next_event(&mut controller).await, ControllerEvent::SessionEnded);

    element.emit_ended().await;
    assert_eq!(next_event(&mut controller).await, ControllerEvent::PlaybackEnded);
    assert!(!controller.is_playing());
}

#[tokio::test]
async fn attach_failure_tears_the_session_down() {
    // Endless broadcast: without teardown the session would buffer forever
    // into a segment that can never become writable.
    let server = serve_stream("/live.mp3", vec![8u8; 256 * 1024], None).await;
    let element = MockPlaybackElement::new();
    let diagnostics = MemoryDiagnostics::new();
    let mut controller = manual_controller(element.clone(), diagnostics.clone());

    element.fail_attach("renderer rejected the handle");
    controller
        .switch_to(SourceDescriptor::new("Live", format!("{}/live.mp3", server.uri())))
        .await;

    match next_event(&mut controller).await {
        ControllerEvent::PlaybackFailed(message) => {
            assert!(message.contains("renderer rejected the handle"));
        }
        other => panic!("expected PlaybackFailed, got {other:?}"),
    }

    assert!(controller.has_error());
    assert!(controller.current_source().is_none());
    assert_eq!(controller.session_status(), SessionStatus::Idle);
    assert_eq!(
        diagnostics.messages("PlayerController::attach").await.len(),
        1
    );
    assert_eq!(
        diagnostics.messages("BufferSink::close").await,
        vec!["aborted"]
    );
}

#[tokio::test]
async fn session_failure_clears_the_selection_but_keeps_the_controller() {
    let bad = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/dead.mp3"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&bad)
        .await;
    let good = serve_stream("/live.mp3", vec![7u8; 4096], None).await;

    let element = MockPlaybackElement::new();
    let diagnostics = MemoryDiagnostics::new();
    let mut controller = manual_controller(element.clone(), diagnostics.clone());

    controller
        .switch_to(SourceDescriptor::new("Dead", format!("{}/dead.mp3", bad.uri())))
        .await;

    // Pump until the session failure surfaces.
    let mut errored = false;
    for _ in 0..8 {
        if next_event(&mut controller).await == ControllerEvent::SessionErrored {
            errored = true;
            break;
        }
    }
    assert!(errored, "session error never surfaced");
    assert!(controller.has_error());
    assert!(controller.current_source().is_none());
    assert_eq!(controller.session_status(), SessionStatus::Idle);

    // The controller recovers on the next switch.
    controller
        .switch_to(SourceDescriptor::new("Live", format!("{}/live.mp3", good.uri())))
        .await;
    pump_until_attached(&mut controller).await;
    assert!(!controller.has_error());
    assert!(controller.current_source().is_some());
}
