//! Streams a real broadcast for a few seconds into the deterministic mock
//! playback element and prints what the engine did.
//!
//! ```sh
//! cargo run -p pmoplayer --example radio_demo
//! ```

use pmodiag::MemoryDiagnostics;
use pmoplayer::{default_stations, ControllerEvent, PlayerController};
use pmostream::mock::MockPlaybackElement;
use std::time::Duration;
use tokio::time::timeout;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pmostream=debug,pmoplayer=debug".into()),
        )
        .init();

    let element = MockPlaybackElement::new();
    let diagnostics = MemoryDiagnostics::new();
    let mut controller = PlayerController::new(element.clone(), diagnostics.clone());

    let station = default_stations().remove(0);
    println!("tuning in: {} ({})", station.name, station.url);
    controller.switch_to(station).await;

    let listen_for = Duration::from_secs(5);
    let deadline = tokio::time::Instant::now() + listen_for;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match timeout(remaining, controller.next_event()).await {
            Ok(Some(event)) => {
                println!("event: {event:?}");
                if matches!(
                    event,
                    ControllerEvent::SessionErrored | ControllerEvent::SessionEnded
                ) {
                    break;
                }
            }
            Ok(None) => break,
            Err(_) => break,
        }
    }

    controller.stop().await;

    let appended: usize = element
        .attach_log()
        .iter()
        .map(|handle| {
            element
                .appended(handle)
                .iter()
                .map(|chunk| chunk.len())
                .sum::<usize>()
        })
        .sum();
    println!("buffered {appended} bytes across {} segment(s)", element.attach_log().len());

    let log = diagnostics.entries().await;
    if log.is_empty() {
        println!("no diagnostics reported");
    } else {
        for (context, entries) in log {
            for entry in entries {
                println!("[{}] {}: {}", entry.date, context, entry.message);
            }
        }
    }
}
