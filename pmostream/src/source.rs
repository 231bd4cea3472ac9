//! Network byte producer.
//!
//! [`ChunkSource`] pulls a remote broadcast chunk-by-chunk and forwards the
//! bytes, in arrival order, over an mpsc channel toward the buffer sink.
//! Cancellation is cooperative: the stop token is checked at every
//! suspension point (the network read and the channel send), so an abort
//! never waits for more than one outstanding read, even under backpressure.

use crate::error::{Result, StreamError};
use bytes::Bytes;
use futures_util::StreamExt;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Default timeout for establishing the HTTP connection (seconds).
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default User-Agent presented to the broadcaster.
pub const DEFAULT_USER_AGENT: &str = "pmoplayer/0.1 (pmostream)";

/// Tunables for the network producer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Connection timeout in seconds. Radio streams are endless, so there is
    /// deliberately no overall request timeout.
    pub connect_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Pulls one remote byte stream and emits its chunks in order.
///
/// Holds no playback state; its only side effect is emitting chunks, end of
/// stream (channel close), or an error to its caller.
pub struct ChunkSource {
    url: String,
    config: SourceConfig,
}

impl ChunkSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_config(url, SourceConfig::default())
    }

    pub fn with_config(url: impl Into<String>, config: SourceConfig) -> Self {
        Self {
            url: url.into(),
            config,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Opens the stream and forwards chunks until end-of-stream, error, or
    /// cancellation.
    ///
    /// Returns `Ok(())` on both end-of-stream and cancellation; cancellation
    /// is not an error. Dropping the returned future after the token is
    /// cancelled also aborts the in-flight read, since reqwest reads are
    /// cancel-safe.
    pub async fn run(self, tx: mpsc::Sender<Bytes>, stop: CancellationToken) -> Result<()> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(self.config.connect_timeout_secs))
            .user_agent(&self.config.user_agent)
            .build()?;

        let response = tokio::select! {
            _ = stop.cancelled() => return Ok(()),
            response = client.get(&self.url).send() => response?,
        };

        if !response.status().is_success() {
            return Err(StreamError::HttpStatus {
                status: response.status().as_u16(),
                url: self.url,
            });
        }

        // Icecast/Shoutcast streams advertise their display name here.
        if let Some(name) = response
            .headers()
            .get("icy-name")
            .and_then(|v| v.to_str().ok())
        {
            tracing::info!(url = %self.url, icy_name = name, "broadcast stream open");
        } else {
            tracing::debug!(url = %self.url, "broadcast stream open");
        }

        let mut chunks = response.bytes_stream();
        loop {
            let next = tokio::select! {
                _ = stop.cancelled() => return Ok(()),
                next = chunks.next() => next,
            };

            let chunk = match next {
                Some(chunk) => chunk?,
                None => {
                    tracing::debug!(url = %self.url, "end of network stream");
                    return Ok(());
                }
            };
            if chunk.is_empty() {
                continue;
            }

            tokio::select! {
                _ = stop.cancelled() => return Ok(()),
                sent = tx.send(chunk) => sent.map_err(|_| StreamError::SinkClosed)?,
            }
        }
    }
}
