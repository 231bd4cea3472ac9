//! Injected diagnostics log for the web-radio streaming engine.
//!
//! The engine never touches ambient storage: every component that wants to
//! leave a trace receives an `Arc<dyn Diagnostics>` and calls
//! [`Diagnostics::report`]. Reporting is fire-and-forget; a store that fails
//! to persist emits a `tracing` warning and swallows the error so that
//! diagnostics can never take a streaming session down.
//!
//! Entries are grouped by a free-form context string (usually the call site,
//! e.g. `"BufferSink::close"`) and kept in arrival order. There is no size
//! bound or rotation; unbounded growth is a known limitation.

pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub use store::FileLogStore;

/// One diagnostic entry under a context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub date: DateTime<Utc>,
    pub message: String,
}

/// The whole log structure: context string → ordered entries.
pub type LogMap = BTreeMap<String, Vec<LogEntry>>;

/// Sink for structured error notifications emitted by the engine.
#[async_trait::async_trait]
pub trait Diagnostics: Send + Sync {
    /// Appends one entry under `context`, preserving prior entries.
    /// Must never fail outward.
    async fn report(&self, context: &str, message: &str);
}

/// In-memory recorder, for tests and embedders without persistence.
#[derive(Default)]
pub struct MemoryDiagnostics {
    entries: Mutex<LogMap>,
}

impl MemoryDiagnostics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of everything reported so far.
    pub async fn entries(&self) -> LogMap {
        self.entries.lock().await.clone()
    }

    /// Messages reported under one context, in arrival order.
    pub async fn messages(&self, context: &str) -> Vec<String> {
        self.entries
            .lock()
            .await
            .get(context)
            .map(|entries| entries.iter().map(|e| e.message.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl Diagnostics for MemoryDiagnostics {
    async fn report(&self, context: &str, message: &str) {
        tracing::debug!(context, message, "diagnostic reported");
        self.entries
            .lock()
            .await
            .entry(context.to_string())
            .or_default()
            .push(LogEntry {
                date: Utc::now(),
                message: message.to_string(),
            });
    }
}

/// Discards every report.
pub struct NullDiagnostics;

#[async_trait::async_trait]
impl Diagnostics for NullDiagnostics {
    async fn report(&self, _context: &str, _message: &str) {}
}
