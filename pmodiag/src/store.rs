//! JSON-file-backed diagnostics store.
//!
//! The on-disk format is one JSON document keyed by a single log identifier:
//!
//! ```json
//! { "error": { "<context>": [ { "date": "...", "message": "..." } ] } }
//! ```
//!
//! Reads return the whole structure, or empty when nothing was written yet.
//! Writes append one entry under a context while preserving prior entries.

use crate::{Diagnostics, LogEntry, LogMap};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Default identifier the log structure is stored under.
pub const DEFAULT_LOG_KEY: &str = "error";

/// Persistent diagnostics keyed by a single log identifier.
pub struct FileLogStore {
    path: PathBuf,
    key: String,
    /// Serializes read-modify-write cycles on the backing file.
    io_lock: Mutex<()>,
}

impl FileLogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_key(path, DEFAULT_LOG_KEY)
    }

    pub fn with_key(path: impl Into<PathBuf>, key: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            key: key.into(),
            io_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the whole persisted structure, or empty if absent.
    pub async fn read_all(&self) -> LogMap {
        let _guard = self.io_lock.lock().await;
        self.load().await
    }

    async fn load(&self) -> LogMap {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(_) => return LogMap::new(),
        };
        let mut document: BTreeMap<String, LogMap> = match serde_json::from_slice(&raw) {
            Ok(document) => document,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %self.path.display(),
                    "diagnostics file unreadable, starting over"
                );
                BTreeMap::new()
            }
        };
        document.remove(&self.key).unwrap_or_default()
    }

    async fn save(&self, log: &LogMap) -> std::io::Result<()> {
        let mut document = BTreeMap::new();
        document.insert(self.key.as_str(), log);
        let raw = serde_json::to_vec_pretty(&document)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        tokio::fs::write(&self.path, raw).await
    }
}

#[async_trait::async_trait]
impl Diagnostics for FileLogStore {
    async fn report(&self, context: &str, message: &str) {
        let _guard = self.io_lock.lock().await;
        let mut log = self.load().await;
        log.entry(context.to_string()).or_default().push(LogEntry {
            date: Utc::now(),
            message: message.to_string(),
        });
        if let Err(e) = self.save(&log).await {
            tracing::warn!(error = %e, context, "failed to persist diagnostic entry");
        }
    }
}
