//! Tool Call Logger
//!
//! Write-only audit trail of completed tool calls. One artifact per executed
//! batch. Nothing here may fail a turn: write errors are reported through
//! `tracing` and otherwise dropped.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::message::ToolResultMessage;

/// One logged tool call
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallLogEntry {
    pub tool_call_id: String,
    pub name: String,
    pub args: serde_json::Value,
    pub content: String,
    pub timestamp: DateTime<Local>,
}

impl ToolCallLogEntry {
    pub fn from_result(result: &ToolResultMessage, timestamp: DateTime<Local>) -> Self {
        Self {
            tool_call_id: result.call_id.clone(),
            name: result.tool_name.clone(),
            args: result.arguments.clone(),
            content: result.content.clone(),
            timestamp,
        }
    }
}

/// Sink for completed tool-call batches
#[async_trait]
pub trait CallLogger: Send + Sync {
    /// Record a completed batch. Infallible by contract.
    async fn log(&self, batch: &[ToolResultMessage]);
}

/// Discards everything
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopCallLogger;

#[async_trait]
impl CallLogger for NoopCallLogger {
    async fn log(&self, _batch: &[ToolResultMessage]) {}
}

/// Writes each batch as a pretty-printed JSON array to
/// `<dir>/tool_calls_<YYYYmmdd_HHMMSS>.json`.
///
/// Two batches finishing within the same second share a file name; the
/// later one wins.
#[derive(Clone, Debug)]
pub struct JsonFileCallLogger {
    dir: PathBuf,
}

impl JsonFileCallLogger {
    /// Logger writing into `dir`, which is created on first write if missing
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name used for a batch completed at `at`
    pub fn file_name(at: DateTime<Local>) -> String {
        format!("tool_calls_{}.json", at.format("%Y%m%d_%H%M%S"))
    }

    async fn write_batch(&self, batch: &[ToolResultMessage]) -> std::io::Result<PathBuf> {
        let now = Local::now();
        let entries: Vec<_> = batch
            .iter()
            .map(|r| ToolCallLogEntry::from_result(r, now))
            .collect();
        let body = serde_json::to_vec_pretty(&entries)?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(Self::file_name(now));
        tokio::fs::write(&path, body).await?;
        Ok(path)
    }
}

#[async_trait]
impl CallLogger for JsonFileCallLogger {
    async fn log(&self, batch: &[ToolResultMessage]) {
        if batch.is_empty() {
            return;
        }
        match self.write_batch(batch).await {
            Ok(path) => tracing::debug!(path = %path.display(), calls = batch.len(), "Logged tool calls"),
            Err(e) => tracing::warn!(dir = %self.dir.display(), error = %e, "Failed to write tool call log"),
        }
    }
}

/// Keeps batches in memory, for tests and diagnostics endpoints
#[derive(Debug, Default)]
pub struct MemoryCallLogger {
    batches: Mutex<Vec<Vec<ToolCallLogEntry>>>,
}

impl MemoryCallLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all logged batches, oldest first
    pub fn batches(&self) -> Vec<Vec<ToolCallLogEntry>> {
        self.batches
            .lock()
            .map(|b| b.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CallLogger for MemoryCallLogger {
    async fn log(&self, batch: &[ToolResultMessage]) {
        let now = Local::now();
        let entries = batch
            .iter()
            .map(|r| ToolCallLogEntry::from_result(r, now))
            .collect();
        match self.batches.lock() {
            Ok(mut batches) => batches.push(entries),
            Err(_) => tracing::warn!("Call log mutex poisoned, dropping batch"),
        }
    }
}
