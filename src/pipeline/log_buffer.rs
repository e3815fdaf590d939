//! Structured build log with a persistence byte budget

use std::sync::Mutex;

use chrono::Utc;

use crate::models::deployment::{LogEntry, LogLevel};

/// Estimated serialized size of an entry beyond its message: timestamp,
/// stage, level and record overhead
pub const LOG_ENTRY_OVERHEAD: usize = 135;

/// Default persisted log budget in bytes
pub const DEFAULT_LOG_BUDGET: usize = 400 * 1024;

/// Message of the synthetic entry appended when logs are trimmed
pub const TRUNCATION_NOTICE: &str = "Log output exceeded size limit. Older logs truncated.";

/// Append-only, thread-safe build log for a single pipeline execution.
///
/// One buffer is allocated per build; sharing a buffer across concurrent
/// builds would interleave their entries.
pub struct BuildLogBuffer {
    entries: Mutex<Vec<LogEntry>>,
    budget: usize,
}

impl BuildLogBuffer {
    pub fn new(budget: usize) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            budget,
        }
    }

    /// Append an entry stamped with the current time
    pub fn append(&self, stage: &str, level: LogLevel, message: impl Into<String>) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            stage: stage.to_string(),
            level,
            message: message.into(),
        };

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.push(entry);
    }

    pub fn info(&self, stage: &str, message: impl Into<String>) {
        self.append(stage, LogLevel::Info, message);
    }

    pub fn warning(&self, stage: &str, message: impl Into<String>) {
        self.append(stage, LogLevel::Warning, message);
    }

    pub fn error(&self, stage: &str, message: impl Into<String>) {
        self.append(stage, LogLevel::Error, message);
    }

    /// Copy of all entries, unbounded (diagnostics only)
    pub fn snapshot(&self) -> Vec<LogEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.clone()
    }

    /// Entries fitting within the byte budget, earliest first.
    ///
    /// When entries are dropped, a single synthetic `system`/`warning`
    /// truncation notice terminates the view. Oldest-first retention keeps
    /// the initial failure context.
    pub fn bounded(&self) -> Vec<LogEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        let mut total = 0usize;
        let mut result = Vec::with_capacity(entries.len());
        for entry in entries.iter() {
            let entry_size = LOG_ENTRY_OVERHEAD + entry.message.len();
            if total + entry_size > self.budget {
                result.push(LogEntry {
                    timestamp: Utc::now(),
                    stage: "system".to_string(),
                    level: LogLevel::Warning,
                    message: TRUNCATION_NOTICE.to_string(),
                });
                break;
            }
            result.push(entry.clone());
            total += entry_size;
        }

        result
    }

    /// Drop all entries
    pub fn clear(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.clear();
    }
}
