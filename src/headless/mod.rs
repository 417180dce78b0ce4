//! Headless mode - NDJSON event output
//!
//! The `livesync` binary has no interactive UI. It reports progress as
//! newline-delimited JSON on stdout, one event per line, so editors and test
//! scripts can follow a sync session.
//!
//! # Example Output
//!
//! ```json
//! {"event":"sync_started","kind":"full","changed":12,"removed":0,"timestamp":1704700001000}
//! {"event":"sync_completed","kind":"full","did_refresh":true,"did_recover":false,"restarted":true,"files":12,"duration_ms":2140,"timestamp":1704700003140}
//! {"event":"sync_started","kind":"watch","changed":1,"removed":0,"timestamp":1704700010000}
//! {"event":"sync_completed","kind":"watch","did_refresh":true,"did_recover":false,"restarted":false,"files":1,"duration_ms":180,"timestamp":1704700010180}
//! {"event":"shutdown","timestamp":1704700020000}
//! ```

pub mod runner;

use chrono::Utc;
use serde::Serialize;
use std::io::{self, Write};
use tracing::error;

use livesync_engine::SyncResult;

/// Which entry point a sync went through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncKind {
    Full,
    Watch,
}

/// Events emitted in headless mode
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HeadlessEvent {
    /// A sync request was handed to the orchestrator
    SyncStarted {
        kind: SyncKind,
        changed: usize,
        removed: usize,
        timestamp: i64,
    },

    /// A sync request finished
    SyncCompleted {
        kind: SyncKind,
        did_refresh: bool,
        did_recover: bool,
        restarted: bool,
        files: usize,
        duration_ms: u64,
        timestamp: i64,
    },

    /// A sync request failed
    SyncFailed {
        kind: SyncKind,
        error: String,
        fatal: bool,
        timestamp: i64,
    },

    /// The file watcher reported an error
    WatcherError { message: String, timestamp: i64 },

    /// The session ended
    Shutdown { timestamp: i64 },
}

impl HeadlessEvent {
    /// Emit this event to stdout as JSON
    pub fn emit(&self) {
        let json = match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize headless event: {}", e);
                return;
            }
        };

        let mut stdout = io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{}", json) {
            error!("Failed to write headless event to stdout: {}", e);
            return;
        }

        if let Err(e) = stdout.flush() {
            error!("Failed to flush headless stdout: {}", e);
        }
    }

    /// Get current timestamp in milliseconds
    fn now() -> i64 {
        Utc::now().timestamp_millis()
    }

    // ─────────────────────────────────────────────────────────
    // Convenience constructors
    // ─────────────────────────────────────────────────────────

    pub fn sync_started(kind: SyncKind, changed: usize, removed: usize) -> Self {
        Self::SyncStarted {
            kind,
            changed,
            removed,
            timestamp: Self::now(),
        }
    }

    pub fn sync_completed(kind: SyncKind, result: &SyncResult, duration_ms: u64) -> Self {
        Self::SyncCompleted {
            kind,
            did_refresh: result.did_refresh,
            did_recover: result.did_recover,
            restarted: result.restarted,
            files: result.modified_files_data.len(),
            duration_ms,
            timestamp: Self::now(),
        }
    }

    pub fn sync_failed(kind: SyncKind, error: String, fatal: bool) -> Self {
        Self::SyncFailed {
            kind,
            error,
            fatal,
            timestamp: Self::now(),
        }
    }

    pub fn watcher_error(message: String) -> Self {
        Self::WatcherError {
            message,
            timestamp: Self::now(),
        }
    }

    pub fn shutdown() -> Self {
        Self::Shutdown {
            timestamp: Self::now(),
        }
    }
}
