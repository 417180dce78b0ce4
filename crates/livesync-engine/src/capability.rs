//! Capability selection from the runtime version
//!
//! Runtimes that embed the live sync listener accept reload commands over a
//! socket; older ones only pick up pushed files after a restart.

use std::fmt;

use livesync_core::prelude::*;
use semver::Version;
use serde::Serialize;

/// How changes reach a running application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Push files, then reload in-process over the live sync socket
    Socket,
    /// Push files, then restart the application
    Legacy,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Socket => write!(f, "socket"),
            StrategyKind::Legacy => write!(f, "legacy"),
        }
    }
}

/// Parse a runtime version, tolerating a leading `v` and surrounding
/// whitespace.
pub fn parse_runtime_version(version: &str) -> Option<Version> {
    let trimmed = version.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    Version::parse(trimmed).ok()
}

/// Pick a strategy for `runtime_version`.
///
/// Only versions strictly greater than `threshold` (semver precedence,
/// pre-releases sort before their release) get the socket. Equal, lower and
/// unparsable versions fall back to legacy.
pub fn select_strategy(runtime_version: &str, threshold: &str) -> StrategyKind {
    let Some(version) = parse_runtime_version(runtime_version) else {
        warn!(
            "Unparsable runtime version {:?}, using legacy sync",
            runtime_version
        );
        return StrategyKind::Legacy;
    };
    let Some(threshold) = parse_runtime_version(threshold) else {
        warn!(
            "Unparsable socket runtime threshold {:?}, using legacy sync",
            threshold
        );
        return StrategyKind::Legacy;
    };

    if version > threshold {
        StrategyKind::Socket
    } else {
        StrategyKind::Legacy
    }
}
