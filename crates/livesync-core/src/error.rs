//! Engine error types with fatal/recoverable classification

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Engine error types organized by layer
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Device Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Device I/O error: {message}")]
    DeviceIo { message: String },

    #[error("Device tool not found: {tool}")]
    ToolNotFound { tool: String },

    #[error("Unsupported platform: {platform}")]
    UnsupportedPlatform { platform: String },

    // ─────────────────────────────────────────────────────────────
    // Manifest Errors
    // ─────────────────────────────────────────────────────────────
    #[error("No hash manifest on device for {app_id}")]
    ManifestUnavailable { app_id: String },

    // ─────────────────────────────────────────────────────────────
    // Transport Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Live sync socket unavailable for {app_id}")]
    TransportUnavailable { app_id: String },

    #[error("Live sync socket write failed: {message}")]
    ProtocolWrite { message: String },

    #[error("Live sync protocol error: {message}")]
    Protocol { message: String },

    #[error("Channel closed unexpectedly")]
    ChannelClosed,

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("No project found in: {path}")]
    NoProject { path: PathBuf },

    #[error("Runtime version not declared for {platform} in {path}")]
    RuntimeVersionMissing { platform: String, path: PathBuf },
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn device_io(message: impl Into<String>) -> Self {
        Self::DeviceIo {
            message: message.into(),
        }
    }

    pub fn unsupported_platform(platform: impl Into<String>) -> Self {
        Self::UnsupportedPlatform {
            platform: platform.into(),
        }
    }

    pub fn manifest_unavailable(app_id: impl Into<String>) -> Self {
        Self::ManifestUnavailable {
            app_id: app_id.into(),
        }
    }

    pub fn transport_unavailable(app_id: impl Into<String>) -> Self {
        Self::TransportUnavailable {
            app_id: app_id.into(),
        }
    }

    pub fn protocol_write(message: impl Into<String>) -> Self {
        Self::ProtocolWrite {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Errors the orchestrator absorbs by falling back to a heavier sync path
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::DeviceIo { .. }
                | Error::ManifestUnavailable { .. }
                | Error::TransportUnavailable { .. }
                | Error::ProtocolWrite { .. }
                | Error::Protocol { .. }
                | Error::ChannelClosed
        )
    }

    /// Check if this error should abort the sync session
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedPlatform { .. }
                | Error::ToolNotFound { .. }
                | Error::NoProject { .. }
                | Error::RuntimeVersionMissing { .. }
        )
    }

    /// True for failures of the live socket itself
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::TransportUnavailable { .. }
                | Error::ProtocolWrite { .. }
                | Error::Protocol { .. }
                | Error::ChannelClosed
        )
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}
