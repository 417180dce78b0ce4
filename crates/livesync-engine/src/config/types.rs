//! Configuration types for mobile live sync
//!
//! Defines:
//! - `Settings` - Project settings loaded from `.livesync/config.toml`
//! - `SyncSettings`, `TransportSettings`, `WatcherSettings` - its sections

use std::time::Duration;

use livesync_core::Platform;
use livesync_device::DEFAULT_DEVICE_ROOT;
use serde::{Deserialize, Serialize};

/// Placeholder replaced by the application identifier in device paths
pub const APP_ID_PLACEHOLDER: &str = "{app_id}";

/// Project settings from `.livesync/config.toml`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub transport: TransportSettings,

    #[serde(default)]
    pub watcher: WatcherSettings,
}

/// Where files go on the device and which changes need a restart
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncSettings {
    /// Root of the per-app hash manifest directories
    #[serde(default = "default_device_root")]
    pub device_root: String,

    /// Device directory mirroring the project; `{app_id}` is substituted
    #[serde(default = "default_device_app_root")]
    pub device_app_root: String,

    /// Glob patterns (case-insensitive, matched against device paths) of
    /// files that cannot be applied to a running app
    #[serde(default = "default_structural_patterns")]
    pub structural_patterns: Vec<String>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            device_root: default_device_root(),
            device_app_root: default_device_app_root(),
            structural_patterns: default_structural_patterns(),
        }
    }
}

impl SyncSettings {
    /// Device directory mirroring the project of `app_id`
    pub fn device_app_root_for(&self, app_id: &str) -> String {
        self.device_app_root.replace(APP_ID_PLACEHOLDER, app_id)
    }
}

fn default_device_root() -> String {
    DEFAULT_DEVICE_ROOT.to_string()
}

fn default_device_app_root() -> String {
    format!("{}/{}/sync", DEFAULT_DEVICE_ROOT, APP_ID_PLACEHOLDER)
}

fn default_structural_patterns() -> Vec<String> {
    [
        "**/App_Resources/**",
        "**/package.json",
        "**/*.so",
        "**/*.jar",
        "**/*.aar",
        "**/*.dex",
        "**/*.framework/**",
    ]
    .iter()
    .map(|p| p.to_string())
    .collect()
}

/// Live sync socket settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportSettings {
    /// Android runtimes newer than this version listen on the socket
    #[serde(default = "default_android_min_socket_runtime")]
    pub android_min_socket_runtime: String,

    /// iOS runtimes newer than this version listen on the socket
    #[serde(default = "default_ios_min_socket_runtime")]
    pub ios_min_socket_runtime: String,

    /// Value of `ignoreCache` in reload commands
    #[serde(default)]
    pub ignore_cache: bool,

    /// How long to wait for an Android listener to confirm a reload;
    /// 0 disables confirmation
    #[serde(default = "default_android_confirm_timeout_ms")]
    pub android_confirm_timeout_ms: u64,

    /// Same for iOS, whose listener does not reply by default
    #[serde(default)]
    pub ios_confirm_timeout_ms: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            android_min_socket_runtime: default_android_min_socket_runtime(),
            ios_min_socket_runtime: default_ios_min_socket_runtime(),
            ignore_cache: false,
            android_confirm_timeout_ms: default_android_confirm_timeout_ms(),
            ios_confirm_timeout_ms: 0,
        }
    }
}

impl TransportSettings {
    /// Runtime version a platform must exceed to use the socket
    pub fn min_socket_runtime(&self, platform: Platform) -> &str {
        match platform {
            Platform::Android => &self.android_min_socket_runtime,
            Platform::IOS => &self.ios_min_socket_runtime,
        }
    }

    /// Reply timeout for reloads on `platform`, `None` when the listener is
    /// not expected to reply
    pub fn confirm_timeout(&self, platform: Platform) -> Option<Duration> {
        let ms = match platform {
            Platform::Android => self.android_confirm_timeout_ms,
            Platform::IOS => self.ios_confirm_timeout_ms,
        };
        (ms > 0).then(|| Duration::from_millis(ms))
    }
}

fn default_android_min_socket_runtime() -> String {
    "4.2.0-2018-07-20-02".to_string()
}

fn default_ios_min_socket_runtime() -> String {
    "0.0.0".to_string()
}

fn default_android_confirm_timeout_ms() -> u64 {
    5000
}

/// File watcher settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatcherSettings {
    /// Paths to watch (relative to project root)
    #[serde(default = "default_watch_paths")]
    pub paths: Vec<String>,

    /// Debounce duration in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// File extensions to watch; empty watches everything
    #[serde(default)]
    pub extensions: Vec<String>,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            paths: default_watch_paths(),
            debounce_ms: default_debounce_ms(),
            extensions: Vec::new(),
        }
    }
}

fn default_watch_paths() -> Vec<String> {
    vec!["app".to_string()]
}

fn default_debounce_ms() -> u64 {
    300
}
