//! Settings parser for .livesync/config.toml

use std::path::Path;

use super::types::Settings;
use livesync_core::prelude::*;

const CONFIG_FILENAME: &str = "config.toml";
const LIVESYNC_DIR: &str = ".livesync";

const DEFAULT_CONFIG: &str = r#"# Mobile live sync configuration

[sync]
device_root = "/data/local/tmp"                    # Hash manifests live in <device_root>/<app_id>/hashes
device_app_root = "/data/local/tmp/{app_id}/sync"  # Where project files are pushed
# Changes matching these patterns always restart the app (case-insensitive)
structural_patterns = [
    "**/App_Resources/**",
    "**/package.json",
    "**/*.so",
    "**/*.jar",
    "**/*.aar",
    "**/*.dex",
    "**/*.framework/**",
]

[transport]
android_min_socket_runtime = "4.2.0-2018-07-20-02"
ios_min_socket_runtime = "0.0.0"
ignore_cache = false
android_confirm_timeout_ms = 5000   # 0 = do not wait for the app to confirm
ios_confirm_timeout_ms = 0

[watcher]
paths = ["app"]
debounce_ms = 300
extensions = []                     # Empty = all files
"#;

/// Load settings from `.livesync/config.toml`.
///
/// A missing or invalid file yields the defaults.
pub fn load_settings(project_path: &Path) -> Settings {
    let config_path = project_path.join(LIVESYNC_DIR).join(CONFIG_FILENAME);

    if !config_path.exists() {
        debug!("No config file at {:?}, using defaults", config_path);
        return Settings::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", config_path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", config_path, e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", config_path, e);
            Settings::default()
        }
    }
}

/// Create `.livesync/config.toml` with commented defaults if it is missing
pub fn init_config_dir(project_path: &Path) -> Result<()> {
    let livesync_dir = project_path.join(LIVESYNC_DIR);

    if !livesync_dir.exists() {
        std::fs::create_dir_all(&livesync_dir)
            .map_err(|e| Error::config(format!("Failed to create .livesync dir: {}", e)))?;
    }

    let config_path = livesync_dir.join(CONFIG_FILENAME);
    if !config_path.exists() {
        std::fs::write(&config_path, DEFAULT_CONFIG)
            .map_err(|e| Error::config(format!("Failed to write config.toml: {}", e)))?;
        info!("Created {:?}", config_path);
    }

    Ok(())
}
