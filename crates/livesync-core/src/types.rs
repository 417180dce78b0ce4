//! Domain types shared by the device layer and the sync engine

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Target platform of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[serde(rename = "ios")]
    IOS,
    Android,
}

impl Platform {
    /// Parse a platform name as reported by device tooling.
    ///
    /// Anything other than Android or iOS has no sync strategy and is rejected
    /// with [`Error::UnsupportedPlatform`].
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "android" => Ok(Platform::Android),
            "ios" => Ok(Platform::IOS),
            other => Err(Error::unsupported_platform(other)),
        }
    }

    /// Key used for the runtime entry in a project's `package.json`
    pub fn runtime_package(&self) -> &'static str {
        match self {
            Platform::Android => "tns-android",
            Platform::IOS => "tns-ios",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::IOS => write!(f, "iOS"),
            Platform::Android => write!(f, "Android"),
        }
    }
}

/// An application installed on a device, plus where its synced files live
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceAppData {
    /// Application identifier (package name / bundle id)
    pub app_identifier: String,

    /// Platform of the device the app runs on
    pub platform: Platform,

    /// Local project directory the synced files are taken from
    pub project_root: PathBuf,

    /// Device directory that mirrors `project_root`
    pub device_project_root: String,
}

impl DeviceAppData {
    pub fn new(
        app_identifier: impl Into<String>,
        platform: Platform,
        project_root: impl Into<PathBuf>,
        device_project_root: impl Into<String>,
    ) -> Self {
        Self {
            app_identifier: app_identifier.into(),
            platform,
            project_root: project_root.into(),
            device_project_root: device_project_root.into(),
        }
    }

    /// Map a local file to its location on the device.
    ///
    /// Files outside the project root are placed by file name directly under
    /// the device root.
    pub fn device_path_for(&self, local: &Path) -> String {
        let relative = local
            .strip_prefix(&self.project_root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| {
                local
                    .file_name()
                    .map(PathBuf::from)
                    .unwrap_or_default()
            });

        let mut device_path = self.device_project_root.trim_end_matches('/').to_string();
        for component in relative.components() {
            device_path.push('/');
            device_path.push_str(&component.as_os_str().to_string_lossy());
        }
        device_path
    }
}

/// Kind of change recorded for one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Modified,
    Removed,
}

/// One entry of a change set: a local file and its device counterpart
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEntry {
    pub local_path: PathBuf,
    pub device_path: String,
    pub kind: ChangeKind,
}

impl ChangeEntry {
    pub fn modified(local_path: impl Into<PathBuf>, device_path: impl Into<String>) -> Self {
        Self {
            local_path: local_path.into(),
            device_path: device_path.into(),
            kind: ChangeKind::Modified,
        }
    }

    pub fn removed(local_path: impl Into<PathBuf>, device_path: impl Into<String>) -> Self {
        Self {
            local_path: local_path.into(),
            device_path: device_path.into(),
            kind: ChangeKind::Removed,
        }
    }

    pub fn is_removed(&self) -> bool {
        self.kind == ChangeKind::Removed
    }
}
