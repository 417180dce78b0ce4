//! Runtime version discovery from the project's `package.json`

use std::path::Path;

use livesync_core::prelude::*;
use livesync_core::Platform;
use serde_json::Value;

const PACKAGE_JSON: &str = "package.json";

/// Version of the platform runtime a project declares.
///
/// Reads `nativescript.<runtime package>.version`, e.g.
/// `{"nativescript": {"tns-android": {"version": "5.0.0"}}}`.
pub fn project_runtime_version(project_dir: &Path, platform: Platform) -> Result<String> {
    let path = project_dir.join(PACKAGE_JSON);
    if !path.is_file() {
        return Err(Error::NoProject {
            path: project_dir.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(&path)?;
    let package: Value = serde_json::from_str(&content)?;

    package
        .get("nativescript")
        .and_then(|ns| ns.get(platform.runtime_package()))
        .and_then(|runtime| runtime.get("version"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::RuntimeVersionMissing {
            platform: platform.to_string(),
            path,
        })
}
