//! Android device access through `adb`
//!
//! Every operation shells out to `adb -s <serial> ...`. The live sync socket
//! is reached by forwarding a free local TCP port to the abstract unix socket
//! `<app_id>-livesync` that the runtime listens on. One forward is kept per
//! application and removed once it stops leading to a listener.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::process::Command;

use crate::device::{BoxedSocket, Device};
use livesync_core::prelude::*;
use livesync_core::Platform;

/// Suffix of the abstract socket the runtime listens on
const LIVESYNC_SOCKET_SUFFIX: &str = "-livesync";

/// How long a fresh connection must stay open to count as a live listener.
///
/// adb accepts the host side of a forward even when nothing listens on the
/// device and closes it right away.
const LISTENER_PROBE: Duration = Duration::from_millis(250);

/// An Android device or emulator reachable through adb
#[derive(Debug, Clone)]
pub struct AdbDevice {
    serial: String,
    adb_path: PathBuf,
    /// Host port forwarded for each application
    forwards: Arc<Mutex<HashMap<String, u16>>>,
}

impl AdbDevice {
    /// Create a device handle, locating `adb` on the PATH or in the SDK.
    pub fn new(serial: impl Into<String>) -> Result<Self> {
        Ok(Self::with_adb_path(serial, locate_adb()?))
    }

    pub fn with_adb_path(serial: impl Into<String>, adb_path: impl Into<PathBuf>) -> Self {
        Self {
            serial: serial.into(),
            adb_path: adb_path.into(),
            forwards: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn adb_path(&self) -> &Path {
        &self.adb_path
    }

    /// Run an adb command against this device and return its output.
    ///
    /// A non-zero exit status is reported as [`Error::DeviceIo`] with stderr.
    async fn run(&self, args: &[&str]) -> Result<Output> {
        trace!("adb -s {} {}", self.serial, args.join(" "));

        let output = Command::new(&self.adb_path)
            .arg("-s")
            .arg(&self.serial)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::device_io(format!("Failed to run adb: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::device_io(format!(
                "adb {} failed: {}",
                args.first().copied().unwrap_or_default(),
                stderr.trim()
            )));
        }

        Ok(output)
    }

    fn lock_forwards(&self) -> std::sync::MutexGuard<'_, HashMap<String, u16>> {
        self.forwards.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Host port currently forwarded for `app_id`
    pub fn forwarded_port(&self, app_id: &str) -> Option<u16> {
        self.lock_forwards().get(app_id).copied()
    }

    /// The forward for `app_id`, creating one if none is recorded.
    async fn ensure_forward(&self, app_id: &str) -> Result<u16> {
        if let Some(port) = self.forwarded_port(app_id) {
            return Ok(port);
        }

        let target = format!("localabstract:{}{}", app_id, LIVESYNC_SOCKET_SUFFIX);
        let output = self.run(&["forward", "tcp:0", &target]).await?;
        let port = parse_forward_port(&String::from_utf8_lossy(&output.stdout))?;
        debug!("Forwarded tcp:{} to {}", port, target);

        self.lock_forwards().insert(app_id.to_string(), port);
        Ok(port)
    }

    /// Remove the forward recorded for `app_id`, if any.
    pub async fn remove_forward(&self, app_id: &str) -> Result<()> {
        let Some(port) = self.lock_forwards().remove(app_id) else {
            return Ok(());
        };
        self.run(&["forward", "--remove", &format!("tcp:{}", port)])
            .await?;
        debug!("Removed forward tcp:{} for {}", port, app_id);
        Ok(())
    }

    /// Remove a forward that no longer leads anywhere; adb may have dropped
    /// it already.
    async fn discard_forward(&self, app_id: &str) {
        if let Err(e) = self.remove_forward(app_id).await {
            trace!("Forward for {} already gone: {}", app_id, e);
        }
    }

    /// Remove every forward this device created.
    pub async fn remove_forwards(&self) {
        let apps: Vec<String> = self.lock_forwards().keys().cloned().collect();
        for app_id in apps {
            if let Err(e) = self.remove_forward(&app_id).await {
                warn!("Failed to remove forward for {}: {}", app_id, e);
            }
        }
    }

    async fn shell(&self, args: &[&str]) -> Result<String> {
        let mut full = vec!["shell"];
        full.extend_from_slice(args);
        let output = self.run(&full).await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Device for AdbDevice {
    fn identifier(&self) -> &str {
        &self.serial
    }

    fn platform(&self) -> Platform {
        Platform::Android
    }

    async fn list_remote_file(&self, path: &str) -> Result<Option<String>> {
        match self.shell(&["ls", path]).await {
            Ok(listing) => Ok(parse_listing(&listing)),
            Err(Error::DeviceIo { message }) => {
                // newer adb propagates the exit status of `ls` for missing paths
                trace!("Remote listing of {} failed: {}", path, message);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn push_file(&self, local: &Path, remote_path: &str) -> Result<()> {
        let local = local.to_string_lossy();
        self.run(&["push", &local, remote_path]).await?;
        Ok(())
    }

    async fn pull_file(&self, remote_path: &str, local_dir: &Path) -> Result<()> {
        let local_dir = local_dir.to_string_lossy();
        self.run(&["pull", remote_path, &local_dir]).await?;
        Ok(())
    }

    async fn delete_remote_path(&self, path: &str) -> Result<()> {
        self.shell(&["rm", "-rf", path]).await?;
        Ok(())
    }

    async fn socket_handle(&self, app_id: &str) -> Result<Option<BoxedSocket>> {
        let port = self.ensure_forward(app_id).await?;

        let stream = match TcpStream::connect(("127.0.0.1", port)).await {
            Ok(stream) => stream,
            Err(e) => {
                debug!("Live sync socket for {} not reachable: {}", app_id, e);
                self.discard_forward(app_id).await;
                return Ok(None);
            }
        };

        if !listener_alive(&stream).await {
            debug!("Nothing listens for {} behind tcp:{}", app_id, port);
            self.discard_forward(app_id).await;
            return Ok(None);
        }

        debug!("Connected to {} through tcp:{}", app_id, port);
        Ok(Some(Box::new(stream)))
    }

    async fn restart_application(&self, app_id: &str) -> Result<()> {
        info!("Restarting {} on {}", app_id, self.serial);
        self.shell(&["am", "force-stop", app_id]).await?;
        self.shell(&[
            "monkey",
            "-p",
            app_id,
            "-c",
            "android.intent.category.LAUNCHER",
            "1",
        ])
        .await?;
        Ok(())
    }
}

/// False when the connection is closed before [`LISTENER_PROBE`] elapses.
async fn listener_alive(stream: &TcpStream) -> bool {
    let mut probe = [0u8; 1];
    match tokio::time::timeout(LISTENER_PROBE, stream.peek(&mut probe)).await {
        Ok(Ok(0)) | Ok(Err(_)) => false,
        Ok(Ok(_)) | Err(_) => true,
    }
}

/// Interpret `adb shell ls <path>` output.
///
/// Empty output means nothing was listed.
fn parse_listing(output: &str) -> Option<String> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parse the port printed by `adb forward tcp:0 ...`
fn parse_forward_port(output: &str) -> Result<u16> {
    output
        .trim()
        .parse::<u16>()
        .map_err(|_| Error::device_io(format!("Unexpected adb forward output: {:?}", output)))
}

/// Find the adb executable.
///
/// Checks PATH first, then `$ANDROID_HOME/platform-tools` and
/// `$ANDROID_SDK_ROOT/platform-tools`.
pub fn locate_adb() -> Result<PathBuf> {
    if let Ok(path) = which::which("adb") {
        return Ok(path);
    }

    for var in ["ANDROID_HOME", "ANDROID_SDK_ROOT"] {
        if let Ok(sdk) = std::env::var(var) {
            let candidate = Path::new(&sdk).join("platform-tools").join(adb_file_name());
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }

    Err(Error::ToolNotFound {
        tool: "adb".to_string(),
    })
}

fn adb_file_name() -> &'static str {
    if cfg!(windows) {
        "adb.exe"
    } else {
        "adb"
    }
}
