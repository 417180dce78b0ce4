//! Device collaborator interface
//!
//! The sync engine never talks to device tooling directly. File transfer, the
//! socket into the running application and application restarts all go
//! through the [`Device`] trait. [`crate::AdbDevice`] is the production implementation for
//! Android; tests use `test_utils::FakeDevice`.

use std::path::Path;

use tokio::io::{AsyncRead, AsyncWrite};

use livesync_core::prelude::*;
use livesync_core::Platform;

/// A bidirectional byte stream into a running application.
pub trait SocketStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> SocketStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Owned socket handle returned by [`Device::socket_handle`].
pub type BoxedSocket = Box<dyn SocketStream>;

/// Operations the sync engine consumes from a connected device.
///
/// All methods are suspension points. Timeouts are the implementation's
/// concern and surface as [`Error::DeviceIo`] like any other failure.
#[trait_variant::make(Device: Send)]
pub trait LocalDevice {
    /// Device identifier (serial / UDID)
    fn identifier(&self) -> &str;

    /// Platform of the device
    fn platform(&self) -> Platform;

    /// List a single remote path.
    ///
    /// Returns the raw listing output, or `None` when the path is absent.
    /// Callers must compare the output against the path they asked for since
    /// shells may echo errors or partial matches.
    async fn list_remote_file(&self, path: &str) -> Result<Option<String>>;

    /// Copy a local file to `remote_path`, replacing any existing file.
    async fn push_file(&self, local: &Path, remote_path: &str) -> Result<()>;

    /// Copy `remote_path` into `local_dir`, keeping its file name.
    async fn pull_file(&self, remote_path: &str, local_dir: &Path) -> Result<()>;

    /// Delete a remote file or directory tree.
    async fn delete_remote_path(&self, path: &str) -> Result<()>;

    /// Open a socket to the live sync listener inside `app_id`.
    ///
    /// `Ok(None)` means the application is not listening (not started,
    /// crashed, or built without live sync support).
    async fn socket_handle(&self, app_id: &str) -> Result<Option<BoxedSocket>>;

    /// Terminate and relaunch `app_id`.
    async fn restart_application(&self, app_id: &str) -> Result<()>;
}
