//! # livesync-device - Device Access for Live Sync
//!
//! Everything the sync engine does on a device goes through this crate: the
//! [`Device`] collaborator trait, the per-application [`HashManifestStore`],
//! the live sync socket wire format, and the [`TransportChannel`] that
//! carries reload commands into a running application.
//!
//! Depends on [`livesync_core`] for domain types and error handling.
//!
//! ## Public API
//!
//! ### Device Access
//! - [`Device`] - Async collaborator trait (list, push, pull, delete, socket, restart)
//! - [`AdbDevice`] - Android implementation backed by `adb`
//!
//! ### Hash Manifest
//! - [`HashManifest`] - Local path → content digest ledger
//! - [`HashManifestStore`] - Reads/writes the ledger of one app on one device
//! - [`file_digest()`] - SHA-256 of a file, hex encoded
//!
//! ### Live Sync Socket
//! - [`encode_frame()`], [`read_frame()`] - Length-prefixed UTF-16LE JSON framing
//! - [`ReloadCommand`], [`ListenerReply`] - Messages exchanged with the listener
//! - [`TransportChannel`] - Owned socket with a reader task and idempotent teardown

pub mod adb;
pub mod channel;
pub mod device;
pub mod framing;
pub mod hash_manifest;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;

// Public API re-exports
pub use adb::{locate_adb, AdbDevice};
pub use channel::{ChannelState, TeardownReason, TransportChannel};
pub use device::{BoxedSocket, Device, LocalDevice, SocketStream};
pub use framing::{
    decode_utf16le, encode_frame, encode_utf16le, read_frame, write_frame, ListenerReply,
    ReloadCommand, RELOAD_METHOD,
};
pub use hash_manifest::{
    file_digest, HashManifest, HashManifestStore, DEFAULT_DEVICE_ROOT, HASH_FILE_NAME,
};
