//! Device sync strategies
//!
//! A strategy applies an already transferred change set to the running
//! application. [`SocketStrategy`] reloads in-process over the live sync
//! socket; [`LegacySyncStrategy`] always restarts. [`DeviceStrategy`] is the
//! per-session choice between the two, made by the capability selector.

mod legacy;
mod socket;

pub use legacy::LegacySyncStrategy;
pub use socket::SocketStrategy;

use livesync_core::prelude::*;
use livesync_core::{ChangeEntry, ChangeKind, DeviceAppData, Platform};
use livesync_device::{Device, TeardownReason};

use crate::capability::StrategyKind;
use crate::config::TransportSettings;

/// Common interface of the device strategies.
///
/// Both this trait and its `Send` variant are in scope inside this module,
/// so calls here go through `SyncStrategy::` paths.
#[trait_variant::make(SyncStrategy: Send)]
pub trait LocalSyncStrategy {
    fn kind(&self) -> StrategyKind;

    /// Whether changes can be applied without a restart
    fn supports_fast_apply(&self) -> bool;

    /// Apply transferred `entries` to the running app.
    ///
    /// Returns whether the app refreshed. Transport failures are returned as
    /// errors so the caller can fall back to [`LocalSyncStrategy::restart`].
    async fn apply_changes<D: Device + Sync>(
        &mut self,
        device: &D,
        app: &DeviceAppData,
        entries: &[ChangeEntry],
    ) -> Result<bool>;

    /// Terminate and relaunch the application
    async fn restart<D: Device + Sync>(&mut self, device: &D, app: &DeviceAppData) -> Result<()>;

    /// Release any connection to the application
    async fn close(&mut self, reason: TeardownReason);
}

/// Push modified entries and delete removed ones, in order.
pub async fn transfer_entries<D: Device + Sync>(device: &D, entries: &[ChangeEntry]) -> Result<()> {
    for entry in entries {
        match entry.kind {
            ChangeKind::Modified => {
                device
                    .push_file(&entry.local_path, &entry.device_path)
                    .await?
            }
            ChangeKind::Removed => device.delete_remote_path(&entry.device_path).await?,
        }
    }
    if !entries.is_empty() {
        debug!("Transferred {} change(s) to {}", entries.len(), device.identifier());
    }
    Ok(())
}

/// The strategy a session uses for its device
#[derive(Debug)]
pub enum DeviceStrategy {
    Socket(SocketStrategy),
    Legacy(LegacySyncStrategy),
}

impl DeviceStrategy {
    /// Build the strategy for `kind` with the transport settings of
    /// `platform`
    pub fn for_kind(kind: StrategyKind, platform: Platform, transport: &TransportSettings) -> Self {
        match kind {
            StrategyKind::Socket => DeviceStrategy::Socket(SocketStrategy::new(
                transport.ignore_cache,
                transport.confirm_timeout(platform),
            )),
            StrategyKind::Legacy => DeviceStrategy::Legacy(LegacySyncStrategy),
        }
    }
}

impl SyncStrategy for DeviceStrategy {
    fn kind(&self) -> StrategyKind {
        match self {
            DeviceStrategy::Socket(s) => SyncStrategy::kind(s),
            DeviceStrategy::Legacy(s) => SyncStrategy::kind(s),
        }
    }

    fn supports_fast_apply(&self) -> bool {
        match self {
            DeviceStrategy::Socket(s) => SyncStrategy::supports_fast_apply(s),
            DeviceStrategy::Legacy(s) => SyncStrategy::supports_fast_apply(s),
        }
    }

    async fn apply_changes<D: Device + Sync>(
        &mut self,
        device: &D,
        app: &DeviceAppData,
        entries: &[ChangeEntry],
    ) -> Result<bool> {
        match self {
            DeviceStrategy::Socket(s) => SyncStrategy::apply_changes(s, device, app, entries).await,
            DeviceStrategy::Legacy(s) => SyncStrategy::apply_changes(s, device, app, entries).await,
        }
    }

    async fn restart<D: Device + Sync>(&mut self, device: &D, app: &DeviceAppData) -> Result<()> {
        match self {
            DeviceStrategy::Socket(s) => SyncStrategy::restart(s, device, app).await,
            DeviceStrategy::Legacy(s) => SyncStrategy::restart(s, device, app).await,
        }
    }

    async fn close(&mut self, reason: TeardownReason) {
        match self {
            DeviceStrategy::Socket(s) => SyncStrategy::close(s, reason).await,
            DeviceStrategy::Legacy(s) => SyncStrategy::close(s, reason).await,
        }
    }
}
