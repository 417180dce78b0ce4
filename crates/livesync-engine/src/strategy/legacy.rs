//! Restart-only sync for runtimes without a live sync listener

use livesync_core::prelude::*;
use livesync_core::{ChangeEntry, DeviceAppData};
use livesync_device::{Device, TeardownReason};

use super::SyncStrategy;
use crate::capability::StrategyKind;

/// Every change is applied by restarting the application
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacySyncStrategy;

impl SyncStrategy for LegacySyncStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Legacy
    }

    fn supports_fast_apply(&self) -> bool {
        false
    }

    async fn apply_changes<D: Device + Sync>(
        &mut self,
        device: &D,
        app: &DeviceAppData,
        entries: &[ChangeEntry],
    ) -> Result<bool> {
        debug!(
            "Legacy sync of {} change(s) to {}, restarting",
            entries.len(),
            app.app_identifier
        );
        self.restart(device, app).await?;
        Ok(true)
    }

    async fn restart<D: Device + Sync>(&mut self, device: &D, app: &DeviceAppData) -> Result<()> {
        device.restart_application(&app.app_identifier).await
    }

    async fn close(&mut self, _reason: TeardownReason) {}
}
