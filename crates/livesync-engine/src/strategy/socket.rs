//! In-process reloads over the live sync socket

use std::time::Duration;

use livesync_core::prelude::*;
use livesync_core::{ChangeEntry, DeviceAppData};
use livesync_device::{Device, TeardownReason, TransportChannel};

use super::SyncStrategy;
use crate::capability::StrategyKind;

/// Reloads the running app through its live sync listener.
///
/// The channel is opened lazily on the first apply and reopened on the next
/// apply after it closes for any reason.
#[derive(Debug)]
pub struct SocketStrategy {
    channel: Option<TransportChannel>,
    ignore_cache: bool,
    confirm_timeout: Option<Duration>,
}

impl SocketStrategy {
    /// `confirm_timeout` is how long to wait for the listener to confirm a
    /// reload; `None` assumes every delivered reload was applied.
    pub fn new(ignore_cache: bool, confirm_timeout: Option<Duration>) -> Self {
        Self {
            channel: None,
            ignore_cache,
            confirm_timeout,
        }
    }

    pub fn channel(&self) -> Option<&TransportChannel> {
        self.channel.as_ref()
    }

    pub fn confirm_timeout(&self) -> Option<Duration> {
        self.confirm_timeout
    }

    async fn ensure_channel<D: Device + Sync>(
        &mut self,
        device: &D,
        app_id: &str,
    ) -> Result<&mut TransportChannel> {
        if self.channel.as_ref().is_some_and(|c| !c.is_open()) {
            debug!("Live sync channel for {} is closed, reconnecting", app_id);
            self.channel = None;
        }

        if self.channel.is_none() {
            let socket = device
                .socket_handle(app_id)
                .await?
                .ok_or_else(|| Error::transport_unavailable(app_id))?;
            self.channel = Some(TransportChannel::open(app_id, socket));
        }

        self.channel
            .as_mut()
            .ok_or_else(|| Error::transport_unavailable(app_id))
    }
}

impl SyncStrategy for SocketStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Socket
    }

    fn supports_fast_apply(&self) -> bool {
        true
    }

    async fn apply_changes<D: Device + Sync>(
        &mut self,
        device: &D,
        app: &DeviceAppData,
        entries: &[ChangeEntry],
    ) -> Result<bool> {
        if entries.is_empty() {
            trace!("Nothing to reload for {}", app.app_identifier);
            return Ok(true);
        }

        let ignore_cache = self.ignore_cache;
        let confirm_timeout = self.confirm_timeout;
        let channel = self.ensure_channel(device, &app.app_identifier).await?;

        let sent = channel.send_reload(ignore_cache).await;
        let id = match sent {
            Ok(id) => id,
            Err(e) => {
                self.channel = None;
                return Err(e);
            }
        };

        let Some(timeout) = confirm_timeout else {
            return Ok(true);
        };

        let reply = channel.await_reply(id, timeout).await;
        match reply {
            Ok(Some(reply)) => {
                let refreshed = reply.did_refresh();
                if !refreshed {
                    info!(
                        "{} did not confirm reload #{}: {:?}",
                        app.app_identifier, id, reply.error
                    );
                }
                Ok(refreshed)
            }
            Ok(None) => Ok(false),
            Err(e) => {
                self.channel = None;
                Err(e)
            }
        }
    }

    async fn restart<D: Device + Sync>(&mut self, device: &D, app: &DeviceAppData) -> Result<()> {
        if let Some(mut channel) = self.channel.take() {
            channel.close(TeardownReason::Restarted).await;
        }
        device.restart_application(&app.app_identifier).await
    }

    async fn close(&mut self, reason: TeardownReason) {
        if let Some(mut channel) = self.channel.take() {
            channel.close(reason).await;
        }
    }
}
