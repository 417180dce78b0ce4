//! Per (device, app) sync session state

use std::fmt;

use livesync_core::prelude::*;
use livesync_core::Platform;
use livesync_device::{HashManifestStore, TeardownReason};

use crate::capability::{select_strategy, StrategyKind};
use crate::config::Settings;
use crate::strategy::{DeviceStrategy, SyncStrategy};

/// Identifies the application a session syncs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub device_id: String,
    pub app_id: String,
}

impl SessionKey {
    pub fn new(device_id: impl Into<String>, app_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            app_id: app_id.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.app_id, self.device_id)
    }
}

/// State kept between requests for one (device, app) pair.
///
/// A new session starts with `force_full` set so its first sync restarts the
/// app; so does a change of runtime version.
#[derive(Debug)]
pub struct SyncSession {
    pub(crate) key: SessionKey,
    pub(crate) platform: Platform,
    pub(crate) runtime_version: String,
    pub(crate) strategy: DeviceStrategy,
    pub(crate) manifest: HashManifestStore,
    pub(crate) force_full: bool,
}

impl SyncSession {
    pub fn new(key: SessionKey, platform: Platform, runtime_version: &str, settings: &Settings) -> Self {
        let kind = Self::negotiate(&key, platform, runtime_version, settings);
        let manifest = HashManifestStore::new(&settings.sync.device_root, key.app_id.clone());

        Self {
            strategy: DeviceStrategy::for_kind(kind, platform, &settings.transport),
            key,
            platform,
            runtime_version: runtime_version.to_string(),
            manifest,
            force_full: true,
        }
    }

    fn negotiate(
        key: &SessionKey,
        platform: Platform,
        runtime_version: &str,
        settings: &Settings,
    ) -> StrategyKind {
        let threshold = settings.transport.min_socket_runtime(platform);
        let kind = select_strategy(runtime_version, threshold);
        info!(
            "{} runtime {} for {}: {} sync",
            platform, runtime_version, key, kind
        );
        kind
    }

    /// Re-run capability selection when the runtime version changed.
    ///
    /// The previous strategy's channel is closed and the next sync is a full
    /// restart. Returns true if the strategy was replaced.
    pub async fn renegotiate(&mut self, runtime_version: &str, settings: &Settings) -> bool {
        if self.runtime_version == runtime_version {
            return false;
        }

        let kind = Self::negotiate(&self.key, self.platform, runtime_version, settings);
        self.strategy.close(TeardownReason::Replaced).await;
        self.strategy = DeviceStrategy::for_kind(kind, self.platform, &settings.transport);
        self.runtime_version = runtime_version.to_string();
        self.force_full = true;
        true
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn runtime_version(&self) -> &str {
        &self.runtime_version
    }

    pub fn strategy_kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    pub fn force_full(&self) -> bool {
        self.force_full
    }
}
