//! Sync orchestration
//!
//! The [`SyncOrchestrator`] turns a [`SyncRequest`] into device operations:
//!
//! ```text
//! INIT ──▶ CLASSIFY ──▶ FAST_APPLY ───(confirmed)──────────────▶ DONE
//!              │            │
//!              │            └─(unconfirmed, HMR hash present)─▶ FALLBACK_APPLY ─▶ DONE
//!              │
//!              └──────────▶ FULL_RESTART ─────────────────────▶ DONE
//! ```
//!
//! Requests for the same (device, app) pair are serialized by a per-session
//! async mutex; different pairs run concurrently.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use livesync_core::prelude::*;
use livesync_core::{ChangeEntry, DeviceAppData};
use livesync_device::{Device, HashManifest, TeardownReason};
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::capability::StrategyKind;
use crate::change_set::{classify, ChangeSet, RestartReason, StructuralMatcher, SyncDecision};
use crate::config::Settings;
use crate::session::{SessionKey, SyncSession};
use crate::strategy::{transfer_entries, SyncStrategy};

/// Request flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncFlags {
    /// The bundler produced hot module updates for this change
    pub use_hot_module_reload: bool,
    /// Skip classification and restart the app
    pub is_full_sync: bool,
}

/// Hot module reload metadata from the bundler
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HmrPayload {
    /// Hash of the update; empty when the bundler produced none
    pub hash: String,
    /// Files to sync if the hot update is not applied
    pub fallback_files: Vec<PathBuf>,
}

impl HmrPayload {
    pub fn new(hash: impl Into<String>, fallback_files: Vec<PathBuf>) -> Self {
        Self {
            hash: hash.into(),
            fallback_files,
        }
    }

    pub fn has_hash(&self) -> bool {
        !self.hash.is_empty()
    }
}

/// One sync request for one application on one device
#[derive(Debug, Clone)]
pub struct SyncRequest<D> {
    pub device: Arc<D>,
    pub app: DeviceAppData,
    pub files_to_sync: Vec<PathBuf>,
    pub files_to_remove: Vec<PathBuf>,
    pub runtime_version: String,
    pub flags: SyncFlags,
    pub hmr: Option<HmrPayload>,
}

impl<D: Device> SyncRequest<D> {
    pub fn new(device: Arc<D>, app: DeviceAppData, runtime_version: impl Into<String>) -> Self {
        Self {
            device,
            app,
            files_to_sync: Vec::new(),
            files_to_remove: Vec::new(),
            runtime_version: runtime_version.into(),
            flags: SyncFlags::default(),
            hmr: None,
        }
    }

    pub fn with_files(mut self, files_to_sync: Vec<PathBuf>, files_to_remove: Vec<PathBuf>) -> Self {
        self.files_to_sync = files_to_sync;
        self.files_to_remove = files_to_remove;
        self
    }

    pub fn with_flags(mut self, flags: SyncFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_hmr(mut self, hmr: HmrPayload) -> Self {
        self.hmr = Some(hmr);
        self
    }

    fn session_key(&self) -> SessionKey {
        SessionKey::new(self.device.identifier(), &self.app.app_identifier)
    }

    /// Whether an unconfirmed first attempt should be retried with the
    /// fallback files
    fn wants_fallback(&self) -> bool {
        self.flags.use_hot_module_reload && self.hmr.as_ref().is_some_and(HmrPayload::has_hash)
    }
}

/// Outcome of a sync request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    /// The app shows the new code, either by reload or restart
    pub did_refresh: bool,
    /// The result comes from the fallback attempt
    pub did_recover: bool,
    /// The app was restarted rather than reloaded
    pub restarted: bool,
    pub device_app_data: DeviceAppData,
    pub modified_files_data: Vec<ChangeEntry>,
}

impl SyncResult {
    /// A request cut short by shutdown: nothing was applied to the app
    fn abandoned(app: &DeviceAppData, modified_files_data: Vec<ChangeEntry>) -> Self {
        Self {
            did_refresh: false,
            did_recover: false,
            restarted: false,
            device_app_data: app.clone(),
            modified_files_data,
        }
    }
}

/// Drives sync requests for any number of (device, app) pairs.
pub struct SyncOrchestrator {
    settings: Settings,
    matcher: StructuralMatcher,
    sessions: Mutex<HashMap<SessionKey, Arc<AsyncMutex<SyncSession>>>>,
    shutting_down: AtomicBool,
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("sessions", &self.session_count())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

impl SyncOrchestrator {
    /// Create an orchestrator; fails on invalid structural patterns.
    pub fn new(settings: Settings) -> Result<Self> {
        let matcher = StructuralMatcher::new(&settings.sync.structural_patterns)?;
        Ok(Self {
            settings,
            matcher,
            sessions: Mutex::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn session_count(&self) -> usize {
        self.lock_sessions().len()
    }

    /// Strategy currently used for an app, if it has a session
    pub async fn strategy_kind(&self, device_id: &str, app_id: &str) -> Option<StrategyKind> {
        let session = self
            .lock_sessions()
            .get(&SessionKey::new(device_id, app_id))
            .cloned()?;
        let session = session.lock().await;
        Some(session.strategy_kind())
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<SessionKey, Arc<AsyncMutex<SyncSession>>>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Look up or create the session for a request and lock it.
    ///
    /// Holding the returned guard serializes requests for the pair.
    async fn session_for<D: Device + Sync>(
        &self,
        request: &SyncRequest<D>,
    ) -> Result<OwnedMutexGuard<SyncSession>> {
        let platform = request.device.platform();
        if request.app.platform != platform {
            return Err(Error::unsupported_platform(format!(
                "{} app on {} device {}",
                request.app.platform,
                platform,
                request.device.identifier()
            )));
        }

        let session = {
            let mut sessions = self.lock_sessions();
            let key = request.session_key();
            Arc::clone(sessions.entry(key.clone()).or_insert_with(|| {
                Arc::new(AsyncMutex::new(SyncSession::new(
                    key,
                    platform,
                    &request.runtime_version,
                    &self.settings,
                )))
            }))
        };

        let mut session = session.lock_owned().await;
        session
            .renegotiate(&request.runtime_version, &self.settings)
            .await;
        Ok(session)
    }

    /// Push the project files, record their hashes, and restart the app.
    ///
    /// Only files whose content differs from the device manifest are pushed.
    /// When the device has no manifest yet a fresh one is written from
    /// `files_to_sync`.
    #[instrument(skip_all, fields(device = %request.device.identifier(), app = %request.app.app_identifier))]
    pub async fn full_sync<D: Device + Sync>(&self, request: &SyncRequest<D>) -> Result<SyncResult> {
        let mut session = self.session_for(request).await?;
        let device = request.device.as_ref();
        let app = &request.app;

        if self.is_shutting_down() {
            info!("Shutting down, skipping full sync of {}", session.key);
            return Ok(SyncResult::abandoned(app, Vec::new()));
        }

        let baseline = self.read_baseline(&mut session, device).await;
        let change_set = ChangeSet::build(
            app,
            &request.files_to_sync,
            &request.files_to_remove,
            baseline.as_ref(),
        )
        .await?;

        transfer_entries(device, change_set.entries()).await?;

        if self.is_shutting_down() {
            info!("Shutting down, not writing hash manifest or restarting {}", session.key);
            return Ok(SyncResult::abandoned(app, change_set.into_entries()));
        }

        if baseline.is_some() {
            self.record_transfer(&mut session, device, &change_set).await;
        } else {
            self.write_fresh_manifest(&mut session, device, &request.files_to_sync)
                .await;
        }

        self.restart(&mut session, device, app, RestartReason::Requested)
            .await?;

        Ok(SyncResult {
            did_refresh: true,
            did_recover: false,
            restarted: true,
            device_app_data: app.clone(),
            modified_files_data: change_set.into_entries(),
        })
    }

    /// Sync the files a watcher reported.
    ///
    /// Applies in-process when the strategy and change set allow it and
    /// restarts otherwise. An unconfirmed hot module reload is retried once
    /// with the fallback files.
    #[instrument(skip_all, fields(device = %request.device.identifier(), app = %request.app.app_identifier))]
    pub async fn watch_sync<D: Device + Sync>(&self, request: &SyncRequest<D>) -> Result<SyncResult> {
        let mut session = self.session_for(request).await?;

        let result = self
            .sync_attempt(
                &mut session,
                request,
                &request.files_to_sync,
                &request.files_to_remove,
                false,
            )
            .await?;

        if result.did_refresh || !request.wants_fallback() {
            return Ok(result);
        }
        if self.is_shutting_down() {
            info!("Shutting down, skipping fallback sync");
            return Ok(result);
        }

        let fallback_files = request
            .hmr
            .as_ref()
            .map(|hmr| hmr.fallback_files.clone())
            .unwrap_or_default();
        info!(
            "Hot update of {} was not applied, syncing {} fallback file(s)",
            request.app.app_identifier,
            fallback_files.len()
        );

        let mut recovered = self
            .sync_attempt(&mut session, request, &fallback_files, &[], true)
            .await?;
        recovered.did_recover = true;
        Ok(recovered)
    }

    /// Close every open channel and stop writing manifests.
    ///
    /// Waits for in-flight requests on each session; pending fallback
    /// attempts are skipped. Requests arriving afterwards neither open a
    /// channel nor restart the app.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let sessions: Vec<_> = self.lock_sessions().values().cloned().collect();
        info!("Shutting down live sync, closing {} session(s)", sessions.len());

        for session in sessions {
            let mut session = session.lock().await;
            session.strategy.close(TeardownReason::ExitSignal).await;
        }
    }

    /// One pass of CLASSIFY, transfer, and apply.
    ///
    /// `bypass_manifest` pushes every file in `files` regardless of the
    /// device manifest.
    async fn sync_attempt<D: Device + Sync>(
        &self,
        session: &mut SyncSession,
        request: &SyncRequest<D>,
        files: &[PathBuf],
        removed: &[PathBuf],
        bypass_manifest: bool,
    ) -> Result<SyncResult> {
        let device = request.device.as_ref();
        let app = &request.app;

        if self.is_shutting_down() {
            info!("Shutting down, not syncing {}", session.key);
            return Ok(SyncResult::abandoned(app, Vec::new()));
        }

        let baseline = if bypass_manifest {
            None
        } else {
            self.read_baseline(session, device).await
        };
        let change_set = ChangeSet::build(app, files, removed, baseline.as_ref()).await?;

        let forced = if request.flags.is_full_sync {
            Some(RestartReason::Requested)
        } else if session.force_full {
            Some(RestartReason::Forced)
        } else {
            None
        };
        let classification = classify(
            &change_set,
            &self.matcher,
            forced,
            session.strategy.supports_fast_apply(),
        );
        debug!(
            "{} change(s) for {}: {} fast, {} structural, {:?}",
            change_set.len(),
            session.key,
            classification.fast.len(),
            classification.structural.len(),
            classification.decision
        );

        let mut decision = classification.decision;
        match transfer_entries(device, change_set.entries()).await {
            Ok(()) => {
                if !self.is_shutting_down() {
                    self.record_transfer(session, device, &change_set).await;
                }
            }
            Err(e) if e.is_recoverable() => {
                warn!("Transfer to {} failed, restarting: {}", device.identifier(), e);
                decision = SyncDecision::FullRestart(RestartReason::TransferFailed);
            }
            Err(e) => return Err(e),
        }

        // no new channels or restarts once shutdown has closed them
        if self.is_shutting_down() {
            info!("Shutting down, not applying changes to {}", session.key);
            return Ok(SyncResult::abandoned(app, change_set.into_entries()));
        }

        let (did_refresh, restarted) = match decision {
            SyncDecision::FullRestart(reason) => {
                self.restart(session, device, app, reason).await?;
                (true, true)
            }
            SyncDecision::FastApply if change_set.is_empty() => {
                trace!("No changes for {}, nothing to apply", session.key);
                (true, false)
            }
            SyncDecision::FastApply => {
                match session
                    .strategy
                    .apply_changes(device, app, &classification.fast)
                    .await
                {
                    Ok(refreshed) => (refreshed, false),
                    Err(e) if e.is_recoverable() => {
                        warn!("Fast sync to {} failed, restarting: {}", session.key, e);
                        self.restart(session, device, app, RestartReason::TransportFailed)
                            .await?;
                        (true, true)
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        Ok(SyncResult {
            did_refresh,
            did_recover: false,
            restarted,
            device_app_data: app.clone(),
            modified_files_data: change_set.into_entries(),
        })
    }

    async fn restart<D: Device + Sync>(
        &self,
        session: &mut SyncSession,
        device: &D,
        app: &DeviceAppData,
        reason: RestartReason,
    ) -> Result<()> {
        info!("Restarting {} ({:?})", session.key, reason);
        session.strategy.restart(device, app).await?;
        session.force_full = false;
        Ok(())
    }

    /// The device manifest, or `None` when it is missing or unreadable
    async fn read_baseline<D: Device + Sync>(
        &self,
        session: &mut SyncSession,
        device: &D,
    ) -> Option<HashManifest> {
        match session.manifest.read(device).await {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(
                    "Hash manifest for {} unreadable, syncing without baseline: {}",
                    session.key, e
                );
                None
            }
        }
    }

    /// Record a successful transfer in the device manifest.
    ///
    /// Failures only cost a redundant push next time, so they are logged.
    async fn record_transfer<D: Device + Sync>(
        &self,
        session: &mut SyncSession,
        device: &D,
        change_set: &ChangeSet,
    ) {
        let modified = change_set.modified_paths();
        if !modified.is_empty() {
            match session.manifest.update(device, &modified).await {
                Ok(true) => {}
                Ok(false) => debug!("No hash manifest for {} to update", session.key),
                Err(e) => warn!("Failed to update hash manifest for {}: {}", session.key, e),
            }
        }

        let removed = change_set.removed_paths();
        if !removed.is_empty() {
            match session.manifest.remove(device, &removed).await {
                Ok(_) => {}
                Err(e) => warn!("Failed to prune hash manifest for {}: {}", session.key, e),
            }
        }
    }

    async fn write_fresh_manifest<D: Device + Sync>(
        &self,
        session: &mut SyncSession,
        device: &D,
        files: &[PathBuf],
    ) {
        let manifest = match HashManifest::from_files(files).await {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!("Could not hash project files for {}: {}", session.key, e);
                return;
            }
        };
        if let Err(e) = session.manifest.write(device, &manifest).await {
            warn!("Failed to write hash manifest for {}: {}", session.key, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livesync_core::Platform;
    use livesync_device::encode_frame;
    use livesync_device::test_utils::{read_peer_frame, DeviceOp, FakeDevice, SocketMode};
    use tokio::io::AsyncWriteExt;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    const APP_ID: &str = "org.example.app";
    const SOCKET_RUNTIME: &str = "5.0.0";
    const MANIFEST: &str = "/data/local/tmp/org.example.app/hashes";

    struct Project {
        dir: TempDir,
    }

    impl Project {
        fn new() -> Self {
            Self {
                dir: tempdir().unwrap(),
            }
        }

        fn file(&self, name: &str, content: &str) -> PathBuf {
            let path = self.dir.path().join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(&path, content).unwrap();
            path
        }

        fn app(&self, platform: Platform) -> DeviceAppData {
            DeviceAppData::new(
                APP_ID,
                platform,
                self.dir.path(),
                "/data/local/tmp/org.example.app/sync",
            )
        }

        fn root(&self) -> &Path {
            self.dir.path()
        }
    }

    fn request(
        device: &FakeDevice,
        project: &Project,
        files: Vec<PathBuf>,
    ) -> SyncRequest<FakeDevice> {
        SyncRequest::new(
            Arc::new(device.clone()),
            project.app(device.platform()),
            SOCKET_RUNTIME,
        )
        .with_files(files, Vec::new())
    }

    fn orchestrator() -> SyncOrchestrator {
        SyncOrchestrator::new(Settings::default()).unwrap()
    }

    fn manifest_on(device: &FakeDevice) -> HashManifest {
        serde_json::from_slice(&device.remote(MANIFEST).unwrap()).unwrap()
    }

    /// Full sync a project with one script so later watch syncs take the
    /// fast path
    async fn synced(device: &FakeDevice, project: &Project, orchestrator: &SyncOrchestrator) -> PathBuf {
        let main = project.file("main.js", "v1");
        orchestrator
            .full_sync(&request(device, project, vec![main.clone()]))
            .await
            .unwrap();
        main
    }

    #[tokio::test]
    async fn test_full_sync_pushes_writes_manifest_and_restarts() {
        let project = Project::new();
        let device = FakeDevice::android("emulator-5554");
        let orchestrator = orchestrator();
        let main = project.file("main.js", "v1");

        let result = orchestrator
            .full_sync(&request(&device, &project, vec![main.clone()]))
            .await
            .unwrap();

        assert!(result.did_refresh);
        assert!(result.restarted);
        assert!(!result.did_recover);
        assert_eq!(result.modified_files_data.len(), 1);
        assert!(device
            .remote("/data/local/tmp/org.example.app/sync/main.js")
            .is_some());
        assert!(manifest_on(&device).contains(&main));
        assert_eq!(device.restart_count(), 1);
    }

    #[tokio::test]
    async fn test_full_sync_skips_files_already_on_device() {
        let project = Project::new();
        let device = FakeDevice::android("emulator-5554");
        let orchestrator = orchestrator();
        let main = synced(&device, &project, &orchestrator).await;
        let pushes = device.push_count();

        let result = orchestrator
            .full_sync(&request(&device, &project, vec![main]))
            .await
            .unwrap();

        assert!(result.modified_files_data.is_empty());
        assert_eq!(device.push_count(), pushes);
        assert_eq!(device.restart_count(), 2);
    }

    #[tokio::test]
    async fn test_script_change_reloads_and_updates_manifest() {
        let project = Project::new();
        let device = FakeDevice::ios("iphone");
        device.set_socket_mode(SocketMode::Listening { reply: None });
        let orchestrator = orchestrator();
        let main = synced(&device, &project, &orchestrator).await;
        let before = manifest_on(&device).get(&main).unwrap().to_string();

        std::fs::write(&main, "v2").unwrap();
        let result = orchestrator
            .watch_sync(&request(&device, &project, vec![main.clone()]))
            .await
            .unwrap();

        assert!(result.did_refresh);
        assert!(!result.restarted);
        assert_eq!(device.restart_count(), 1);
        assert_eq!(device.socket_requests(), 1);
        assert_ne!(manifest_on(&device).get(&main).unwrap(), before);

        orchestrator.shutdown().await;
        let received = device.take_listener().unwrap().await.unwrap();
        assert_eq!(received.len(), 1);
        assert!(received[0].contains(r#""id":1"#));
    }

    #[tokio::test]
    async fn test_first_watch_sync_of_session_restarts() {
        let project = Project::new();
        let device = FakeDevice::ios("iphone");
        device.set_socket_mode(SocketMode::Listening { reply: None });
        let orchestrator = orchestrator();
        let main = project.file("main.js", "v1");

        let result = orchestrator
            .watch_sync(&request(&device, &project, vec![main]))
            .await
            .unwrap();

        assert!(result.restarted);
        assert_eq!(device.socket_requests(), 0);
    }

    #[tokio::test]
    async fn test_structural_change_forces_restart() {
        let project = Project::new();
        let device = FakeDevice::ios("iphone");
        device.set_socket_mode(SocketMode::Listening { reply: None });
        let orchestrator = orchestrator();
        synced(&device, &project, &orchestrator).await;

        let script = project.file("views/home.js", "x");
        let native = project.file("App_Resources/iOS/Info.plist", "<plist/>");
        let result = orchestrator
            .watch_sync(&request(&device, &project, vec![script, native]))
            .await
            .unwrap();

        assert!(result.did_refresh);
        assert!(result.restarted);
        assert_eq!(device.restart_count(), 2);
        assert_eq!(device.socket_requests(), 0);
    }

    #[tokio::test]
    async fn test_is_full_sync_flag_restarts() {
        let project = Project::new();
        let device = FakeDevice::ios("iphone");
        device.set_socket_mode(SocketMode::Listening { reply: None });
        let orchestrator = orchestrator();
        let main = synced(&device, &project, &orchestrator).await;

        std::fs::write(&main, "v2").unwrap();
        let req = request(&device, &project, vec![main]).with_flags(SyncFlags {
            use_hot_module_reload: false,
            is_full_sync: true,
        });
        let result = orchestrator.watch_sync(&req).await.unwrap();

        assert!(result.restarted);
        assert_eq!(device.socket_requests(), 0);
    }

    #[tokio::test]
    async fn test_unchanged_files_are_not_pushed_or_reloaded() {
        let project = Project::new();
        let device = FakeDevice::ios("iphone");
        device.set_socket_mode(SocketMode::Listening { reply: None });
        let orchestrator = orchestrator();
        let main = synced(&device, &project, &orchestrator).await;
        let pushes = device.push_count();

        let result = orchestrator
            .watch_sync(&request(&device, &project, vec![main]))
            .await
            .unwrap();

        assert!(result.did_refresh);
        assert!(result.modified_files_data.is_empty());
        assert_eq!(device.push_count(), pushes);
        assert_eq!(device.socket_requests(), 0);
    }

    #[tokio::test]
    async fn test_removed_files_are_deleted_and_pruned() {
        let project = Project::new();
        let device = FakeDevice::ios("iphone");
        device.set_socket_mode(SocketMode::Listening { reply: None });
        let orchestrator = orchestrator();
        let main = synced(&device, &project, &orchestrator).await;
        std::fs::remove_file(&main).unwrap();

        let req = request(&device, &project, Vec::new()).with_files(Vec::new(), vec![main.clone()]);
        let result = orchestrator.watch_sync(&req).await.unwrap();

        assert!(result.did_refresh);
        assert!(device
            .ops()
            .contains(&DeviceOp::Delete("/data/local/tmp/org.example.app/sync/main.js".into())));
        assert!(!manifest_on(&device).contains(&main));
    }

    #[tokio::test]
    async fn test_missing_socket_falls_back_to_restart() {
        let project = Project::new();
        let device = FakeDevice::android("emulator-5554");
        let orchestrator = orchestrator();
        let main = synced(&device, &project, &orchestrator).await;

        std::fs::write(&main, "v2").unwrap();
        let result = orchestrator
            .watch_sync(&request(&device, &project, vec![main]))
            .await
            .unwrap();

        assert!(result.did_refresh);
        assert!(result.restarted);
        assert_eq!(device.socket_requests(), 1);
        assert_eq!(device.restart_count(), 2);
    }

    #[tokio::test]
    async fn test_write_failure_restarts_then_reconnects() {
        let project = Project::new();
        let device = FakeDevice::ios("iphone");
        device.set_socket_mode(SocketMode::FailingWrites);
        let orchestrator = orchestrator();
        let main = synced(&device, &project, &orchestrator).await;

        std::fs::write(&main, "v2").unwrap();
        let result = orchestrator
            .watch_sync(&request(&device, &project, vec![main.clone()]))
            .await
            .unwrap();
        assert!(result.restarted);
        assert!(result.did_refresh);

        device.set_socket_mode(SocketMode::Listening { reply: None });
        std::fs::write(&main, "v3").unwrap();
        let result = orchestrator
            .watch_sync(&request(&device, &project, vec![main]))
            .await
            .unwrap();
        assert!(!result.restarted);
        assert_eq!(device.socket_requests(), 2);

        orchestrator.shutdown().await;
        let received = device.take_listener().unwrap().await.unwrap();
        assert!(received[0].contains(r#""id":1"#));
    }

    #[tokio::test]
    async fn test_restart_failure_is_surfaced() {
        let project = Project::new();
        let device = FakeDevice::android("emulator-5554");
        device.fail_restart(true);
        let orchestrator = orchestrator();
        let main = project.file("main.js", "v1");

        let result = orchestrator
            .full_sync(&request(&device, &project, vec![main]))
            .await;
        assert!(matches!(result, Err(Error::DeviceIo { .. })));
    }

    #[tokio::test]
    async fn test_unconfirmed_hmr_falls_back_exactly_once() {
        let project = Project::new();
        let device = FakeDevice::android("emulator-5554");
        device.set_socket_mode(SocketMode::Listening { reply: Some(false) });
        let orchestrator = orchestrator();
        let main = synced(&device, &project, &orchestrator).await;
        let bundle = project.file("bundle.js", "full bundle");

        std::fs::write(&main, "v2").unwrap();
        let req = request(&device, &project, vec![main])
            .with_flags(SyncFlags {
                use_hot_module_reload: true,
                is_full_sync: false,
            })
            .with_hmr(HmrPayload::new("abc123", vec![bundle.clone()]));
        let result = orchestrator.watch_sync(&req).await.unwrap();

        assert!(result.did_recover);
        assert!(!result.did_refresh);
        assert_eq!(result.modified_files_data.len(), 1);
        assert_eq!(result.modified_files_data[0].local_path, bundle);

        orchestrator.shutdown().await;
        let received = device.take_listener().unwrap().await.unwrap();
        assert_eq!(received.len(), 2);
    }

    #[tokio::test]
    async fn test_fallback_pushes_even_unchanged_files() {
        let project = Project::new();
        let device = FakeDevice::android("emulator-5554");
        device.set_socket_mode(SocketMode::Listening { reply: Some(false) });
        let orchestrator = orchestrator();
        let main = synced(&device, &project, &orchestrator).await;
        let pushes_before = device.push_count();

        std::fs::write(&main, "v2").unwrap();
        let req = request(&device, &project, vec![main.clone()])
            .with_flags(SyncFlags {
                use_hot_module_reload: true,
                is_full_sync: false,
            })
            .with_hmr(HmrPayload::new("abc123", vec![main]));
        let result = orchestrator.watch_sync(&req).await.unwrap();

        assert!(result.did_recover);
        // main.js and the manifest on the first attempt, both again on the fallback
        assert_eq!(device.push_count(), pushes_before + 4);
    }

    #[tokio::test]
    async fn test_no_fallback_without_hash_or_flag() {
        let project = Project::new();
        let device = FakeDevice::android("emulator-5554");
        device.set_socket_mode(SocketMode::Listening { reply: Some(false) });
        let orchestrator = orchestrator();
        let main = synced(&device, &project, &orchestrator).await;

        std::fs::write(&main, "v2").unwrap();
        let no_hash = request(&device, &project, vec![main.clone()])
            .with_flags(SyncFlags {
                use_hot_module_reload: true,
                is_full_sync: false,
            })
            .with_hmr(HmrPayload::new("", vec![main.clone()]));
        let result = orchestrator.watch_sync(&no_hash).await.unwrap();
        assert!(!result.did_refresh);
        assert!(!result.did_recover);

        std::fs::write(&main, "v3").unwrap();
        let no_flag = request(&device, &project, vec![main.clone()])
            .with_hmr(HmrPayload::new("abc123", vec![main]));
        let result = orchestrator.watch_sync(&no_flag).await.unwrap();
        assert!(!result.did_recover);
    }

    #[tokio::test]
    async fn test_confirmed_hmr_does_not_fall_back() {
        let project = Project::new();
        let device = FakeDevice::android("emulator-5554");
        device.set_socket_mode(SocketMode::Listening { reply: Some(true) });
        let orchestrator = orchestrator();
        let main = synced(&device, &project, &orchestrator).await;
        let bundle = project.file("bundle.js", "full bundle");

        std::fs::write(&main, "v2").unwrap();
        let req = request(&device, &project, vec![main])
            .with_flags(SyncFlags {
                use_hot_module_reload: true,
                is_full_sync: false,
            })
            .with_hmr(HmrPayload::new("abc123", vec![bundle]));
        let result = orchestrator.watch_sync(&req).await.unwrap();

        assert!(result.did_refresh);
        assert!(!result.did_recover);
    }

    #[tokio::test]
    async fn test_legacy_runtime_always_restarts() {
        let project = Project::new();
        let device = FakeDevice::android("emulator-5554");
        device.set_socket_mode(SocketMode::Listening { reply: Some(true) });
        let orchestrator = orchestrator();
        let main = project.file("main.js", "v1");

        let mut req = request(&device, &project, vec![main.clone()]);
        req.runtime_version = "4.2.0-2018-07-20-02".to_string();
        orchestrator.full_sync(&req).await.unwrap();

        std::fs::write(&main, "v2").unwrap();
        let result = orchestrator.watch_sync(&req).await.unwrap();

        assert!(result.restarted);
        assert_eq!(device.socket_requests(), 0);
        assert_eq!(
            orchestrator.strategy_kind("emulator-5554", APP_ID).await,
            Some(StrategyKind::Legacy)
        );
    }

    #[tokio::test]
    async fn test_runtime_change_renegotiates_and_forces_restart() {
        let project = Project::new();
        let device = FakeDevice::ios("iphone");
        device.set_socket_mode(SocketMode::Listening { reply: None });
        let orchestrator = orchestrator();
        let main = synced(&device, &project, &orchestrator).await;

        std::fs::write(&main, "v2").unwrap();
        let mut req = request(&device, &project, vec![main]);
        req.runtime_version = "6.0.0".to_string();
        let result = orchestrator.watch_sync(&req).await.unwrap();

        assert!(result.restarted);
        assert_eq!(orchestrator.session_count(), 1);
    }

    #[tokio::test]
    async fn test_platform_mismatch_is_unsupported() {
        let project = Project::new();
        let device = FakeDevice::ios("iphone");
        let orchestrator = orchestrator();

        let mut req = request(&device, &project, Vec::new());
        req.app = project.app(Platform::Android);
        let err = orchestrator.watch_sync(&req).await.unwrap_err();

        assert!(matches!(err, Error::UnsupportedPlatform { .. }));
        assert!(err.is_fatal());
        assert_eq!(orchestrator.session_count(), 0);
    }

    #[tokio::test]
    async fn test_sessions_are_per_device_and_app() {
        let project = Project::new();
        let first = FakeDevice::android("emulator-5554");
        let second = FakeDevice::android("emulator-5556");
        let orchestrator = orchestrator();
        let main = project.file("main.js", "v1");

        let first_request = request(&first, &project, vec![main.clone()]);
        let second_request = request(&second, &project, vec![main]);
        let (a, b) = tokio::join!(
            orchestrator.full_sync(&first_request),
            orchestrator.full_sync(&second_request),
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(orchestrator.session_count(), 2);
        assert_eq!(first.restart_count(), 1);
        assert_eq!(second.restart_count(), 1);
        assert!(project.root().exists());
    }

    #[tokio::test]
    async fn test_shutdown_skips_fallback_and_manifest_writes() {
        let project = Project::new();
        let device = FakeDevice::android("emulator-5554");
        device.set_socket_mode(SocketMode::Listening { reply: Some(false) });
        let orchestrator = orchestrator();
        let main = synced(&device, &project, &orchestrator).await;
        let before = manifest_on(&device);

        orchestrator.shutdown().await;
        assert!(orchestrator.is_shutting_down());

        std::fs::write(&main, "v2").unwrap();
        let req = request(&device, &project, vec![main.clone()])
            .with_flags(SyncFlags {
                use_hot_module_reload: true,
                is_full_sync: false,
            })
            .with_hmr(HmrPayload::new("abc123", vec![main]));
        let result = orchestrator.watch_sync(&req).await.unwrap();

        assert!(!result.did_recover);
        assert_eq!(manifest_on(&device), before);
    }

    #[tokio::test]
    async fn test_watch_sync_after_shutdown_opens_no_channel() {
        let project = Project::new();
        let device = FakeDevice::ios("iphone");
        device.set_socket_mode(SocketMode::Listening { reply: None });
        let orchestrator = orchestrator();
        let main = synced(&device, &project, &orchestrator).await;

        orchestrator.shutdown().await;
        let sockets = device.socket_requests();
        let restarts = device.restart_count();

        std::fs::write(&main, "v2").unwrap();
        let result = orchestrator
            .watch_sync(&request(&device, &project, vec![main]))
            .await
            .unwrap();

        assert!(!result.did_refresh);
        assert!(!result.restarted);
        assert_eq!(device.socket_requests(), sockets);
        assert_eq!(device.restart_count(), restarts);
        assert!(device.take_listener().is_none());
    }

    #[tokio::test]
    async fn test_full_sync_after_shutdown_does_not_restart() {
        let project = Project::new();
        let device = FakeDevice::android("emulator-5554");
        let orchestrator = orchestrator();
        let main = synced(&device, &project, &orchestrator).await;

        orchestrator.shutdown().await;
        std::fs::write(&main, "v2").unwrap();
        let result = orchestrator
            .full_sync(&request(&device, &project, vec![main]))
            .await
            .unwrap();

        assert!(!result.restarted);
        assert_eq!(device.restart_count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_during_reload_abandons_fallback() {
        let project = Project::new();
        let device = FakeDevice::android("emulator-5554");
        device.set_socket_mode(SocketMode::Duplex);
        let orchestrator = Arc::new(orchestrator());
        let main = synced(&device, &project, &orchestrator).await;
        let bundle = project.file("bundle.js", "full bundle");

        std::fs::write(&main, "v2").unwrap();
        let req = request(&device, &project, vec![main])
            .with_flags(SyncFlags {
                use_hot_module_reload: true,
                is_full_sync: false,
            })
            .with_hmr(HmrPayload::new("abc123", vec![bundle.clone()]));

        // plays the app: shuts the engine down while the reload is in flight,
        // then reports the reload as not applied
        let app = {
            let device = device.clone();
            let orchestrator = Arc::clone(&orchestrator);
            async move {
                let mut peer = loop {
                    if let Some(peer) = device.take_peer() {
                        break peer;
                    }
                    tokio::task::yield_now().await;
                };
                let reload = read_peer_frame(&mut peer).await.unwrap();

                let shutdown = tokio::spawn({
                    let orchestrator = Arc::clone(&orchestrator);
                    async move { orchestrator.shutdown().await }
                });
                while !orchestrator.is_shutting_down() {
                    tokio::task::yield_now().await;
                }

                let reply = r#"{"id":1,"result":{"didRefresh":false}}"#;
                peer.write_all(&encode_frame(reply).unwrap()).await.unwrap();
                shutdown.await.unwrap();
                (reload, peer)
            }
        };

        let (result, (reload, mut peer)) = tokio::join!(orchestrator.watch_sync(&req), app);
        let result = result.unwrap();

        assert!(reload.contains(r#""id":1"#));
        assert!(!result.did_refresh);
        assert!(!result.did_recover);
        assert!(!device.ops().iter().any(|op| matches!(
            op,
            DeviceOp::Push { local, .. } if local.ends_with("bundle.js")
        )));
        assert!(!manifest_on(&device).contains(&bundle));
        // shutdown closed the channel once the request let go of the session
        assert!(read_peer_frame(&mut peer).await.is_err());
    }
}
