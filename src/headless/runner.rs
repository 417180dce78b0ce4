//! Headless mode runner - sync loop driven by the file watcher
//!
//! Performs an initial full sync of the project, then turns every watcher
//! batch into a watch sync until a termination signal arrives.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use livesync_core::prelude::*;
use livesync_core::{DeviceAppData, Platform};
use livesync_device::Device;
use livesync_engine::{
    load_settings, project_runtime_version, spawn_signal_handler, FileWatcher, HmrPayload,
    SyncFlags, SyncOrchestrator, SyncRequest, SyncResult, WatchEvent, WatcherConfig,
};

use super::{HeadlessEvent, SyncKind};

/// Receives every event a [`HeadlessSession`] produces
pub type EventSink = Box<dyn Fn(HeadlessEvent) + Send + Sync>;

/// Options for a headless run
#[derive(Debug, Clone)]
pub struct HeadlessOptions {
    pub project_dir: PathBuf,
    pub app_id: String,
    pub platform: Platform,
    /// Overrides the version read from the project's package.json
    pub runtime_version: Option<String>,
    /// Send watch batches as hot module reloads with a full-project fallback
    pub hot_module_reload: bool,
}

/// Sync state for one app on one device
pub struct HeadlessSession<D> {
    orchestrator: Arc<SyncOrchestrator>,
    device: Arc<D>,
    app: DeviceAppData,
    runtime_version: String,
    hot_module_reload: bool,
    /// Every file currently known to belong to the project
    project_files: BTreeSet<PathBuf>,
    batch: u64,
    sink: EventSink,
}

impl<D: Device + Sync> HeadlessSession<D> {
    pub fn new(
        orchestrator: Arc<SyncOrchestrator>,
        device: Arc<D>,
        app: DeviceAppData,
        runtime_version: impl Into<String>,
    ) -> Self {
        Self {
            orchestrator,
            device,
            app,
            runtime_version: runtime_version.into(),
            hot_module_reload: false,
            project_files: BTreeSet::new(),
            batch: 0,
            sink: Box::new(|event| event.emit()),
        }
    }

    pub fn with_hot_module_reload(mut self, enabled: bool) -> Self {
        self.hot_module_reload = enabled;
        self
    }

    /// Route events somewhere other than stdout.
    pub fn with_sink(mut self, sink: EventSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn project_files(&self) -> impl Iterator<Item = &PathBuf> {
        self.project_files.iter()
    }

    /// Push the whole project and restart the app.
    ///
    /// Recoverable failures are reported as `sync_failed` and yield `Ok(None)`.
    pub async fn initial_sync(&mut self, files: Vec<PathBuf>) -> Result<Option<SyncResult>> {
        self.project_files = files.iter().cloned().collect();

        let request = self.request(files, Vec::new()).with_flags(SyncFlags {
            use_hot_module_reload: false,
            is_full_sync: true,
        });

        self.run(SyncKind::Full, &request).await
    }

    /// Handle one watcher event.
    pub async fn handle_watch_event(&mut self, event: WatchEvent) -> Result<Option<SyncResult>> {
        match event {
            WatchEvent::FilesChanged { changed, removed } => {
                for path in &removed {
                    self.project_files.remove(path);
                }
                self.project_files.extend(changed.iter().cloned());
                self.batch += 1;

                let mut request = self.request(changed, removed);
                if self.hot_module_reload {
                    let fallback = self.project_files.iter().cloned().collect();
                    request = request
                        .with_flags(SyncFlags {
                            use_hot_module_reload: true,
                            is_full_sync: false,
                        })
                        .with_hmr(HmrPayload::new(format!("batch-{}", self.batch), fallback));
                }

                self.run(SyncKind::Watch, &request).await
            }
            WatchEvent::Error { message } => {
                warn!("Watcher error: {}", message);
                (self.sink)(HeadlessEvent::watcher_error(message));
                Ok(None)
            }
        }
    }

    fn request(&self, files_to_sync: Vec<PathBuf>, files_to_remove: Vec<PathBuf>) -> SyncRequest<D> {
        SyncRequest::new(
            Arc::clone(&self.device),
            self.app.clone(),
            self.runtime_version.clone(),
        )
        .with_files(files_to_sync, files_to_remove)
    }

    async fn run(&self, kind: SyncKind, request: &SyncRequest<D>) -> Result<Option<SyncResult>> {
        (self.sink)(HeadlessEvent::sync_started(
            kind,
            request.files_to_sync.len(),
            request.files_to_remove.len(),
        ));

        let started = Instant::now();
        let outcome = match kind {
            SyncKind::Full => self.orchestrator.full_sync(request).await,
            SyncKind::Watch => self.orchestrator.watch_sync(request).await,
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => {
                (self.sink)(HeadlessEvent::sync_completed(kind, &result, duration_ms));
                Ok(Some(result))
            }
            Err(e) => {
                let fatal = e.is_fatal();
                (self.sink)(HeadlessEvent::sync_failed(kind, e.to_string(), fatal));
                if fatal {
                    Err(e)
                } else {
                    error!("Sync failed: {}", e);
                    Ok(None)
                }
            }
        }
    }
}

/// Run a headless live sync session against `device` until a termination
/// signal arrives.
pub async fn run_headless<D>(device: Arc<D>, options: HeadlessOptions) -> Result<()>
where
    D: Device + Sync + 'static,
{
    info!("Live sync starting in headless mode");
    info!("Project: {}", options.project_dir.display());
    info!("Device: {} ({})", device.identifier(), device.platform());

    let settings = load_settings(&options.project_dir);
    let runtime_version = match options.runtime_version.clone() {
        Some(version) => version,
        None => project_runtime_version(&options.project_dir, options.platform)?,
    };
    info!("Runtime version: {}", runtime_version);

    let watcher_config = WatcherConfig::from_settings(&settings.watcher);
    let device_root = settings.sync.device_app_root_for(&options.app_id);
    let orchestrator = Arc::new(SyncOrchestrator::new(settings)?);
    let mut shutdown_rx = spawn_signal_handler(Arc::clone(&orchestrator));

    let app = DeviceAppData::new(
        options.app_id.clone(),
        options.platform,
        options.project_dir.clone(),
        device_root,
    );
    let mut session = HeadlessSession::new(
        Arc::clone(&orchestrator),
        device,
        app,
        runtime_version,
    )
    .with_hot_module_reload(options.hot_module_reload);

    let files = watcher_config.collect_files(&options.project_dir)?;
    info!("Initial sync of {} file(s)", files.len());
    session.initial_sync(files).await?;

    let (event_tx, mut event_rx) = mpsc::channel(64);
    let mut watcher = FileWatcher::new(options.project_dir.clone(), watcher_config);
    watcher.start(event_tx).map_err(Error::config)?;

    let result = loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                info!("Shutdown complete, leaving sync loop");
                break Ok(());
            }
            event = event_rx.recv() => match event {
                Some(event) => {
                    if let Err(e) = session.handle_watch_event(event).await {
                        break Err(e);
                    }
                }
                None => {
                    info!("Watcher channel closed");
                    break Ok(());
                }
            }
        }
    };

    watcher.stop();
    orchestrator.shutdown().await;
    HeadlessEvent::shutdown().emit();

    info!("Live sync headless mode exiting");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use livesync_device::test_utils::{FakeDevice, SocketMode};
    use livesync_engine::Settings;
    use tempfile::TempDir;

    const APP_ID: &str = "org.example.app";

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        device: Arc<FakeDevice>,
        events: Arc<Mutex<Vec<HeadlessEvent>>>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let root = dir.path().to_path_buf();
            std::fs::create_dir_all(root.join("app")).unwrap();
            std::fs::write(root.join("app/main.js"), "main").unwrap();
            std::fs::write(root.join("app/view.js"), "view").unwrap();
            Self {
                _dir: dir,
                root,
                device: Arc::new(FakeDevice::android("emulator-5554")),
                events: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn session(&self, runtime: &str) -> HeadlessSession<FakeDevice> {
            let orchestrator = Arc::new(SyncOrchestrator::new(Settings::default()).unwrap());
            let app = DeviceAppData::new(
                APP_ID,
                Platform::Android,
                self.root.clone(),
                format!("/data/local/tmp/{}/sync", APP_ID),
            );
            let events = Arc::clone(&self.events);
            HeadlessSession::new(orchestrator, Arc::clone(&self.device), app, runtime)
                .with_sink(Box::new(move |event| events.lock().unwrap().push(event)))
        }

        fn file(&self, rel: &str) -> PathBuf {
            self.root.join(rel)
        }

        fn event_names(&self) -> Vec<&'static str> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .map(|event| match event {
                    HeadlessEvent::SyncStarted { .. } => "sync_started",
                    HeadlessEvent::SyncCompleted { .. } => "sync_completed",
                    HeadlessEvent::SyncFailed { .. } => "sync_failed",
                    HeadlessEvent::WatcherError { .. } => "watcher_error",
                    HeadlessEvent::Shutdown { .. } => "shutdown",
                })
                .collect()
        }
    }

    #[tokio::test]
    async fn test_initial_sync_restarts_and_reports() {
        let fx = Fixture::new();
        let mut session = fx.session("5.0.0");

        let result = session
            .initial_sync(vec![fx.file("app/main.js"), fx.file("app/view.js")])
            .await
            .unwrap()
            .expect("sync result");

        assert!(result.restarted);
        assert_eq!(fx.device.push_count(), 3);
        assert_eq!(fx.device.restart_count(), 1);
        assert_eq!(fx.event_names(), vec!["sync_started", "sync_completed"]);
        assert_eq!(session.project_files().count(), 2);
    }

    #[tokio::test]
    async fn test_watch_event_tracks_project_files() {
        let fx = Fixture::new();
        let mut session = fx.session("1.0.0");
        session
            .initial_sync(vec![fx.file("app/main.js"), fx.file("app/view.js")])
            .await
            .unwrap();

        std::fs::remove_file(fx.file("app/view.js")).unwrap();
        std::fs::write(fx.file("app/extra.js"), "extra").unwrap();
        session
            .handle_watch_event(WatchEvent::FilesChanged {
                changed: vec![fx.file("app/extra.js")],
                removed: vec![fx.file("app/view.js")],
            })
            .await
            .unwrap();

        let files: Vec<_> = session.project_files().cloned().collect();
        assert_eq!(files, vec![fx.file("app/extra.js"), fx.file("app/main.js")]);
    }

    #[tokio::test]
    async fn test_hot_module_reload_falls_back_to_project_files() {
        let fx = Fixture::new();
        let mut session = fx.session("5.0.0").with_hot_module_reload(true);
        session
            .initial_sync(vec![fx.file("app/main.js"), fx.file("app/view.js")])
            .await
            .unwrap();

        fx.device.set_socket_mode(SocketMode::Listening { reply: Some(false) });
        std::fs::write(fx.file("app/main.js"), "main v2").unwrap();

        let result = session
            .handle_watch_event(WatchEvent::FilesChanged {
                changed: vec![fx.file("app/main.js")],
                removed: Vec::new(),
            })
            .await
            .unwrap()
            .expect("sync result");

        assert!(result.did_recover);
    }

    #[tokio::test]
    async fn test_recoverable_failure_is_reported_not_raised() {
        let fx = Fixture::new();
        let mut session = fx.session("1.0.0");
        fx.device.fail_pushes(true);

        let outcome = session
            .initial_sync(vec![fx.file("app/main.js")])
            .await
            .unwrap();

        assert!(outcome.is_none());
        assert_eq!(fx.event_names(), vec!["sync_started", "sync_failed"]);
    }

    #[tokio::test]
    async fn test_watcher_error_is_reported() {
        let fx = Fixture::new();
        let mut session = fx.session("1.0.0");

        let outcome = session
            .handle_watch_event(WatchEvent::Error {
                message: "inotify limit".to_string(),
            })
            .await
            .unwrap();

        assert!(outcome.is_none());
        assert_eq!(fx.event_names(), vec!["watcher_error"]);
    }
}
