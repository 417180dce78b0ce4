//! File watcher feeding watch syncs
//!
//! Watches the configured project directories and reports debounced batches
//! of changed and removed files.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{EventKind, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebounceEventResult};
use tokio::sync::mpsc;

use crate::config::WatcherSettings;
use livesync_core::prelude::*;

/// Default debounce duration in milliseconds
pub const DEFAULT_DEBOUNCE_MS: u64 = 300;

/// Default paths to watch (relative to project root)
pub const DEFAULT_WATCH_PATHS: &[&str] = &["app"];

/// Events produced by the watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A debounced batch of file changes
    FilesChanged {
        changed: Vec<PathBuf>,
        removed: Vec<PathBuf>,
    },
    /// The watcher could not be created or reported an error
    Error { message: String },
}

/// Configuration for the file watcher
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Paths to watch (relative to project root)
    pub paths: Vec<PathBuf>,
    /// Debounce duration
    pub debounce: Duration,
    /// File extensions to watch (empty = all files)
    pub extensions: Vec<String>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            paths: DEFAULT_WATCH_PATHS.iter().map(PathBuf::from).collect(),
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            extensions: Vec::new(),
        }
    }
}

impl WatcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &WatcherSettings) -> Self {
        Self {
            paths: settings.paths.iter().map(PathBuf::from).collect(),
            debounce: Duration::from_millis(settings.debounce_ms),
            extensions: settings.extensions.clone(),
        }
    }

    /// Set custom paths to watch
    pub fn with_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.paths = paths;
        self
    }

    /// Set debounce duration in milliseconds
    pub fn with_debounce_ms(mut self, ms: u64) -> Self {
        self.debounce = Duration::from_millis(ms);
        self
    }

    /// Set file extensions to watch
    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    /// Every file under the watched paths of `project_root` that passes the
    /// extension filter, sorted. Missing watch paths are skipped.
    pub fn collect_files(&self, project_root: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut pending: Vec<PathBuf> = self
            .paths
            .iter()
            .map(|p| project_root.join(p))
            .filter(|p| p.exists())
            .collect();

        while let Some(path) = pending.pop() {
            if path.is_dir() {
                for entry in std::fs::read_dir(&path)? {
                    pending.push(entry?.path());
                }
            } else if path.is_file() && self.matches_extension(&path) {
                files.push(path);
            }
        }

        files.sort();
        files.dedup();
        Ok(files)
    }

    fn matches_extension(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }
}

/// Fold raw notify events into one [`WatchEvent::FilesChanged`] batch.
///
/// The current state of the file system decides the kind of each path, so
/// a file created and deleted within the debounce window is reported as
/// removed. Directories and access events are ignored. Returns `None` when
/// nothing relevant changed.
pub fn collect_changes<'a>(
    events: impl IntoIterator<Item = &'a notify::Event>,
    config: &WatcherConfig,
) -> Option<WatchEvent> {
    let paths: BTreeSet<&PathBuf> = events
        .into_iter()
        .filter(|event| !matches!(event.kind, EventKind::Access(_)))
        .flat_map(|event| event.paths.iter())
        .filter(|path| config.matches_extension(path))
        .collect();

    let mut changed = Vec::new();
    let mut removed = Vec::new();
    for path in paths {
        if path.is_file() {
            changed.push(path.clone());
        } else if !path.exists() {
            removed.push(path.clone());
        }
    }

    if changed.is_empty() && removed.is_empty() {
        None
    } else {
        Some(WatchEvent::FilesChanged { changed, removed })
    }
}

/// Watches a project and sends [`WatchEvent`]s
pub struct FileWatcher {
    /// Project root directory
    project_root: PathBuf,
    config: WatcherConfig,
    /// Handle to stop the watcher
    stop_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl FileWatcher {
    pub fn new(project_root: PathBuf, config: WatcherConfig) -> Self {
        Self {
            project_root,
            config,
            stop_tx: None,
        }
    }

    /// Start watching; batches are sent to `event_tx`.
    pub fn start(&mut self, event_tx: mpsc::Sender<WatchEvent>) -> std::result::Result<(), String> {
        if self.is_running() {
            return Err("Watcher is already running".to_string());
        }

        let project_root = self.project_root.clone();
        let config = self.config.clone();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel();

        self.stop_tx = Some(stop_tx);

        tokio::task::spawn_blocking(move || {
            Self::run_watcher(project_root, config, event_tx, stop_rx);
        });

        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }

    pub fn is_running(&self) -> bool {
        self.stop_tx.is_some()
    }

    fn run_watcher(
        project_root: PathBuf,
        config: WatcherConfig,
        event_tx: mpsc::Sender<WatchEvent>,
        mut stop_rx: tokio::sync::oneshot::Receiver<()>,
    ) {
        let tx = event_tx.clone();
        let filter = config.clone();

        let debouncer_result = new_debouncer(
            config.debounce,
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    if let Some(batch) = collect_changes(events.iter().map(|e| &e.event), &filter) {
                        debug!("File watcher batch: {:?}", batch);
                        let _ = tx.blocking_send(batch);
                    }
                }
                Err(errors) => {
                    for error in errors {
                        warn!("File watcher error: {:?}", error);
                        let _ = tx.blocking_send(WatchEvent::Error {
                            message: error.to_string(),
                        });
                    }
                }
            },
        );

        let mut debouncer = match debouncer_result {
            Ok(d) => d,
            Err(e) => {
                error!("Failed to create file watcher: {}", e);
                let _ = event_tx.blocking_send(WatchEvent::Error {
                    message: format!("Failed to create watcher: {}", e),
                });
                return;
            }
        };

        for relative_path in &config.paths {
            let full_path = project_root.join(relative_path);
            if full_path.exists() {
                if let Err(e) = debouncer.watch(&full_path, RecursiveMode::Recursive) {
                    warn!("Failed to watch {}: {}", full_path.display(), e);
                } else {
                    info!("Watching: {}", full_path.display());
                }
            } else {
                warn!("Watch path does not exist: {}", full_path.display());
            }
        }

        loop {
            match stop_rx.try_recv() {
                Ok(()) | Err(tokio::sync::oneshot::error::TryRecvError::Closed) => {
                    info!("File watcher stopping");
                    break;
                }
                Err(tokio::sync::oneshot::error::TryRecvError::Empty) => {
                    std::thread::sleep(Duration::from_millis(100));
                }
            }
        }
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
