//! livesync-engine - Sync orchestration for mobile live sync
//!
//! Decides for each batch of changed files whether a running application can
//! be patched in place or must be restarted, drives the chosen device
//! strategy, and recovers from hot updates that were not applied.
//!
//! ## Modules
//!
//! - [`config`] - `.livesync/config.toml` settings
//! - [`capability`] - Strategy selection from the runtime version
//! - [`change_set`] - Manifest-filtered change sets and their classification
//! - [`strategy`] - Socket and legacy device strategies
//! - [`orchestrator`] - [`SyncOrchestrator`], full and watch syncs
//! - [`session`] - Per (device, app) state
//! - [`runtime`] - Runtime version from `package.json`
//! - [`watcher`] - Debounced file watcher
//! - [`signals`] - Graceful shutdown on SIGINT/SIGTERM

pub mod capability;
pub mod change_set;
pub mod config;
pub mod orchestrator;
pub mod runtime;
pub mod session;
pub mod signals;
pub mod strategy;
pub mod watcher;

pub use capability::{select_strategy, StrategyKind};
pub use change_set::{classify, ChangeSet, Classification, RestartReason, StructuralMatcher, SyncDecision};
pub use config::{init_config_dir, load_settings, Settings};
pub use orchestrator::{HmrPayload, SyncFlags, SyncOrchestrator, SyncRequest, SyncResult};
pub use runtime::project_runtime_version;
pub use session::{SessionKey, SyncSession};
pub use signals::spawn_signal_handler;
pub use strategy::{DeviceStrategy, LegacySyncStrategy, SocketStrategy, SyncStrategy};
pub use watcher::{FileWatcher, WatchEvent, WatcherConfig};
