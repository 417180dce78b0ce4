//! Mobile Live Sync
//!
//! Headless driver that keeps an app on a connected device in sync with a
//! project on disk.

pub mod headless;

pub use headless::runner::{run_headless, EventSink, HeadlessOptions, HeadlessSession};
pub use headless::{HeadlessEvent, SyncKind};
