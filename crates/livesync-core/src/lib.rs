//! # livesync-core - Core Domain Types
//!
//! Foundation crate for mobile live sync. Provides domain types, the error
//! taxonomy shared by the device layer and the sync engine, and logging setup.
//!
//! ## Public API
//!
//! ### Domain Types (`types`)
//! - [`Platform`] - Device platform (Android, iOS)
//! - [`DeviceAppData`] - An installed app and the device directory mirroring its project
//! - [`ChangeEntry`], [`ChangeKind`] - One modified or removed file in a change set
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Error enum with `fatal` vs `recoverable` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! ```rust
//! use livesync_core::prelude::*;
//! ```

pub mod error;
pub mod logging;
pub mod prelude;
pub mod types;

pub use error::{Error, Result, ResultExt};
pub use types::{ChangeEntry, ChangeKind, DeviceAppData, Platform};
