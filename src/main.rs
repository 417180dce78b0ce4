//! livesync - live update synchronization for mobile apps
//!
//! This is the binary entry point. All logic lives in the library.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{eyre, Result};

use livesync_core::{Error, Platform};
use livesync_device::AdbDevice;
use livesync_engine::init_config_dir;
use mobile_livesync::{run_headless, HeadlessOptions};

/// livesync - push project changes to a running app and reload it
#[derive(Parser, Debug)]
#[command(name = "livesync")]
#[command(about = "Live update synchronization for mobile apps", long_about = None)]
struct Args {
    /// Path to the project
    #[arg(value_name = "PATH")]
    path: Option<PathBuf>,

    /// Device serial to sync to
    #[arg(long)]
    device: Option<String>,

    /// Application identifier (package name / bundle id)
    #[arg(long)]
    app_id: Option<String>,

    /// Target platform
    #[arg(long, default_value = "android")]
    platform: String,

    /// Runtime version to assume instead of reading package.json
    #[arg(long)]
    runtime_version: Option<String>,

    /// Send watch batches as hot module reloads
    #[arg(long)]
    hmr: bool,

    /// Write a default .livesync/config.toml and exit
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    livesync_core::logging::init()?;

    let args = Args::parse();

    let base_path = args
        .path
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    let project_dir = dunce::canonicalize(&base_path).map_err(|e| {
        eyre!("Cannot open project at {}: {}", base_path.display(), e)
    })?;

    if args.init_config {
        init_config_dir(&project_dir)?;
        eprintln!(
            "Wrote {}",
            project_dir.join(".livesync").join("config.toml").display()
        );
        return Ok(());
    }

    let platform = Platform::parse(&args.platform)?;
    if platform != Platform::Android {
        // only the adb backend ships with the binary
        return Err(Error::unsupported_platform(platform.to_string()).into());
    }

    let serial = args
        .device
        .ok_or_else(|| eyre!("--device is required to sync"))?;
    let app_id = args
        .app_id
        .ok_or_else(|| eyre!("--app-id is required to sync"))?;

    let device = Arc::new(AdbDevice::new(serial)?);
    let options = HeadlessOptions {
        project_dir,
        app_id,
        platform,
        runtime_version: args.runtime_version,
        hot_module_reload: args.hmr,
    };

    let result = run_headless(Arc::clone(&device), options).await;
    device.remove_forwards().await;
    result?;
    Ok(())
}
