//! OS signal handling for graceful shutdown

use std::sync::Arc;

use tokio::sync::oneshot;

use crate::orchestrator::SyncOrchestrator;
use livesync_core::prelude::*;

/// Spawn a task that waits for a termination signal and shuts the
/// orchestrator down.
///
/// The returned receiver resolves once shutdown has completed.
pub fn spawn_signal_handler(orchestrator: Arc<SyncOrchestrator>) -> oneshot::Receiver<()> {
    let (done_tx, done_rx) = oneshot::channel();

    tokio::spawn(async move {
        if let Err(e) = wait_for_signal().await {
            error!("Signal handler error: {}", e);
            return;
        }

        info!("Shutdown signal received");
        orchestrator.shutdown().await;
        let _ = done_tx.send(());
    });

    done_rx
}

/// Wait for a termination signal
async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())
            .map_err(|e| Error::config(format!("Failed to create SIGINT handler: {}", e)))?;
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| Error::config(format!("Failed to create SIGTERM handler: {}", e)))?;

        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
        }

        Ok(())
    }

    #[cfg(windows)]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    #[tokio::test]
    async fn test_signal_handler_spawn() {
        let orchestrator = Arc::new(SyncOrchestrator::new(Settings::default()).unwrap());

        let mut done = spawn_signal_handler(Arc::clone(&orchestrator));
        tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;

        // no signal yet
        assert!(done.try_recv().is_err());
        assert!(!orchestrator.is_shutting_down());
    }
}
