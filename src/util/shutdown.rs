//! Graceful shutdown handling.

use tokio::sync::broadcast;
use tracing::{error, info};

/// Broadcasts a single shutdown notification to every long-running task.
#[derive(Clone)]
pub struct ShutdownSignal {
    sender: broadcast::Sender<()>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self { sender }
    }

    /// Subscribe before spawning the task that should observe shutdown.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    /// Trigger shutdown.
    pub fn shutdown(&self) {
        let _ = self.sender.send(());
    }

    /// Wait for Ctrl+C, then trigger shutdown.
    pub async fn shutdown_on_ctrl_c(&self) {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received Ctrl+C, shutting down"),
            Err(e) => error!(error = %e, "failed to listen for Ctrl+C, shutting down"),
        }
        self.shutdown();
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
