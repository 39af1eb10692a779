use super::orchestrator::request_shutdown;
use super::{MatchcastOrchestrator, ShutdownReason};
use crate::error::{MatchcastError, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

impl MatchcastOrchestrator {
    /// Wait for a shutdown reason, then shut down in order
    ///
    /// Returns the process exit code.
    pub async fn run(&mut self) -> Result<i32> {
        info!("Matchcast is running");

        let shutdown_receiver = self
            .shutdown_receiver
            .take()
            .ok_or_else(|| MatchcastError::system("Shutdown receiver already taken"))?;

        self.setup_signal_handlers();

        let shutdown_reason = shutdown_receiver
            .await
            .map_err(|_| MatchcastError::system("Shutdown channel closed unexpectedly"))?;

        info!("Shutdown initiated: {}", shutdown_reason);
        let exit_code = self.shutdown(&shutdown_reason).await?;

        info!("Matchcast shutdown complete");
        Ok(exit_code)
    }

    fn setup_signal_handlers(&self) {
        // SIGTERM (systemd stop), Unix only
        #[cfg(unix)]
        {
            let sender = Arc::clone(&self.shutdown_sender);
            tokio::spawn(async move {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        if sigterm.recv().await.is_some() {
                            info!("Received SIGTERM signal");
                            request_shutdown(&sender, ShutdownReason::Signal("SIGTERM".to_string()))
                                .await;
                        }
                    }
                    Err(e) => error!("Failed to register SIGTERM handler: {}", e),
                }
            });
        }

        // SIGINT (Ctrl+C)
        let sender = Arc::clone(&self.shutdown_sender);
        tokio::spawn(async move {
            if let Ok(()) = signal::ctrl_c().await {
                info!("Received SIGINT signal (Ctrl+C)");
                request_shutdown(&sender, ShutdownReason::Signal("SIGINT".to_string())).await;
            }
        });
    }
}
