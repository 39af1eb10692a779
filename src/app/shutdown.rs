use super::state::{FINALIZER, MONITOR, PUBLISHER};
use super::{ComponentState, MatchcastOrchestrator, ShutdownReason};
use crate::error::{MatchcastError, Result};
use crate::events::PipelineEvent;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

impl MatchcastOrchestrator {
    /// Stop components in pipeline order
    ///
    /// The monitor settles its session first, then the finalizer records
    /// whatever was handed off, then the publisher gets the grace period to
    /// finish an in-flight transfer.
    pub async fn shutdown(&mut self, reason: &ShutdownReason) -> Result<i32> {
        info!("Beginning graceful shutdown");
        if let Err(e) = self
            .event_bus
            .publish(PipelineEvent::ShutdownRequested {
                timestamp: SystemTime::now(),
                reason: reason.to_string(),
            })
            .await
        {
            warn!("Failed to announce shutdown: {}", e);
        }

        let grace = Duration::from_secs(self.config.system.shutdown_grace_seconds);
        let mut exit_code = match reason {
            ShutdownReason::Error(_) => 1,
            _ => 0,
        };

        self.monitor_token.cancel();
        let monitor = self.tasks.monitor.take();
        match self.stop_task(MONITOR, monitor, grace).await {
            Ok(Some(Ok(report))) => info!(
                "Monitor finished: {} frames, {} matches handed off",
                report.frames, report.completed
            ),
            Ok(Some(Err(e))) => {
                error!("Monitor stopped with error: {}", e);
                exit_code = 1;
            }
            Ok(None) => {}
            Err(e) => {
                error!("Error stopping monitor: {}", e);
                exit_code = 1;
            }
        }

        // Never started: drop the unused finalizer so nothing waits on it
        self.finalizer.take();
        let finalizer = self.tasks.finalizer.take();
        match self.stop_task(FINALIZER, finalizer, grace).await {
            Ok(Some(recorded)) => info!("Finalizer recorded {} matches", recorded),
            Ok(None) => {}
            Err(e) => {
                error!("Error stopping finalizer: {}", e);
                exit_code = 1;
            }
        }

        self.publisher_token.cancel();
        let publisher = self.tasks.publisher.take();
        if let Err(e) = self.stop_task(PUBLISHER, publisher, grace).await {
            error!("Error stopping publisher: {}", e);
            exit_code = 1;
        }

        info!(
            "Graceful shutdown completed with exit code {} ({})",
            exit_code,
            self.components.summary().await
        );
        Ok(exit_code)
    }

    /// Wait up to `grace` for a task, aborting it on timeout
    async fn stop_task<T>(
        &self,
        component: &str,
        handle: Option<JoinHandle<T>>,
        grace: Duration,
    ) -> Result<Option<T>> {
        let Some(mut handle) = handle else {
            return Ok(None);
        };

        info!("Stopping {} component", component);
        self.components.set(component, ComponentState::Stopping).await;

        match timeout(grace, &mut handle).await {
            Ok(Ok(value)) => {
                self.components.set(component, ComponentState::Stopped).await;
                info!("{} component stopped", component);
                Ok(Some(value))
            }
            Ok(Err(e)) => {
                self.components.set(component, ComponentState::Failed).await;
                error!("{} component task failed: {}", component, e);
                Err(MatchcastError::component(
                    component.to_string(),
                    e.to_string(),
                ))
            }
            Err(_) => {
                handle.abort();
                self.components.set(component, ComponentState::Failed).await;
                error!("{} component stop timeout after {:?}", component, grace);
                Err(MatchcastError::component(
                    component.to_string(),
                    format!("stop timeout after {:?}", grace),
                ))
            }
        }
    }
}
