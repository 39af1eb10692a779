use super::orchestrator::request_shutdown;
use super::state::{FINALIZER, MONITOR, PUBLISHER};
use super::{ComponentState, MatchcastOrchestrator, ShutdownReason};
use crate::error::{MatchcastError, Result};
use crate::events::EventFilter;
use crate::pipeline::MatchMonitor;
use crate::source::open_source;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

impl MatchcastOrchestrator {
    /// Prepare the artifact directory and register components
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing matchcast components");

        let removed = self.writer.prepare().await?;
        if removed > 0 {
            warn!(
                "Removed {} partial artifacts left by an interrupted run",
                removed
            );
        }

        self.components.set(MONITOR, ComponentState::Stopped).await;
        self.components.set(FINALIZER, ComponentState::Stopped).await;
        if self.publisher.is_some() {
            self.components.set(PUBLISHER, ComponentState::Stopped).await;
        }

        info!(
            "Components initialized ({}), artifacts in {}",
            self.components.summary().await,
            self.writer.base_dir().display()
        );
        Ok(())
    }

    /// Open the frame source and start the background tasks
    ///
    /// Order is publisher, finalizer, monitor, so every consumer is running
    /// before the first frame is read.
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting matchcast");
        self.spawn_match_journal();

        if let Some(publisher) = &self.publisher {
            self.components.set(PUBLISHER, ComponentState::Starting).await;
            let publisher = Arc::clone(publisher);
            let token = self.publisher_token.clone();
            self.tasks.publisher = Some(tokio::spawn(publisher.run(token)));
            self.components.set(PUBLISHER, ComponentState::Running).await;
        }

        let finalizer = self
            .finalizer
            .take()
            .ok_or_else(|| MatchcastError::system("Finalizer already started"))?;
        let (handoff_tx, handoff_rx) = mpsc::channel(self.config.system.handoff_capacity);
        self.components.set(FINALIZER, ComponentState::Starting).await;
        self.tasks.finalizer = Some(tokio::spawn(Arc::new(finalizer).run(handoff_rx)));
        self.components.set(FINALIZER, ComponentState::Running).await;

        self.components.set(MONITOR, ComponentState::Starting).await;
        let source = match open_source(&self.config.source.path).await {
            Ok(source) => source,
            Err(e) => {
                error!(
                    "Failed to open frame source {}: {}",
                    self.config.source.path, e
                );
                self.components.set(MONITOR, ComponentState::Failed).await;
                return Err(e.into());
            }
        };

        let monitor = MatchMonitor::new(
            self.config.detector.clone(),
            Arc::clone(&self.writer),
            handoff_tx,
            Duration::from_secs(self.config.source.stall_timeout_seconds),
        )
        .with_event_bus(self.event_bus.clone());

        let token = self.monitor_token.clone();
        let shutdown = Arc::clone(&self.shutdown_sender);
        self.tasks.monitor = Some(tokio::spawn(async move {
            let result = monitor.run(source, token).await;
            let reason = match &result {
                Ok(_) => ShutdownReason::SourceEnded,
                Err(e) => ShutdownReason::Error(e.to_string()),
            };
            request_shutdown(&shutdown, reason).await;
            result
        }));
        self.components.set(MONITOR, ComponentState::Running).await;

        info!("Matchcast started ({})", self.components.summary().await);
        Ok(())
    }

    /// Log one line per match lifecycle event until publishing stops
    fn spawn_match_journal(&self) {
        let mut receiver = self.event_bus.subscribe_filtered(
            EventFilter::EventTypes(vec![
                "match_recorded",
                "session_discarded",
                "stats_unavailable",
                "publication_completed",
            ]),
            "journal",
        );
        let token = self.publisher_token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    event = receiver.recv() => match event {
                        Ok(event) => info!("{}", event.description()),
                        Err(_) => break,
                    },
                }
            }
        });
    }
}
