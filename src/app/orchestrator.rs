use super::state::ComponentRegistry;
use super::types::{ComponentState, ShutdownReason};
use crate::capture::ArtifactWriter;
use crate::config::MatchcastConfig;
use crate::error::Result;
use crate::events::EventBus;
use crate::pipeline::{Finalizer, MonitorReport};
use crate::publish::{MetadataBuilder, Publisher};
use crate::rating::RatingService;
use crate::stats::HttpStatExtractor;
use crate::store::{JsonMatchStore, MatchStore};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Background tasks started by the orchestrator
#[derive(Default)]
pub(super) struct RunningTasks {
    pub(super) monitor: Option<JoinHandle<Result<MonitorReport>>>,
    pub(super) finalizer: Option<JoinHandle<usize>>,
    pub(super) publisher: Option<JoinHandle<()>>,
}

/// Main application coordinator for the recording daemon
pub struct MatchcastOrchestrator {
    pub(super) config: MatchcastConfig,
    pub(super) event_bus: EventBus,
    pub(super) writer: Arc<ArtifactWriter>,
    pub(super) store: Arc<dyn MatchStore>,
    pub(super) finalizer: Option<Finalizer>,
    pub(super) publisher: Option<Arc<Publisher>>,
    pub(super) tasks: RunningTasks,

    // Lifecycle management
    pub(super) components: ComponentRegistry,
    pub(super) shutdown_sender: Arc<Mutex<Option<oneshot::Sender<ShutdownReason>>>>,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
    /// Stops frame consumption; the finalizer follows once the hand-off channel closes
    pub(super) monitor_token: CancellationToken,
    pub(super) publisher_token: CancellationToken,
}

impl MatchcastOrchestrator {
    /// Create a new orchestrator with the given configuration
    ///
    /// Opens the match store, reads credentials and builds the publication
    /// stack. Any failure here is a configuration-class failure.
    pub async fn new(config: MatchcastConfig) -> Result<Self> {
        let event_bus = EventBus::new(config.system.event_bus_capacity);
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();

        let store: Arc<dyn MatchStore> =
            Arc::new(JsonMatchStore::open(Path::new(&config.store.path)).await?);
        let writer = Arc::new(ArtifactWriter::new(config.artifacts.clone()));

        let publisher = if config.publisher.enabled {
            let publisher = Publisher::open(&config.publisher, Arc::clone(&store), false)
                .await?
                .with_event_bus(event_bus.clone());
            Some(Arc::new(publisher))
        } else {
            info!("Publishing disabled, matches will only be recorded");
            None
        };

        let metadata = MetadataBuilder::new(&config.publisher, writer.timezone());
        let mut finalizer = Finalizer::new(
            Arc::clone(&writer),
            Arc::clone(&store),
            RatingService::new(Arc::clone(&store), config.rating.clone()),
            metadata,
        )
        .with_event_bus(event_bus.clone());

        if let Some(endpoint) = &config.extractor.endpoint {
            let timeout = Duration::from_secs(config.extractor.timeout_seconds);
            let extractor = HttpStatExtractor::new(endpoint, config.extractor.api_key()?, timeout)?;
            finalizer = finalizer.with_extractor(Arc::new(extractor), timeout);
        } else {
            info!("No stat extractor configured, matches are recorded without stats");
        }

        if let Some(publisher) = &publisher {
            finalizer = finalizer.with_publisher(Arc::clone(publisher));
        }

        Ok(Self {
            config,
            event_bus,
            writer,
            store,
            finalizer: Some(finalizer),
            publisher,
            tasks: RunningTasks::default(),
            components: ComponentRegistry::default(),
            shutdown_sender: Arc::new(Mutex::new(Some(shutdown_sender))),
            shutdown_receiver: Some(shutdown_receiver),
            monitor_token: CancellationToken::new(),
            publisher_token: CancellationToken::new(),
        })
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn store(&self) -> &Arc<dyn MatchStore> {
        &self.store
    }

    pub fn publisher(&self) -> Option<&Arc<Publisher>> {
        self.publisher.as_ref()
    }

    pub async fn component_state(&self, component: &str) -> Option<ComponentState> {
        self.components.get(component).await
    }

    pub async fn component_states(&self) -> BTreeMap<String, ComponentState> {
        self.components.snapshot().await
    }

    /// Ask the running daemon to shut down
    pub async fn request_shutdown(&self, reason: ShutdownReason) {
        request_shutdown(&self.shutdown_sender, reason).await;
    }
}

/// Deliver the first shutdown reason; later requests are ignored
pub(super) async fn request_shutdown(
    sender: &Mutex<Option<oneshot::Sender<ShutdownReason>>>,
    reason: ShutdownReason,
) {
    if let Some(sender) = sender.lock().await.take() {
        let _ = sender.send(reason);
    }
}
