use crate::error::EventBusError;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events that can occur in the recording pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    /// Start boundary confirmed, a session is recording
    MatchStarted {
        session_id: Uuid,
        started_at: SystemTime,
    },
    /// End boundary confirmed, the result screen is being collected
    MatchEnded {
        session_id: Uuid,
        ended_at: SystemTime,
    },
    /// Session dropped before producing artifacts
    SessionDiscarded { session_id: Uuid, reason: String },
    /// The store assigned an identity to a finished match
    MatchRecorded {
        match_id: u64,
        video_path: String,
        has_stats: bool,
    },
    /// Stat extraction failed; the record was created without stats
    StatsUnavailable { match_id: u64, reason: String },
    /// Rating deltas were applied for a match
    RatingsApplied { match_id: u64, players: usize },
    /// An artifact was added to the publication queue
    PublicationQueued { key: String },
    /// An artifact reached the remote host
    PublicationCompleted { key: String, url: String },
    /// An artifact failed to publish
    PublicationFailed { key: String, reason: String },
    /// The daily budget is spent for the current quota period
    QuotaExhausted { consumed: u32, budget: u32 },
    /// A system error occurred in a component
    SystemError { component: String, error: String },
    /// System shutdown requested
    ShutdownRequested {
        timestamp: SystemTime,
        reason: String,
    },
}

impl PipelineEvent {
    /// Get the timestamp of the event
    pub fn timestamp(&self) -> SystemTime {
        match self {
            PipelineEvent::MatchStarted { started_at, .. } => *started_at,
            PipelineEvent::MatchEnded { ended_at, .. } => *ended_at,
            PipelineEvent::ShutdownRequested { timestamp, .. } => *timestamp,
            _ => SystemTime::now(),
        }
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            PipelineEvent::MatchStarted { session_id, .. } => {
                format!("Match session {} started", session_id)
            }
            PipelineEvent::MatchEnded { session_id, .. } => {
                format!("Match session {} ended", session_id)
            }
            PipelineEvent::SessionDiscarded { session_id, reason } => {
                format!("Match session {} discarded: {}", session_id, reason)
            }
            PipelineEvent::MatchRecorded {
                match_id,
                video_path,
                has_stats,
            } => format!(
                "Match #{} recorded at {} ({})",
                match_id,
                video_path,
                if *has_stats { "with stats" } else { "no stats" }
            ),
            PipelineEvent::StatsUnavailable { match_id, reason } => {
                format!("Stats unavailable for match #{}: {}", match_id, reason)
            }
            PipelineEvent::RatingsApplied { match_id, players } => {
                format!("Ratings applied for match #{} ({} players)", match_id, players)
            }
            PipelineEvent::PublicationQueued { key } => format!("Publication queued: {}", key),
            PipelineEvent::PublicationCompleted { key, url } => {
                format!("Published {} to {}", key, url)
            }
            PipelineEvent::PublicationFailed { key, reason } => {
                format!("Publication of {} failed: {}", key, reason)
            }
            PipelineEvent::QuotaExhausted { consumed, budget } => {
                format!("Quota exhausted ({}/{} units)", consumed, budget)
            }
            PipelineEvent::SystemError { component, error } => {
                format!("Error in {}: {}", component, error)
            }
            PipelineEvent::ShutdownRequested { reason, .. } => {
                format!("Shutdown requested: {}", reason)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::MatchStarted { .. } => "match_started",
            PipelineEvent::MatchEnded { .. } => "match_ended",
            PipelineEvent::SessionDiscarded { .. } => "session_discarded",
            PipelineEvent::MatchRecorded { .. } => "match_recorded",
            PipelineEvent::StatsUnavailable { .. } => "stats_unavailable",
            PipelineEvent::RatingsApplied { .. } => "ratings_applied",
            PipelineEvent::PublicationQueued { .. } => "publication_queued",
            PipelineEvent::PublicationCompleted { .. } => "publication_completed",
            PipelineEvent::PublicationFailed { .. } => "publication_failed",
            PipelineEvent::QuotaExhausted { .. } => "quota_exhausted",
            PipelineEvent::SystemError { .. } => "system_error",
            PipelineEvent::ShutdownRequested { .. } => "shutdown_requested",
        }
    }
}

/// Async event bus for component coordination using broadcast channels
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    /// Subscribe with a filter
    pub fn subscribe_filtered(&self, filter: EventFilter, name: &str) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe(), filter, name.to_string())
    }

    /// Publish an event to all subscribers
    ///
    /// Returns the number of receivers that got the event. Having no
    /// subscribers is not an error.
    pub async fn publish(&self, event: PipelineEvent) -> Result<usize, EventBusError> {
        match &event {
            PipelineEvent::SystemError { component, error } => {
                error!("System error in {}: {}", component, error);
            }
            PipelineEvent::PublicationFailed { key, reason } => {
                warn!("Publication of {} failed: {}", key, reason);
            }
            PipelineEvent::QuotaExhausted { consumed, budget } => {
                warn!("Quota exhausted: {}/{} units consumed", consumed, budget);
            }
            PipelineEvent::ShutdownRequested { reason, .. } => {
                info!("Shutdown requested: {}", reason);
            }
            _ => debug!("Publishing event: {}", event.description()),
        }

        if self.sender.receiver_count() == 0 {
            return Ok(0);
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Check if there are any active subscribers
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Accept all events
    All,
    /// Accept only specific event types
    EventTypes(Vec<&'static str>),
    /// Accept events concerning a single match id
    Match(u64),
    /// Custom filter function
    Custom(fn(&PipelineEvent) -> bool),
}

impl EventFilter {
    /// Check if an event passes this filter
    pub fn matches(&self, event: &PipelineEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Match(id) => match event {
                PipelineEvent::MatchRecorded { match_id, .. }
                | PipelineEvent::StatsUnavailable { match_id, .. }
                | PipelineEvent::RatingsApplied { match_id, .. } => match_id == id,
                _ => false,
            },
            EventFilter::Custom(filter_fn) => filter_fn(event),
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<PipelineEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(
        receiver: broadcast::Receiver<PipelineEvent>,
        filter: EventFilter,
        name: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next event that passes the filter
    pub async fn recv(&mut self) -> Result<PipelineEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<Option<PipelineEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}
