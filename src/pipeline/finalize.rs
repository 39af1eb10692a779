use super::MatchHandoff;
use crate::capture::ArtifactWriter;
use crate::error::Result;
use crate::events::{EventBus, PipelineEvent};
use crate::identity::ArtifactIdentity;
use crate::publish::{Enqueued, MetadataBuilder, PublicationTask, Publisher};
use crate::rating::{RatingOutcome, RatingService};
use crate::stats::{extract_with_timeout, MatchStats, StatExtractor};
use crate::store::{MatchRecord, MatchStore, NewMatchRecord};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// What finalization did with one hand-off
#[derive(Debug, Clone)]
pub struct FinalizeOutcome {
    pub record: MatchRecord,
    pub ratings: RatingOutcome,
    /// `None` when publishing is disabled or the enqueue failed
    pub queued: Option<Enqueued>,
}

/// Turns hand-offs into match records, ratings and publication tasks
pub struct Finalizer {
    writer: Arc<ArtifactWriter>,
    store: Arc<dyn MatchStore>,
    ratings: RatingService,
    metadata: MetadataBuilder,
    extractor: Option<Arc<dyn StatExtractor>>,
    extract_timeout: Duration,
    publisher: Option<Arc<Publisher>>,
    event_bus: Option<EventBus>,
}

impl Finalizer {
    pub fn new(
        writer: Arc<ArtifactWriter>,
        store: Arc<dyn MatchStore>,
        ratings: RatingService,
        metadata: MetadataBuilder,
    ) -> Self {
        Self {
            writer,
            store,
            ratings,
            metadata,
            extractor: None,
            extract_timeout: Duration::from_secs(120),
            publisher: None,
            event_bus: None,
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn StatExtractor>, timeout: Duration) -> Self {
        self.extractor = Some(extractor);
        self.extract_timeout = timeout;
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    async fn emit(&self, event: PipelineEvent) {
        if let Some(bus) = &self.event_bus {
            if let Err(e) = bus.publish(event).await {
                error!("Failed to publish finalizer event: {}", e);
            }
        }
    }

    /// Finalize hand-offs until the monitor closes the channel
    pub async fn run(self: Arc<Self>, mut receiver: mpsc::Receiver<MatchHandoff>) -> usize {
        info!("Finalizer started");
        let mut recorded = 0;

        while let Some(handoff) = receiver.recv().await {
            let session_id = handoff.session.session_id;
            match self.finalize(handoff).await {
                Ok(_) => recorded += 1,
                Err(e) => {
                    error!("Failed to record match session {}: {}", session_id, e);
                    self.emit(PipelineEvent::SystemError {
                        component: "finalizer".to_string(),
                        error: format!("session {}: {}", session_id, e),
                    })
                    .await;
                }
            }
        }

        info!("Finalizer stopped after recording {} matches", recorded);
        recorded
    }

    /// Record one completed session
    ///
    /// Stats failures degrade to a record without stats; only a store
    /// failure loses the record, and the artifacts stay on disk either way.
    pub async fn finalize(&self, handoff: MatchHandoff) -> Result<FinalizeOutcome> {
        let (stats, stats_error) = self.extract(&handoff).await;

        let mut record = self
            .store
            .create(NewMatchRecord {
                started_at: DateTime::<Utc>::from(handoff.session.started_at),
                ended_at: DateTime::<Utc>::from(handoff.ended_at),
                stats,
                video_path: handoff.paths.video.clone(),
                clip_path: handoff.paths.clip.clone(),
            })
            .await?;
        let match_id = record.id;

        if let Some(reason) = stats_error {
            warn!(
                "Match #{} recorded without stats, flagged for backfill: {}",
                match_id, reason
            );
            self.emit(PipelineEvent::StatsUnavailable {
                match_id: match_id.0,
                reason,
            })
            .await;
        }

        match self.writer.assign_identity(&handoff.paths, match_id).await {
            Ok(paths) => {
                match self
                    .store
                    .update_artifact_paths(match_id, &paths.video, &paths.clip)
                    .await
                {
                    Ok(()) => {
                        record.video_path = paths.video;
                        record.clip_path = paths.clip;
                    }
                    Err(e) => error!(
                        "Match #{} artifacts renamed but the store kept the old paths: {}",
                        match_id, e
                    ),
                }
            }
            Err(e) => warn!(
                "Match #{} keeps its provisional artifact names: {}",
                match_id, e
            ),
        }

        let ratings = match self.ratings.apply(&record).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Ratings for match #{} not applied: {}", match_id, e);
                self.emit(PipelineEvent::SystemError {
                    component: "ratings".to_string(),
                    error: format!("match #{}: {}", match_id, e),
                })
                .await;
                RatingOutcome::Skipped(e.to_string())
            }
        };
        if let RatingOutcome::Applied(changes) = &ratings {
            self.emit(PipelineEvent::RatingsApplied {
                match_id: match_id.0,
                players: changes.len(),
            })
            .await;
        }

        let queued = self.enqueue(&record).await;

        info!(
            "Recorded match #{} ({})",
            match_id,
            record.video_path.display()
        );
        self.emit(PipelineEvent::MatchRecorded {
            match_id: match_id.0,
            video_path: record.video_path.display().to_string(),
            has_stats: record.has_stats(),
        })
        .await;

        Ok(FinalizeOutcome {
            record,
            ratings,
            queued,
        })
    }

    async fn extract(&self, handoff: &MatchHandoff) -> (Option<MatchStats>, Option<String>) {
        let Some(extractor) = &self.extractor else {
            return (None, Some("no stat extractor configured".to_string()));
        };

        debug!(
            "Extracting stats for session {} with '{}'",
            handoff.session.session_id,
            extractor.name()
        );
        match extract_with_timeout(extractor.as_ref(), &handoff.paths.clip, self.extract_timeout)
            .await
        {
            // A record carries exactly one winner, or no stats at all
            Ok(stats) if stats.winner_count() != 1 => (
                None,
                Some(format!(
                    "result screen shows {} winners among {} players",
                    stats.winner_count(),
                    stats.participants.len()
                )),
            ),
            Ok(stats) => (Some(stats), None),
            Err(e) => (None, Some(e.to_string())),
        }
    }

    async fn enqueue(&self, record: &MatchRecord) -> Option<Enqueued> {
        let publisher = self.publisher.as_ref()?;
        let task = PublicationTask::new(
            ArtifactIdentity::Match { id: record.id },
            record.video_path.clone(),
            self.metadata.for_record(record),
        );

        match publisher.enqueue(task).await {
            Ok(enqueued) => Some(enqueued),
            Err(e) => {
                error!("Match #{} not queued for publication: {}", record.id, e);
                None
            }
        }
    }
}
