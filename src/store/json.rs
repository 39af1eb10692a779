use super::record::{MatchRecord, NewMatchRecord, PlayerRating, RatingChange, RatingSnapshot};
use super::MatchStore;
use crate::error::StoreError;
use crate::identity::MatchId;
use crate::persist::{read_json, write_json_atomic, ReadError};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    next_id: u64,
    records: Vec<MatchRecord>,
    ratings: RatingSnapshot,
    /// Matches whose rating changes were already applied
    rated_matches: BTreeSet<MatchId>,
}

/// Match store kept as a single JSON document
///
/// Every mutation rewrites the document atomically. Without a path the store
/// lives in memory only.
pub struct JsonMatchStore {
    path: Option<PathBuf>,
    document: Mutex<StoreDocument>,
}

impl JsonMatchStore {
    /// Open or create the store at `path`
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let unavailable = |details: String| StoreError::Unavailable {
            path: path.display().to_string(),
            details,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| unavailable(e.to_string()))?;
            }
        }

        let document = match read_json::<StoreDocument>(path) {
            Ok(Some(doc)) => doc,
            Ok(None) => StoreDocument {
                next_id: 1,
                ..StoreDocument::default()
            },
            Err(ReadError::Io(e)) => return Err(unavailable(e.to_string())),
            Err(ReadError::Json(e)) => return Err(StoreError::Corrupt(e)),
        };

        info!(
            "Opened match store {} ({} records, {} rated players)",
            path.display(),
            document.records.len(),
            document.ratings.len()
        );

        Ok(Self {
            path: Some(path.to_path_buf()),
            document: Mutex::new(document),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            document: Mutex::new(StoreDocument {
                next_id: 1,
                ..StoreDocument::default()
            }),
        }
    }

    async fn persist(&self, document: &StoreDocument) -> Result<(), StoreError> {
        if let Some(path) = &self.path {
            write_json_atomic(path, document).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl MatchStore for JsonMatchStore {
    async fn create(&self, record: NewMatchRecord) -> Result<MatchRecord, StoreError> {
        let mut doc = self.document.lock().await;

        let id = MatchId(doc.next_id.max(1));
        let needs_backfill = record.stats.is_none();
        let created = MatchRecord {
            id,
            started_at: record.started_at,
            ended_at: record.ended_at,
            participants: record.stats.map(|s| s.participants),
            video_path: record.video_path,
            clip_path: record.clip_path,
            remote_url: None,
            needs_backfill,
            created_at: Utc::now(),
        };

        doc.next_id = id.0 + 1;
        doc.records.push(created.clone());
        self.persist(&doc).await?;

        debug!("Created match record #{}", id);
        Ok(created)
    }

    async fn get(&self, id: MatchId) -> Result<MatchRecord, StoreError> {
        let doc = self.document.lock().await;
        doc.records
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(StoreError::NotFound { id: id.0 })
    }

    async fn find_by_approx_timestamp(
        &self,
        timestamp: DateTime<Utc>,
        tolerance: Duration,
    ) -> Result<Vec<MatchRecord>, StoreError> {
        let doc = self.document.lock().await;
        let mut found: Vec<(i64, MatchRecord)> = doc
            .records
            .iter()
            .filter_map(|r| {
                let delta = (r.started_at - timestamp).num_milliseconds().abs();
                (delta <= tolerance.num_milliseconds()).then(|| (delta, r.clone()))
            })
            .collect();

        found.sort_by_key(|(delta, record)| (*delta, record.id));
        Ok(found.into_iter().map(|(_, r)| r).collect())
    }

    async fn set_remote_url(&self, id: MatchId, url: &str) -> Result<(), StoreError> {
        let mut doc = self.document.lock().await;
        let record = doc
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(StoreError::NotFound { id: id.0 })?;
        record.remote_url = Some(url.to_string());
        self.persist(&doc).await
    }

    async fn update_artifact_paths(
        &self,
        id: MatchId,
        video_path: &Path,
        clip_path: &Path,
    ) -> Result<(), StoreError> {
        let mut doc = self.document.lock().await;
        let record = doc
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(StoreError::NotFound { id: id.0 })?;
        record.video_path = video_path.to_path_buf();
        record.clip_path = clip_path.to_path_buf();
        self.persist(&doc).await
    }

    async fn ratings(&self) -> Result<RatingSnapshot, StoreError> {
        Ok(self.document.lock().await.ratings.clone())
    }

    async fn apply_rating_delta(
        &self,
        id: MatchId,
        changes: &[RatingChange],
    ) -> Result<bool, StoreError> {
        let mut doc = self.document.lock().await;

        if !doc.records.iter().any(|r| r.id == id) {
            return Err(StoreError::NotFound { id: id.0 });
        }
        if doc.rated_matches.contains(&id) {
            debug!("Ratings for match #{} already applied", id);
            return Ok(false);
        }

        for change in changes {
            let entry = doc
                .ratings
                .entry(change.player.clone())
                .or_insert(PlayerRating {
                    rating: change.before,
                    matches: 0,
                    wins: 0,
                });
            entry.rating += change.delta();
            entry.matches += 1;
            if change.won {
                entry.wins += 1;
            }
        }
        doc.rated_matches.insert(id);
        self.persist(&doc).await?;
        Ok(true)
    }

    async fn records(&self) -> Result<Vec<MatchRecord>, StoreError> {
        Ok(self.document.lock().await.records.clone())
    }
}
