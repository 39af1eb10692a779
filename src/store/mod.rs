//! Match record persistence and rating storage

mod json;
mod record;

use crate::error::StoreError;
use crate::identity::MatchId;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::path::Path;

pub use json::JsonMatchStore;
pub use record::{
    MatchRecord, NewMatchRecord, PlayerRating, RatingChange, RatingSnapshot,
};

/// Persistence for match records and ratings
#[async_trait]
pub trait MatchStore: Send + Sync {
    /// Store a finalized match and assign its identity
    async fn create(&self, record: NewMatchRecord) -> Result<MatchRecord, StoreError>;

    async fn get(&self, id: MatchId) -> Result<MatchRecord, StoreError>;

    /// Records whose start lies within `tolerance` of `timestamp`, closest first
    async fn find_by_approx_timestamp(
        &self,
        timestamp: DateTime<Utc>,
        tolerance: Duration,
    ) -> Result<Vec<MatchRecord>, StoreError>;

    async fn set_remote_url(&self, id: MatchId, url: &str) -> Result<(), StoreError>;

    async fn update_artifact_paths(
        &self,
        id: MatchId,
        video_path: &Path,
        clip_path: &Path,
    ) -> Result<(), StoreError>;

    async fn ratings(&self) -> Result<RatingSnapshot, StoreError>;

    /// Apply the rating changes of one match
    ///
    /// Idempotent per match: returns `false` without touching ratings when
    /// the match was already applied.
    async fn apply_rating_delta(
        &self,
        id: MatchId,
        changes: &[RatingChange],
    ) -> Result<bool, StoreError>;

    async fn records(&self) -> Result<Vec<MatchRecord>, StoreError>;
}
