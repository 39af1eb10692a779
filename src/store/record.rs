use crate::identity::MatchId;
use crate::stats::{MatchStats, PlayerStats};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Finalized match as kept by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: MatchId,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// `None` when stat extraction failed
    pub participants: Option<Vec<PlayerStats>>,
    pub video_path: PathBuf,
    pub clip_path: PathBuf,
    pub remote_url: Option<String>,
    /// Stats missing; to be filled in manually or by a later extraction
    pub needs_backfill: bool,
    pub created_at: DateTime<Utc>,
}

impl MatchRecord {
    pub fn has_stats(&self) -> bool {
        self.participants.is_some()
    }

    pub fn stats(&self) -> Option<MatchStats> {
        self.participants.as_ref().map(|p| MatchStats::new(p.clone()))
    }

    pub fn winner(&self) -> Option<&PlayerStats> {
        self.participants
            .as_ref()
            .and_then(|players| players.iter().find(|p| p.winner))
    }
}

/// Record contents before the store assigns an identity
#[derive(Debug, Clone)]
pub struct NewMatchRecord {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub stats: Option<MatchStats>,
    pub video_path: PathBuf,
    pub clip_path: PathBuf,
}

/// Current rating of one player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRating {
    pub rating: i32,
    pub matches: u32,
    pub wins: u32,
}

/// All player ratings keyed by player name
pub type RatingSnapshot = BTreeMap<String, PlayerRating>;

/// Rating movement of one player caused by one match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingChange {
    pub player: String,
    /// Rating the change was computed from
    pub before: i32,
    pub after: i32,
    pub won: bool,
}

impl RatingChange {
    pub fn delta(&self) -> i32 {
        self.after - self.before
    }
}
