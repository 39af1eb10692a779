use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-player line of a result screen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStats {
    pub name: String,
    pub character: String,
    pub kills: u32,
    pub falls: u32,
    pub self_destructs: u32,
    pub winner: bool,
    #[serde(default)]
    pub is_cpu: bool,
    #[serde(default)]
    pub is_online: bool,
}

impl PlayerStats {
    /// Stocks lost, by any means
    pub fn deaths(&self) -> u32 {
        self.falls + self.self_destructs
    }
}

/// Structured statistics for one match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchStats {
    /// Participants in recorded (player card) order
    pub participants: Vec<PlayerStats>,
    #[serde(default)]
    pub match_timestamp: Option<DateTime<Utc>>,
}

impl MatchStats {
    pub fn new(participants: Vec<PlayerStats>) -> Self {
        Self {
            participants,
            match_timestamp: None,
        }
    }

    pub fn winners(&self) -> impl Iterator<Item = &PlayerStats> {
        self.participants.iter().filter(|p| p.winner)
    }

    pub fn winner_count(&self) -> usize {
        self.winners().count()
    }
}
