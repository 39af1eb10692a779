use crate::config::PublisherConfig;
use crate::identity::{capture_instant, ArtifactIdentity};
use crate::stats::{is_placeholder_name, PlayerStats};
use crate::store::MatchRecord;
use chrono::{DateTime, NaiveDateTime};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

const MAX_TAGS: usize = 30;

/// What the remote host is told about a video
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicationMetadata {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub category_id: String,
    pub privacy_status: String,
    /// Collection (playlist) the video is added to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
}

/// Builds titles, descriptions and tags from match records
#[derive(Debug, Clone)]
pub struct MetadataBuilder {
    game_title: String,
    base_tags: Vec<String>,
    category: String,
    privacy: String,
    collection: Option<String>,
    timezone: Tz,
}

impl MetadataBuilder {
    pub fn new(config: &PublisherConfig, timezone: Tz) -> Self {
        Self {
            game_title: config.game_title.clone(),
            base_tags: config.base_tags.clone(),
            category: config.category.clone(),
            privacy: config.privacy.clone(),
            collection: config.collection.clone(),
            timezone,
        }
    }

    /// Override the target collection (`None` publishes outside any collection)
    pub fn with_collection(mut self, collection: Option<String>) -> Self {
        self.collection = collection;
        self
    }

    /// Metadata for an artifact resolved to a record
    pub fn for_record(&self, record: &MatchRecord) -> PublicationMetadata {
        let number = record.id.to_string();
        let players = record.participants.as_deref().unwrap_or(&[]);
        self.build(&number, record.started_at, players)
    }

    /// Placeholder metadata for an artifact without a matching record
    ///
    /// The match number is the Unix time of the capture.
    pub fn placeholder(&self, captured_at: NaiveDateTime) -> PublicationMetadata {
        let identity = ArtifactIdentity::Unresolved { captured_at };
        let number = identity
            .pseudo_id(self.timezone)
            .map(|n| n.to_string())
            .unwrap_or_else(|| captured_at.format("%Y%m%d%H%M%S").to_string());
        self.build(&number, self.instant(captured_at), &[])
    }

    fn instant(&self, captured_at: NaiveDateTime) -> DateTime<chrono::Utc> {
        capture_instant(captured_at, self.timezone).unwrap_or_else(|| captured_at.and_utc())
    }

    fn build(
        &self,
        number: &str,
        when: DateTime<chrono::Utc>,
        players: &[PlayerStats],
    ) -> PublicationMetadata {
        PublicationMetadata {
            title: self.title(number, when, players),
            description: self.description(number, when, players),
            tags: self.tags(players),
            category_id: self.category.clone(),
            privacy_status: self.privacy.clone(),
            collection: self.collection.clone(),
        }
    }

    fn title(&self, number: &str, when: DateTime<chrono::Utc>, players: &[PlayerStats]) -> String {
        if let [p1, p2, ..] = players {
            let named = [&p1.name, &p2.name, &p1.character, &p2.character]
                .iter()
                .all(|s| !s.trim().is_empty());
            if named {
                return format!(
                    "{} ({}) vs {} ({}) - Match #{}",
                    p1.name,
                    title_case(&p1.character),
                    p2.name,
                    title_case(&p2.character),
                    number
                );
            }
        }

        let local = when.with_timezone(&self.timezone);
        format!("Match #{} - {}", number, local.format("%Y-%m-%d %H:%M"))
    }

    fn description(
        &self,
        number: &str,
        when: DateTime<chrono::Utc>,
        players: &[PlayerStats],
    ) -> String {
        let local = when.with_timezone(&self.timezone);
        let mut lines = vec![
            format!("{} Match", self.game_title),
            String::new(),
            format!("Match ID: {}", number),
            format!("Date: {}", local.format("%B %d, %Y %I:%M %p")),
            String::new(),
        ];

        if !players.is_empty() {
            lines.push("Players:".to_string());
            for player in players {
                let winner = if player.winner { " - WINNER" } else { "" };
                lines.push(format!(
                    "- {} ({}) - {} KOs, {} Falls, {} SD{}",
                    player.name,
                    title_case(&player.character),
                    player.kills,
                    player.falls,
                    player.self_destructs,
                    winner
                ));
            }
            lines.push(String::new());
        }

        lines.push("Recorded with automated capture system".to_string());
        lines.join("\n")
    }

    fn tags(&self, players: &[PlayerStats]) -> Vec<String> {
        let names = players
            .iter()
            .map(|p| p.name.trim())
            .filter(|name| !name.is_empty() && !is_placeholder_name(name))
            .map(str::to_lowercase);
        let characters = players
            .iter()
            .map(|p| p.character.trim().to_lowercase())
            .filter(|c| !c.is_empty() && c != "unknown");

        let mut tags: Vec<String> = Vec::new();
        for tag in self.base_tags.iter().cloned().chain(names).chain(characters) {
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        tags.truncate(MAX_TAGS);
        tags
    }
}

/// Capitalize each space-separated word
fn title_case(s: &str) -> String {
    s.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(|c| c.to_lowercase()))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatchcastConfig;
    use crate::identity::MatchId;
    use chrono::{NaiveDate, TimeZone, Utc};
    use std::path::PathBuf;

    fn builder() -> MetadataBuilder {
        MetadataBuilder::new(&MatchcastConfig::default().publisher, chrono_tz::UTC)
    }

    fn player(name: &str, character: &str, kills: u32, winner: bool) -> PlayerStats {
        PlayerStats {
            name: name.to_string(),
            character: character.to_string(),
            kills,
            falls: if winner { 1 } else { 3 },
            self_destructs: 0,
            winner,
            is_cpu: false,
            is_online: false,
        }
    }

    fn record(participants: Option<Vec<PlayerStats>>) -> MatchRecord {
        let started_at = Utc.with_ymd_and_hms(2024, 1, 15, 14, 30, 52).unwrap();
        MatchRecord {
            id: MatchId(42),
            started_at,
            ended_at: started_at,
            participants,
            video_path: PathBuf::from("42-20240115_143052.mp4"),
            clip_path: PathBuf::from("42-20240115_143052_result_screen.mp4"),
            remote_url: None,
            needs_backfill: false,
            created_at: started_at,
        }
    }

    #[test]
    fn test_title_and_description_from_stats() {
        let meta = builder().for_record(&record(Some(vec![
            player("habeas", "zelda", 3, true),
            player("shafaq", "mr. game & watch", 1, false),
        ])));

        assert_eq!(
            meta.title,
            "habeas (Zelda) vs shafaq (Mr. Game & Watch) - Match #42"
        );
        assert!(meta
            .description
            .contains("- habeas (Zelda) - 3 KOs, 1 Falls, 0 SD - WINNER"));
        assert!(meta
            .description
            .contains("- shafaq (Mr. Game & Watch) - 1 KOs, 3 Falls, 0 SD\n"));
        assert!(meta.description.contains("Date: January 15, 2024 02:30 PM"));
        assert_eq!(meta.category_id, "20");
        assert_eq!(meta.collection.as_deref(), Some("Smash Bros Matches"));
    }

    #[test]
    fn test_title_fallback_without_stats() {
        let meta = builder().for_record(&record(None));
        assert_eq!(meta.title, "Match #42 - 2024-01-15 14:30");
        assert!(!meta.description.contains("Players:"));
    }

    #[test]
    fn test_tags_deduplicated_and_capped() {
        let meta = builder().for_record(&record(Some(vec![
            player("Habeas", "Zelda", 3, true),
            player("Player 2", "zelda", 1, false),
            player("unknown", "Unknown", 0, false),
        ])));
        assert_eq!(
            meta.tags,
            vec![
                "super smash bros",
                "smash ultimate",
                "ssbu",
                "gameplay",
                "competitive",
                "habeas",
                "zelda"
            ]
        );

        let crowd: Vec<PlayerStats> = (0..40)
            .map(|i| player(&format!("player{}", i), "Kirby", 0, i == 0))
            .collect();
        assert_eq!(builder().for_record(&record(Some(crowd))).tags.len(), MAX_TAGS);
    }

    #[test]
    fn test_unresolved_placeholder() {
        let captured_at = NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(14, 30, 52)
            .unwrap();
        let meta = builder().with_collection(None).placeholder(captured_at);
        assert_eq!(meta.title, "Match #1705329052 - 2024-01-15 14:30");
        assert!(meta.collection.is_none());
    }
}
