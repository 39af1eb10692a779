use crate::config::RatingConfig;
use crate::error::StoreError;
use crate::stats::{rating_eligibility, PlayerStats};
use crate::store::{MatchRecord, MatchStore, RatingChange, RatingSnapshot};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Finishing order: winner first, then fewer lost stocks, then more kills,
/// then recorded order. The sort is stable, so full ties keep card order.
pub fn finishing_order(participants: &[PlayerStats]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..participants.len()).collect();
    order.sort_by(|&a, &b| {
        let (pa, pb) = (&participants[a], &participants[b]);
        pb.winner
            .cmp(&pa.winner)
            .then(pa.deaths().cmp(&pb.deaths()))
            .then(pb.kills.cmp(&pa.kills))
    });
    order
}

fn expected_score(rating: i32, opponent: i32) -> f64 {
    1.0 / (1.0 + 10f64.powf(f64::from(opponent - rating) / 400.0))
}

/// Rating changes for one match
///
/// Every pair of participants is scored with the standard Elo formula, the
/// higher finisher winning the pair. Each pair's delta is rounded once and
/// applied to both sides, so the total change is always zero.
pub fn apply_outcome(
    before: &RatingSnapshot,
    participants: &[PlayerStats],
    config: &RatingConfig,
) -> Vec<RatingChange> {
    let n = participants.len();
    if n < 2 {
        return Vec::new();
    }

    let ratings: Vec<i32> = participants
        .iter()
        .map(|p| {
            before
                .get(&p.name)
                .map(|r| r.rating)
                .unwrap_or(config.initial_rating)
        })
        .collect();

    let pair_k = config.k_factor / (n - 1) as f64;
    let order = finishing_order(participants);
    let mut deltas = vec![0i32; n];

    for (rank, &higher) in order.iter().enumerate() {
        for &lower in &order[rank + 1..] {
            let expected = expected_score(ratings[higher], ratings[lower]);
            let delta = (pair_k * (1.0 - expected)).round() as i32;
            deltas[higher] += delta;
            deltas[lower] -= delta;
        }
    }

    participants
        .iter()
        .enumerate()
        .map(|(i, p)| RatingChange {
            player: p.name.clone(),
            before: ratings[i],
            after: ratings[i] + deltas[i],
            won: p.winner,
        })
        .collect()
}

/// What happened to the ratings for one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RatingOutcome {
    Applied(Vec<RatingChange>),
    AlreadyApplied,
    Skipped(String),
}

/// Applies rating changes against the store, one match at a time
pub struct RatingService {
    store: Arc<dyn MatchStore>,
    config: RatingConfig,
    serial: Mutex<()>,
}

impl RatingService {
    pub fn new(store: Arc<dyn MatchStore>, config: RatingConfig) -> Self {
        Self {
            store,
            config,
            serial: Mutex::new(()),
        }
    }

    /// Update ratings from a finalized record
    pub async fn apply(&self, record: &MatchRecord) -> Result<RatingOutcome, StoreError> {
        let stats = match record.stats() {
            Some(stats) => stats,
            None => {
                debug!("Match #{} has no stats, ratings unchanged", record.id);
                return Ok(RatingOutcome::Skipped("stats unavailable".to_string()));
            }
        };

        if let Err(reason) = rating_eligibility(&stats) {
            warn!("Match #{} not rated: {}", record.id, reason);
            return Ok(RatingOutcome::Skipped(reason.to_string()));
        }

        // Snapshot read and write must not interleave with another match
        let _guard = self.serial.lock().await;
        let before = self.store.ratings().await?;
        let changes = apply_outcome(&before, &stats.participants, &self.config);

        if !self.store.apply_rating_delta(record.id, &changes).await? {
            return Ok(RatingOutcome::AlreadyApplied);
        }

        for change in &changes {
            info!(
                "Match #{}: {} {} -> {} ({:+})",
                record.id,
                change.player,
                change.before,
                change.after,
                change.delta()
            );
        }
        Ok(RatingOutcome::Applied(changes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::MatchId;
    use crate::stats::MatchStats;
    use crate::store::{JsonMatchStore, NewMatchRecord, PlayerRating};
    use chrono::Utc;
    use std::path::PathBuf;

    fn config() -> RatingConfig {
        RatingConfig {
            k_factor: 32.0,
            initial_rating: 1200,
        }
    }

    fn player(name: &str, winner: bool, kills: u32, falls: u32, sds: u32) -> PlayerStats {
        PlayerStats {
            name: name.to_string(),
            character: "Ness".to_string(),
            kills,
            falls,
            self_destructs: sds,
            winner,
            is_cpu: false,
            is_online: false,
        }
    }

    fn snapshot(entries: &[(&str, i32)]) -> RatingSnapshot {
        entries
            .iter()
            .map(|(name, rating)| {
                (
                    name.to_string(),
                    PlayerRating {
                        rating: *rating,
                        matches: 10,
                        wins: 5,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_equal_ratings_one_on_one() {
        let players = vec![player("a", false, 1, 3, 0), player("b", true, 3, 1, 0)];
        let changes = apply_outcome(&RatingSnapshot::new(), &players, &config());

        assert_eq!(changes[0].after, 1184);
        assert_eq!(changes[1].after, 1216);
        assert!(changes[1].won);
    }

    #[test]
    fn test_upset_moves_more_points() {
        let players = vec![player("fav", false, 0, 3, 0), player("dog", true, 3, 0, 0)];
        let before = snapshot(&[("fav", 1600), ("dog", 1200)]);
        let changes = apply_outcome(&before, &players, &config());

        // Expected score of the underdog is about 0.09
        assert_eq!(changes[1].delta(), 29);
        assert_eq!(changes[0].delta(), -29);
    }

    #[test]
    fn test_multiplayer_is_zero_sum() {
        let players = vec![
            player("a", false, 2, 3, 0),
            player("b", true, 4, 1, 0),
            player("c", false, 1, 3, 1),
            player("d", false, 0, 3, 0),
        ];
        let before = snapshot(&[("a", 1310), ("b", 1250), ("c", 1105)]);
        let changes = apply_outcome(&before, &players, &config());

        let total: i32 = changes.iter().map(|c| c.delta()).sum();
        assert_eq!(total, 0);
        assert!(changes[1].delta() > 0);
        assert_eq!(changes[3].before, 1200);
    }

    #[test]
    fn test_finishing_order_tie_break() {
        let players = vec![
            player("first-card", false, 1, 2, 1),
            player("winner", true, 2, 0, 0),
            player("fewer-kills", false, 0, 3, 0),
            player("second-card", false, 1, 3, 0),
        ];
        // first-card and second-card both lost 3 stocks with 1 kill
        assert_eq!(finishing_order(&players), vec![1, 0, 3, 2]);
    }

    #[test]
    fn test_outcome_is_deterministic() {
        let players = vec![
            player("a", true, 3, 0, 0),
            player("b", false, 1, 3, 0),
            player("c", false, 1, 3, 0),
        ];
        let before = snapshot(&[("a", 1234), ("b", 1190)]);
        assert_eq!(
            apply_outcome(&before, &players, &config()),
            apply_outcome(&before, &players, &config())
        );
    }

    async fn recorded(store: &JsonMatchStore, players: Vec<PlayerStats>) -> MatchRecord {
        store
            .create(NewMatchRecord {
                started_at: Utc::now(),
                ended_at: Utc::now(),
                stats: Some(MatchStats::new(players)),
                video_path: PathBuf::from("v.mjpeg"),
                clip_path: PathBuf::from("c.mjpeg"),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_service_applies_once() {
        let store = Arc::new(JsonMatchStore::in_memory());
        let service = RatingService::new(store.clone(), config());
        let record = recorded(
            &store,
            vec![player("habeas", true, 3, 1, 0), player("jmoon", false, 1, 3, 0)],
        )
        .await;

        assert!(matches!(
            service.apply(&record).await.unwrap(),
            RatingOutcome::Applied(_)
        ));
        let once = store.ratings().await.unwrap();

        assert_eq!(
            service.apply(&record).await.unwrap(),
            RatingOutcome::AlreadyApplied
        );
        assert_eq!(store.ratings().await.unwrap(), once);
        assert_eq!(once["habeas"].rating, 1216);
    }

    #[tokio::test]
    async fn test_service_skips_ineligible() {
        let store = Arc::new(JsonMatchStore::in_memory());
        let service = RatingService::new(store.clone(), config());
        let record = recorded(
            &store,
            vec![player("habeas", true, 3, 1, 0), player("P2", false, 1, 3, 0)],
        )
        .await;

        assert!(matches!(
            service.apply(&record).await.unwrap(),
            RatingOutcome::Skipped(_)
        ));
        assert!(store.ratings().await.unwrap().is_empty());

        let mut no_stats = record.clone();
        no_stats.id = MatchId(record.id.0);
        no_stats.participants = None;
        assert_eq!(
            service.apply(&no_stats).await.unwrap(),
            RatingOutcome::Skipped("stats unavailable".to_string())
        );
    }
}
