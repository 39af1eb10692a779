//! Identity resolution for artifacts without an embedded match id

use crate::error::StoreError;
use crate::identity::{capture_instant, ArtifactIdentity, ArtifactName, MatchId};
use crate::store::{MatchRecord, MatchStore};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use chrono_tz::Tz;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Why an artifact could not be tied to a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unresolved {
    /// No record starts within the tolerance window
    NoCandidate,
    /// Two or more records are equally close
    Ambiguous { candidates: Vec<MatchId> },
    /// The capture time does not exist in the artifact timezone (DST gap)
    InvalidLocalTime,
}

impl fmt::Display for Unresolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unresolved::NoCandidate => f.write_str("no match record within tolerance"),
            Unresolved::Ambiguous { candidates } => {
                let ids: Vec<String> = candidates.iter().map(|id| id.to_string()).collect();
                write!(f, "equally close match records: {}", ids.join(", "))
            }
            Unresolved::InvalidLocalTime => f.write_str("capture time does not exist locally"),
        }
    }
}

/// Outcome of identifying an artifact
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(MatchRecord),
    Unresolved {
        captured_at: NaiveDateTime,
        reason: Unresolved,
    },
}

impl Resolution {
    /// Identity to publish under
    pub fn identity(&self) -> ArtifactIdentity {
        match self {
            Resolution::Resolved(record) => ArtifactIdentity::Match { id: record.id },
            Resolution::Unresolved { captured_at, .. } => ArtifactIdentity::Unresolved {
                captured_at: *captured_at,
            },
        }
    }

    pub fn record(&self) -> Option<&MatchRecord> {
        match self {
            Resolution::Resolved(record) => Some(record),
            Resolution::Unresolved { .. } => None,
        }
    }
}

/// Matches legacy artifacts to records by nearest start time
pub struct LegacyReconciler {
    store: Arc<dyn MatchStore>,
    tolerance: Duration,
    timezone: Tz,
}

impl LegacyReconciler {
    pub fn new(store: Arc<dyn MatchStore>, tolerance_seconds: i64, timezone: Tz) -> Self {
        Self {
            store,
            tolerance: Duration::seconds(tolerance_seconds),
            timezone,
        }
    }

    /// Resolve a parsed artifact name
    ///
    /// An explicit id is looked up directly; an id the store does not know
    /// falls back to the timestamp search.
    pub async fn identify(&self, name: &ArtifactName) -> Result<Resolution, StoreError> {
        if let Some(id) = name.id {
            match self.store.get(id).await {
                Ok(record) => return Ok(Resolution::Resolved(record)),
                Err(StoreError::NotFound { .. }) => {
                    warn!(
                        "Artifact names match #{} but the store has no such record, reconciling by time",
                        id
                    );
                }
                Err(e) => return Err(e),
            }
        }
        self.resolve(name.captured_at).await
    }

    /// Find the record whose start lies closest to `captured_at`
    pub async fn resolve(&self, captured_at: NaiveDateTime) -> Result<Resolution, StoreError> {
        let unresolved = |reason: Unresolved| {
            info!(
                "Legacy artifact {} left unresolved: {}",
                captured_at.format("%Y-%m-%d %H:%M:%S"),
                reason
            );
            Resolution::Unresolved {
                captured_at,
                reason,
            }
        };

        let Some(instant) = capture_instant(captured_at, self.timezone) else {
            return Ok(unresolved(Unresolved::InvalidLocalTime));
        };

        let candidates = self
            .store
            .find_by_approx_timestamp(instant, self.tolerance)
            .await?;
        debug!(
            "{} candidate records within {}s of {}",
            candidates.len(),
            self.tolerance.num_seconds(),
            instant
        );

        let distance = |record: &MatchRecord| offset(record.started_at, instant);
        let Some(best) = candidates.first() else {
            return Ok(unresolved(Unresolved::NoCandidate));
        };

        let tied: Vec<MatchId> = candidates
            .iter()
            .filter(|r| distance(r) == distance(best))
            .map(|r| r.id)
            .collect();
        if tied.len() > 1 {
            return Ok(unresolved(Unresolved::Ambiguous { candidates: tied }));
        }

        info!(
            "Legacy artifact {} resolved to match #{} ({}s apart)",
            captured_at.format("%Y-%m-%d %H:%M:%S"),
            best.id,
            distance(best).num_seconds()
        );
        Ok(Resolution::Resolved(best.clone()))
    }
}

fn offset(a: DateTime<Utc>, b: DateTime<Utc>) -> Duration {
    let delta = a - b;
    if delta < Duration::zero() {
        -delta
    } else {
        delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{JsonMatchStore, NewMatchRecord};
    use chrono::{NaiveDate, TimeZone};
    use std::path::PathBuf;

    fn local(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    async fn store_with_starts(starts: &[(u32, u32, u32)]) -> Arc<JsonMatchStore> {
        let store = Arc::new(JsonMatchStore::in_memory());
        for &(h, m, s) in starts {
            let started_at = Utc.from_utc_datetime(&local(h, m, s));
            store
                .create(NewMatchRecord {
                    started_at,
                    ended_at: started_at + Duration::minutes(4),
                    stats: None,
                    video_path: PathBuf::from("v.mp4"),
                    clip_path: PathBuf::from("c.mp4"),
                })
                .await
                .unwrap();
        }
        store
    }

    fn reconciler(store: Arc<JsonMatchStore>) -> LegacyReconciler {
        LegacyReconciler::new(store, 5, chrono_tz::UTC)
    }

    #[tokio::test]
    async fn test_resolves_within_tolerance() {
        let store = store_with_starts(&[(14, 30, 0), (14, 36, 0)]).await;
        let resolution = reconciler(store).resolve(local(14, 30, 4)).await.unwrap();

        assert_eq!(
            resolution.identity(),
            ArtifactIdentity::Match { id: MatchId(1) }
        );
    }

    #[tokio::test]
    async fn test_closest_record_wins() {
        let store = store_with_starts(&[(14, 30, 0), (14, 30, 7)]).await;
        let resolution = reconciler(store).resolve(local(14, 30, 5)).await.unwrap();
        assert_eq!(resolution.record().map(|r| r.id), Some(MatchId(2)));
    }

    #[tokio::test]
    async fn test_outside_tolerance_is_unresolved() {
        let store = store_with_starts(&[(14, 30, 0)]).await;
        let resolution = reconciler(store).resolve(local(14, 30, 6)).await.unwrap();

        assert_eq!(
            resolution,
            Resolution::Unresolved {
                captured_at: local(14, 30, 6),
                reason: Unresolved::NoCandidate
            }
        );
        assert_eq!(
            resolution.identity().key(),
            "legacy-20240115_143006"
        );
    }

    #[tokio::test]
    async fn test_equal_distance_is_ambiguous() {
        let store = store_with_starts(&[(14, 29, 58), (14, 30, 2)]).await;
        let resolution = reconciler(store).resolve(local(14, 30, 0)).await.unwrap();

        match resolution {
            Resolution::Unresolved {
                reason: Unresolved::Ambiguous { candidates },
                ..
            } => assert_eq!(candidates, vec![MatchId(1), MatchId(2)]),
            other => panic!("unexpected resolution {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_explicit_id_and_unknown_id() {
        let store = store_with_starts(&[(14, 30, 0)]).await;
        let reconciler = reconciler(store);

        let named = ArtifactName::parse("1-20240115_100000.mp4", "_result_screen").unwrap();
        let resolution = reconciler.identify(&named).await.unwrap();
        assert_eq!(resolution.record().map(|r| r.id), Some(MatchId(1)));

        // Unknown id, but the timestamp is close to match #1
        let stale = ArtifactName::parse("77-20240115_143001.mp4", "_result_screen").unwrap();
        let resolution = reconciler.identify(&stale).await.unwrap();
        assert_eq!(resolution.record().map(|r| r.id), Some(MatchId(1)));
    }

    #[tokio::test]
    async fn test_capture_time_uses_artifact_timezone() {
        // 06:30 PST is 14:30 UTC
        let store = store_with_starts(&[(14, 30, 0)]).await;
        let reconciler = LegacyReconciler::new(store, 5, chrono_tz::America::Los_Angeles);
        let resolution = reconciler.resolve(local(6, 30, 1)).await.unwrap();
        assert_eq!(resolution.record().map(|r| r.id), Some(MatchId(1)));
    }
}
