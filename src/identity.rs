use crate::error::ArtifactError;
use chrono::{DateTime, LocalResult, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

const NAME_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Store-assigned match identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchId(pub u64);

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resolve a configured timezone name, falling back to UTC on parse errors
pub fn resolve_timezone(name: &str) -> Tz {
    match name.parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            tracing::warn!("Invalid timezone '{}', falling back to UTC", name);
            chrono_tz::UTC
        }
    }
}

/// Wall-clock capture time in `tz`, truncated to whole seconds
pub fn local_capture_time(timestamp: SystemTime, tz: Tz) -> NaiveDateTime {
    let naive = DateTime::<Utc>::from(timestamp)
        .with_timezone(&tz)
        .naive_local();
    naive.with_nanosecond(0).unwrap_or(naive)
}

/// Instant of a wall-clock capture time in `tz`
///
/// Ambiguous times (DST fold) resolve to the earlier instant; times inside a
/// DST gap do not exist and yield `None`.
pub fn capture_instant(captured_at: NaiveDateTime, tz: Tz) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&captured_at) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earlier, _) => Some(earlier.with_timezone(&Utc)),
        LocalResult::None => None,
    }
}

/// Parsed artifact file name
///
/// `{YYYYMMDD_HHMMSS}` for provisional or legacy artifacts,
/// `{id}-{YYYYMMDD_HHMMSS}` once the store assigned an identity; result clips
/// carry an extra suffix before the extension. This is the only place names
/// are interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactName {
    pub id: Option<MatchId>,
    pub captured_at: NaiveDateTime,
    pub result_clip: bool,
    pub extension: String,
}

impl ArtifactName {
    pub fn new(captured_at: NaiveDateTime, extension: &str) -> Self {
        Self {
            id: None,
            captured_at,
            result_clip: false,
            extension: extension.to_string(),
        }
    }

    /// Parse a file name such as `42-20240115_143052.mp4`
    pub fn parse(file_name: &str, clip_suffix: &str) -> Result<Self, ArtifactError> {
        let unrecognized = || ArtifactError::UnrecognizedName {
            name: file_name.to_string(),
        };

        let (stem, extension) = file_name.rsplit_once('.').ok_or_else(unrecognized)?;
        if extension.is_empty() || extension == "partial" {
            return Err(unrecognized());
        }

        let (stem, result_clip) = match stem.strip_suffix(clip_suffix) {
            Some(stripped) if !clip_suffix.is_empty() => (stripped, true),
            _ => (stem, false),
        };

        let (id, timestamp) = match stem.split_once('-') {
            Some((id, timestamp)) => {
                if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
                    return Err(unrecognized());
                }
                let id = id.parse::<u64>().map_err(|_| unrecognized())?;
                (Some(MatchId(id)), timestamp)
            }
            None => (None, stem),
        };

        let captured_at = NaiveDateTime::parse_from_str(timestamp, NAME_TIMESTAMP_FORMAT)
            .map_err(|_| unrecognized())?;

        Ok(Self {
            id,
            captured_at,
            result_clip,
            extension: extension.to_string(),
        })
    }

    /// Render the file name
    pub fn file_name(&self, clip_suffix: &str) -> String {
        let timestamp = self.captured_at.format(NAME_TIMESTAMP_FORMAT);
        let suffix = if self.result_clip { clip_suffix } else { "" };
        match self.id {
            Some(id) => format!("{}-{}{}.{}", id, timestamp, suffix, self.extension),
            None => format!("{}{}.{}", timestamp, suffix, self.extension),
        }
    }

    pub fn with_id(mut self, id: MatchId) -> Self {
        self.id = Some(id);
        self
    }

    /// Name of the matching result clip
    pub fn as_result_clip(&self) -> Self {
        Self {
            result_clip: true,
            ..self.clone()
        }
    }
}

/// Identity under which an artifact is published
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactIdentity {
    /// Resolved to a match record
    Match { id: MatchId },
    /// No record could be found; keyed by capture time
    Unresolved { captured_at: NaiveDateTime },
}

impl ArtifactIdentity {
    /// Stable deduplication key for the publication queue
    pub fn key(&self) -> String {
        match self {
            ArtifactIdentity::Match { id } => format!("match-{}", id),
            ArtifactIdentity::Unresolved { captured_at } => {
                format!("legacy-{}", captured_at.format(NAME_TIMESTAMP_FORMAT))
            }
        }
    }

    pub fn match_id(&self) -> Option<MatchId> {
        match self {
            ArtifactIdentity::Match { id } => Some(*id),
            ArtifactIdentity::Unresolved { .. } => None,
        }
    }

    /// Pseudo match number shown for unresolved artifacts: the capture's Unix time
    pub fn pseudo_id(&self, tz: Tz) -> Option<i64> {
        match self {
            ArtifactIdentity::Match { .. } => None,
            ArtifactIdentity::Unresolved { captured_at } => {
                capture_instant(*captured_at, tz).map(|dt| dt.timestamp())
            }
        }
    }
}

impl fmt::Display for ArtifactIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}
