use super::metadata::PublicationMetadata;
use crate::identity::ArtifactIdentity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Lifecycle of a publication task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    InFlight,
    Uploaded { url: String },
    Failed { reason: String },
    Skipped { reason: String },
}

impl TaskState {
    pub fn name(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::InFlight => "in_flight",
            TaskState::Uploaded { .. } => "uploaded",
            TaskState::Failed { .. } => "failed",
            TaskState::Skipped { .. } => "skipped",
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, TaskState::Pending)
    }

    pub fn is_uploaded(&self) -> bool {
        matches!(self, TaskState::Uploaded { .. })
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Uploaded { url } => write!(f, "uploaded ({})", url),
            TaskState::Failed { reason } => write!(f, "failed ({})", reason),
            TaskState::Skipped { reason } => write!(f, "skipped ({})", reason),
            other => f.write_str(other.name()),
        }
    }
}

/// One artifact waiting for (or done with) publication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicationTask {
    /// Deduplication key derived from the identity
    pub key: String,
    pub identity: ArtifactIdentity,
    pub video_path: PathBuf,
    pub metadata: PublicationMetadata,
    pub state: TaskState,
    /// Transfer attempts made so far
    pub attempts: u32,
    /// Publish even if the record already carries a remote reference
    #[serde(default)]
    pub forced: bool,
    pub enqueued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PublicationTask {
    pub fn new(
        identity: ArtifactIdentity,
        video_path: PathBuf,
        metadata: PublicationMetadata,
    ) -> Self {
        let now = Utc::now();
        Self {
            key: identity.key(),
            identity,
            video_path,
            metadata,
            state: TaskState::Pending,
            attempts: 0,
            forced: false,
            enqueued_at: now,
            updated_at: now,
        }
    }

    /// Publish regardless of an existing remote reference
    pub fn force(mut self) -> Self {
        self.forced = true;
        self
    }
}

/// Result of an enqueue request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enqueued {
    /// A new task was created
    Created { key: String },
    /// The identity was already queued; nothing changed
    Existing { key: String, state: TaskState },
}

impl Enqueued {
    pub fn key(&self) -> &str {
        match self {
            Enqueued::Created { key } | Enqueued::Existing { key, .. } => key,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Enqueued::Created { .. })
    }
}

/// Task counts by state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub pending: usize,
    pub in_flight: usize,
    pub uploaded: usize,
    pub failed: usize,
    pub skipped: usize,
}
