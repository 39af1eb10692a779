use super::metadata::PublicationMetadata;
use super::task::{Enqueued, PublicationTask, QueueCounts, TaskState};
use crate::error::PublishError;
use crate::persist::{read_json, write_json_atomic, ReadError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueDocument {
    /// Tasks in enqueue order
    tasks: Vec<PublicationTask>,
}

/// Durable FIFO of publication tasks, deduplicated by identity key
///
/// Every state change rewrites the queue document atomically. Transitions
/// are compare-and-set on the task's current state, so a key can be
/// `InFlight` at most once.
pub struct PublicationQueue {
    path: Option<PathBuf>,
    document: Mutex<QueueDocument>,
}

impl PublicationQueue {
    /// Load the queue, resetting transfers interrupted by a crash
    pub async fn open(path: &Path) -> Result<Self, PublishError> {
        let mut document = match read_json::<QueueDocument>(path) {
            Ok(Some(doc)) => doc,
            Ok(None) => QueueDocument::default(),
            Err(ReadError::Io(e)) => return Err(PublishError::Persist(e)),
            Err(ReadError::Json(e)) => return Err(PublishError::Corrupt(e)),
        };

        let mut interrupted = 0;
        for task in document
            .tasks
            .iter_mut()
            .filter(|t| t.state == TaskState::InFlight)
        {
            warn!(
                "Publication of {} was interrupted, returning it to pending",
                task.key
            );
            task.state = TaskState::Pending;
            task.updated_at = Utc::now();
            interrupted += 1;
        }

        let queue = Self {
            path: Some(path.to_path_buf()),
            document: Mutex::new(document),
        };
        if interrupted > 0 {
            let doc = queue.document.lock().await;
            queue.persist(&doc).await?;
        }

        let counts = queue.counts().await;
        info!(
            "Opened publication queue {} ({} pending, {} uploaded, {} failed)",
            path.display(),
            counts.pending,
            counts.uploaded,
            counts.failed
        );
        Ok(queue)
    }

    /// Load a copy of the queue that is never written back (dry runs)
    pub async fn load_detached(path: &Path) -> Result<Self, PublishError> {
        let document = match read_json::<QueueDocument>(path) {
            Ok(Some(doc)) => doc,
            Ok(None) => QueueDocument::default(),
            Err(ReadError::Io(e)) => return Err(PublishError::Persist(e)),
            Err(ReadError::Json(e)) => return Err(PublishError::Corrupt(e)),
        };
        debug!(
            "Loaded {} publication tasks from {} without write-back",
            document.tasks.len(),
            path.display()
        );
        Ok(Self {
            path: None,
            document: Mutex::new(document),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            document: Mutex::new(QueueDocument::default()),
        }
    }

    async fn persist(&self, document: &QueueDocument) -> Result<(), PublishError> {
        if let Some(path) = &self.path {
            write_json_atomic(path, document).await?;
        }
        Ok(())
    }

    /// Add a task unless its identity is already queued
    pub async fn enqueue(&self, task: PublicationTask) -> Result<Enqueued, PublishError> {
        let mut doc = self.document.lock().await;

        if let Some(existing) = doc.tasks.iter().find(|t| t.key == task.key) {
            debug!(
                "Publication of {} already queued ({})",
                existing.key, existing.state
            );
            return Ok(Enqueued::Existing {
                key: existing.key.clone(),
                state: existing.state.clone(),
            });
        }

        let key = task.key.clone();
        info!("Queued {} for publication", task.video_path.display());
        doc.tasks.push(task);
        if let Err(e) = self.persist(&doc).await {
            doc.tasks.pop();
            return Err(e);
        }
        Ok(Enqueued::Created { key })
    }

    pub async fn get(&self, key: &str) -> Option<PublicationTask> {
        let doc = self.document.lock().await;
        doc.tasks.iter().find(|t| t.key == key).cloned()
    }

    pub async fn tasks(&self) -> Vec<PublicationTask> {
        self.document.lock().await.tasks.clone()
    }

    /// Pending tasks, oldest first
    pub async fn pending(&self) -> Vec<PublicationTask> {
        let doc = self.document.lock().await;
        doc.tasks
            .iter()
            .filter(|t| t.state.is_pending())
            .cloned()
            .collect()
    }

    pub async fn counts(&self) -> QueueCounts {
        let doc = self.document.lock().await;
        let mut counts = QueueCounts::default();
        for task in &doc.tasks {
            match task.state {
                TaskState::Pending => counts.pending += 1,
                TaskState::InFlight => counts.in_flight += 1,
                TaskState::Uploaded { .. } => counts.uploaded += 1,
                TaskState::Failed { .. } => counts.failed += 1,
                TaskState::Skipped { .. } => counts.skipped += 1,
            }
        }
        counts
    }

    async fn transition<F>(
        &self,
        key: &str,
        allowed: fn(&TaskState) -> bool,
        to: TaskState,
        update: F,
    ) -> Result<PublicationTask, PublishError>
    where
        F: FnOnce(&mut PublicationTask),
    {
        let mut doc = self.document.lock().await;
        let index = doc
            .tasks
            .iter()
            .position(|t| t.key == key)
            .ok_or_else(|| PublishError::UnknownTask {
                key: key.to_string(),
            })?;

        let previous = doc.tasks[index].clone();
        if !allowed(&previous.state) {
            return Err(PublishError::InvalidTransition {
                key: key.to_string(),
                from: previous.state.name(),
                to: to.name(),
            });
        }

        debug!("Task {}: {} -> {}", key, previous.state.name(), to.name());
        let mut next = previous.clone();
        next.state = to;
        next.updated_at = Utc::now();
        update(&mut next);
        doc.tasks[index] = next.clone();

        // Memory never runs ahead of the document on disk
        if let Err(e) = self.persist(&doc).await {
            doc.tasks[index] = previous;
            return Err(e);
        }
        Ok(next)
    }

    /// Claim a pending task for transfer
    pub async fn begin(&self, key: &str) -> Result<PublicationTask, PublishError> {
        self.transition(key, TaskState::is_pending, TaskState::InFlight, |_| {})
            .await
    }

    /// Count one transfer attempt against an in-flight task
    pub async fn record_attempt(&self, key: &str) -> Result<u32, PublishError> {
        let task = self
            .transition(
                key,
                |s| *s == TaskState::InFlight,
                TaskState::InFlight,
                |t| t.attempts += 1,
            )
            .await?;
        Ok(task.attempts)
    }

    /// Finish an in-flight transfer as uploaded or failed
    pub async fn complete(&self, key: &str, outcome: TaskState) -> Result<(), PublishError> {
        self.transition(key, |s| *s == TaskState::InFlight, outcome, |_| {})
            .await
            .map(|_| ())
    }

    /// Return an in-flight task to pending (quota ran out or shutdown)
    pub async fn release(&self, key: &str) -> Result<(), PublishError> {
        self.transition(
            key,
            |s| *s == TaskState::InFlight,
            TaskState::Pending,
            |_| {},
        )
        .await
        .map(|_| ())
    }

    /// Mark a pending task as needing no transfer
    pub async fn skip(&self, key: &str, reason: &str) -> Result<(), PublishError> {
        self.transition(
            key,
            TaskState::is_pending,
            TaskState::Skipped {
                reason: reason.to_string(),
            },
            |_| {},
        )
        .await
        .map(|_| ())
    }

    /// Put a failed task back in line
    pub async fn retry_failed(&self, key: &str) -> Result<(), PublishError> {
        self.transition(
            key,
            |s| matches!(s, TaskState::Failed { .. }),
            TaskState::Pending,
            |t| t.attempts = 0,
        )
        .await
        .map(|_| ())
    }

    /// Reset any settled task to pending with fresh metadata
    pub async fn force_reset(
        &self,
        key: &str,
        metadata: PublicationMetadata,
    ) -> Result<(), PublishError> {
        self.transition(
            key,
            |s| *s != TaskState::InFlight,
            TaskState::Pending,
            |t| {
                t.attempts = 0;
                t.forced = true;
                t.metadata = metadata;
            },
        )
        .await
        .map(|_| ())
    }
}
