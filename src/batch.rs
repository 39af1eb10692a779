//! Batch publication of artifacts already on disk

use crate::config::ArtifactConfig;
use crate::error::{ArtifactError, Result};
use crate::identity::ArtifactName;
use crate::publish::{
    DrainReport, Enqueued, MetadataBuilder, PublicationMetadata, PublicationTask, Publisher,
    TaskState,
};
use crate::reconcile::{LegacyReconciler, Resolution};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How a batch run treats artifacts that already have history
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Publish again even if the record already has a remote reference
    pub force: bool,
    /// Put tasks that failed in an earlier run back in line
    pub retry_failed: bool,
}

/// Counts printed at the end of a batch run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub found: usize,
    pub already_uploaded: usize,
    pub queued: usize,
    /// Queued with placeholder metadata
    pub unresolved: usize,
    pub uploaded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub deferred: usize,
    /// Dry run only
    pub would_publish: usize,
}

impl BatchSummary {
    fn absorb(&mut self, report: &DrainReport) {
        self.uploaded += report.uploaded;
        self.failed += report.failed;
        self.skipped += report.skipped;
        self.deferred += report.deferred;
        self.would_publish += report.would_publish;
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Videos found:      {}", self.found)?;
        writeln!(f, "Already uploaded:  {}", self.already_uploaded)?;
        writeln!(
            f,
            "Queued:            {} ({} unresolved)",
            self.queued, self.unresolved
        )?;
        if self.would_publish > 0 {
            writeln!(f, "Would publish:     {}", self.would_publish)?;
        }
        writeln!(f, "Uploaded:          {}", self.uploaded)?;
        writeln!(f, "Failed:            {}", self.failed)?;
        writeln!(f, "Skipped:           {}", self.skipped)?;
        write!(f, "Deferred by quota: {}", self.deferred)
    }
}

/// Scans artifact directories and feeds the publication queue
pub struct BatchUploader {
    publisher: Arc<Publisher>,
    reconciler: LegacyReconciler,
    metadata: MetadataBuilder,
    video_extensions: Vec<String>,
    clip_suffix: String,
}

impl BatchUploader {
    pub fn new(
        publisher: Arc<Publisher>,
        reconciler: LegacyReconciler,
        metadata: MetadataBuilder,
        artifacts: &ArtifactConfig,
    ) -> Self {
        Self {
            publisher,
            reconciler,
            metadata,
            video_extensions: artifacts
                .video_extensions
                .iter()
                .map(|e| e.to_ascii_lowercase())
                .collect(),
            clip_suffix: artifacts.result_clip_suffix.clone(),
        }
    }

    /// Publishable videos under `directories`, sorted
    ///
    /// Result clips and files with other extensions are ignored; missing
    /// directories are logged and skipped.
    pub async fn scan(&self, directories: &[PathBuf]) -> Vec<PathBuf> {
        let mut found = BTreeSet::new();

        for dir in directories {
            let mut entries = match fs::read_dir(dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Cannot scan {}: {}", dir.display(), e);
                    continue;
                }
            };

            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Error while scanning {}: {}", dir.display(), e);
                        break;
                    }
                };

                let path = entry.path();
                if self.is_video(&path) {
                    found.insert(path);
                }
            }
        }

        debug!("Scan found {} videos", found.len());
        found.into_iter().collect()
    }

    fn is_video(&self, path: &Path) -> bool {
        let extension = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => ext.to_ascii_lowercase(),
            None => return false,
        };
        if !self.video_extensions.contains(&extension) {
            return false;
        }
        path.file_stem()
            .and_then(|s| s.to_str())
            .map(|stem| !stem.ends_with(&self.clip_suffix))
            .unwrap_or(false)
    }

    /// Queue everything found under `directories`, then drain the queue
    pub async fn run(
        &self,
        directories: &[PathBuf],
        options: &BatchOptions,
        cancel: &CancellationToken,
    ) -> Result<BatchSummary> {
        let videos = self.scan(directories).await;
        let mut summary = BatchSummary {
            found: videos.len(),
            ..BatchSummary::default()
        };
        info!("Found {} videos to consider", videos.len());

        for video in &videos {
            if cancel.is_cancelled() {
                info!("Shutdown requested, not queueing the remaining videos");
                break;
            }
            self.consider(video, options, &mut summary).await?;
        }

        let report = self.publisher.drain(cancel).await?;
        summary.absorb(&report);

        info!(
            "Batch finished: {} found, {} already uploaded, {} queued, {} uploaded, {} failed, {} skipped, {} deferred",
            summary.found,
            summary.already_uploaded,
            summary.queued,
            summary.uploaded,
            summary.failed,
            summary.skipped,
            summary.deferred
        );
        Ok(summary)
    }

    async fn consider(
        &self,
        video: &Path,
        options: &BatchOptions,
        summary: &mut BatchSummary,
    ) -> Result<()> {
        let name = match parse_name(video, &self.clip_suffix) {
            Ok(name) => name,
            Err(e) => {
                warn!("Skipping {}: {}", video.display(), e);
                summary.skipped += 1;
                return Ok(());
            }
        };

        let resolution = self.reconciler.identify(&name).await?;
        let metadata = match &resolution {
            Resolution::Resolved(record) => {
                if let Some(url) = &record.remote_url {
                    if !options.force {
                        info!(
                            "Match #{} already published as {}, skipping {}",
                            record.id,
                            url,
                            video.display()
                        );
                        summary.already_uploaded += 1;
                        return Ok(());
                    }
                }
                self.metadata.for_record(record)
            }
            Resolution::Unresolved { captured_at, .. } => {
                summary.unresolved += 1;
                self.metadata.placeholder(*captured_at)
            }
        };

        let mut task = PublicationTask::new(
            resolution.identity(),
            video.to_path_buf(),
            metadata.clone(),
        );
        if options.force {
            task = task.force();
        }

        match self.publisher.enqueue(task).await? {
            Enqueued::Created { .. } => summary.queued += 1,
            Enqueued::Existing { key, state } => {
                self.requeue(&key, &state, metadata, options, summary).await?;
            }
        }
        Ok(())
    }

    async fn requeue(
        &self,
        key: &str,
        state: &TaskState,
        metadata: PublicationMetadata,
        options: &BatchOptions,
        summary: &mut BatchSummary,
    ) -> Result<()> {
        let queue = self.publisher.queue();
        match state {
            TaskState::Pending => summary.queued += 1,
            TaskState::InFlight => {
                warn!("{} is being published by another process, skipping", key);
                summary.skipped += 1;
            }
            TaskState::Failed { reason } if options.retry_failed => {
                info!("Retrying {} (previously failed: {})", key, reason);
                queue.retry_failed(key).await?;
                summary.queued += 1;
            }
            _ if options.force => {
                info!("Forcing publication of {} (was {})", key, state);
                queue.force_reset(key, metadata).await?;
                summary.queued += 1;
            }
            TaskState::Uploaded { url } => {
                info!("{} already uploaded as {}", key, url);
                summary.already_uploaded += 1;
            }
            TaskState::Failed { reason } => {
                info!(
                    "{} failed earlier ({}); pass --retry-failed to try again",
                    key, reason
                );
                summary.skipped += 1;
            }
            TaskState::Skipped { reason } => {
                debug!("{} was skipped earlier: {}", key, reason);
                summary.skipped += 1;
            }
        }
        Ok(())
    }
}

fn parse_name(path: &Path, clip_suffix: &str) -> std::result::Result<ArtifactName, ArtifactError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ArtifactError::UnrecognizedName {
            name: path.display().to_string(),
        })?;
    ArtifactName::parse(file_name, clip_suffix)
}
