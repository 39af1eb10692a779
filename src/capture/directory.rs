use crate::config::ArtifactConfig;
use crate::error::ArtifactError;
use crate::frame::Frame;
use crate::identity::{local_capture_time, resolve_timezone, ArtifactName, MatchId};
use chrono_tz::Tz;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tracing::{debug, info, warn};

use super::file::{partial_path_for, ArtifactFile, PARTIAL_SUFFIX};

const MAX_NAME_COLLISIONS: u32 = 60;

/// Finalized artifact pair of one match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub name: ArtifactName,
    pub video: PathBuf,
    pub clip: PathBuf,
}

/// Owns the artifact directory layout
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    config: ArtifactConfig,
    base_dir: PathBuf,
    timezone: Tz,
}

impl ArtifactWriter {
    pub fn new(config: ArtifactConfig) -> Self {
        let base_dir = config.base_dir();
        let timezone = resolve_timezone(&config.timezone);
        Self {
            config,
            base_dir,
            timezone,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn clip_suffix(&self) -> &str {
        &self.config.result_clip_suffix
    }

    pub fn path_for(&self, name: &ArtifactName) -> PathBuf {
        self.base_dir.join(name.file_name(&self.config.result_clip_suffix))
    }

    /// Create the directory and remove partial files left by a previous run
    pub async fn prepare(&self) -> Result<usize, ArtifactError> {
        fs::create_dir_all(&self.base_dir)
            .await
            .map_err(|source| ArtifactError::DirectoryCreation {
                path: self.base_dir.display().to_string(),
                source,
            })?;

        let mut removed = 0;
        let mut entries =
            fs::read_dir(&self.base_dir)
                .await
                .map_err(|source| ArtifactError::DirectoryCreation {
                    path: self.base_dir.display().to_string(),
                    source,
                })?;

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some(PARTIAL_SUFFIX) {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => {
                    warn!("Removed stale partial artifact {}", path.display());
                    removed += 1;
                }
                Err(e) => warn!("Failed to remove stale partial {}: {}", path.display(), e),
            }
        }

        info!(
            "Artifact directory ready: {} ({} stale partials removed)",
            self.base_dir.display(),
            removed
        );
        Ok(removed)
    }

    /// Open the full-match video for a session starting at `started_at`
    pub async fn begin_video(
        &self,
        started_at: SystemTime,
    ) -> Result<(ArtifactName, ArtifactFile), ArtifactError> {
        let mut name = ArtifactName::new(
            local_capture_time(started_at, self.timezone),
            &self.config.extension,
        );

        for _ in 0..MAX_NAME_COLLISIONS {
            if !self.name_taken(&name).await {
                break;
            }
            debug!(
                "Artifact name {} taken, moving one second forward",
                name.file_name(&self.config.result_clip_suffix)
            );
            name.captured_at += chrono::Duration::seconds(1);
        }

        let file = ArtifactFile::create(self.path_for(&name)).await?;
        Ok((name, file))
    }

    async fn name_taken(&self, name: &ArtifactName) -> bool {
        let video = self.path_for(name);
        let clip = self.path_for(&name.as_result_clip());
        for path in [&video, &clip] {
            if fs::try_exists(path).await.unwrap_or(false)
                || fs::try_exists(partial_path_for(path)).await.unwrap_or(false)
            {
                return true;
            }
        }
        false
    }

    /// Write the result clip that belongs to `name`
    pub async fn write_clip(
        &self,
        name: &ArtifactName,
        frames: &[Frame],
    ) -> Result<PathBuf, ArtifactError> {
        let mut file = ArtifactFile::create(self.path_for(&name.as_result_clip())).await?;
        for frame in frames {
            if let Err(e) = file.append(frame).await {
                file.abort().await;
                return Err(e);
            }
        }
        file.finalize().await
    }

    /// Rename a provisional pair to its `{id}-{timestamp}` form
    pub async fn assign_identity(
        &self,
        paths: &ArtifactPaths,
        id: MatchId,
    ) -> Result<ArtifactPaths, ArtifactError> {
        let name = paths.name.clone().with_id(id);
        let video = self.path_for(&name);
        let clip = self.path_for(&name.as_result_clip());

        fs::rename(&paths.video, &video)
            .await
            .map_err(|source| ArtifactError::Finalize {
                path: video.clone(),
                source,
            })?;

        // Both files carry the id or neither does
        if let Err(source) = fs::rename(&paths.clip, &clip).await {
            if let Err(e) = fs::rename(&video, &paths.video).await {
                warn!(
                    "Failed to restore {} after clip rename failed: {}",
                    paths.video.display(),
                    e
                );
            }
            return Err(ArtifactError::Finalize { path: clip, source });
        }

        debug!("Artifacts renamed for match #{}", id);
        Ok(ArtifactPaths { name, video, clip })
    }

    /// Remove a finalized artifact (used when a clip write fails after the video landed)
    pub async fn remove(&self, path: &Path) {
        if let Err(e) = fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove artifact {}: {}", path.display(), e);
            }
        }
    }
}
