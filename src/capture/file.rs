use crate::error::ArtifactError;
use crate::frame::Frame;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

/// Suffix of artifacts still being written
pub const PARTIAL_SUFFIX: &str = "partial";

const FLUSH_THRESHOLD: usize = 2_000_000;
const SYNC_INTERVAL: Duration = Duration::from_secs(1);

/// Artifact being written
///
/// Payloads go to `<final>.partial`; the file only appears under its final
/// name once `finalize` has flushed, synced and renamed it.
pub struct ArtifactFile {
    file: BufWriter<File>,
    buffer: Vec<u8>,
    frame_count: u64,
    bytes_written: u64,
    last_sync: Instant,
    partial_path: PathBuf,
    final_path: PathBuf,
}

impl ArtifactFile {
    /// Create the partial file for `final_path`
    pub async fn create(final_path: PathBuf) -> Result<Self, ArtifactError> {
        let partial_path = partial_path_for(&final_path);

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&partial_path)
            .await
            .map_err(|source| ArtifactError::Write {
                path: partial_path.clone(),
                source,
            })?;

        debug!("Opened artifact {}", partial_path.display());
        Ok(Self {
            file: BufWriter::new(file),
            buffer: Vec::with_capacity(FLUSH_THRESHOLD),
            frame_count: 0,
            bytes_written: 0,
            last_sync: Instant::now(),
            partial_path,
            final_path,
        })
    }

    /// Append a frame payload
    pub async fn append(&mut self, frame: &Frame) -> Result<(), ArtifactError> {
        self.buffer.extend_from_slice(&frame.data);
        self.frame_count += 1;

        if self.buffer.len() >= FLUSH_THRESHOLD {
            self.flush_buffer().await?;
        }

        if self.last_sync.elapsed() > SYNC_INTERVAL {
            self.sync().await?;
        }

        Ok(())
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    async fn flush_buffer(&mut self) -> Result<(), ArtifactError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        self.file
            .write_all(&self.buffer)
            .await
            .map_err(|source| ArtifactError::Write {
                path: self.partial_path.clone(),
                source,
            })?;
        self.bytes_written += self.buffer.len() as u64;
        self.buffer.clear();
        Ok(())
    }

    async fn sync(&mut self) -> Result<(), ArtifactError> {
        self.flush_buffer().await?;

        let path = self.partial_path.clone();
        self.file
            .flush()
            .await
            .map_err(|source| ArtifactError::Write {
                path: path.clone(),
                source,
            })?;
        self.file
            .get_ref()
            .sync_data()
            .await
            .map_err(|source| ArtifactError::Write { path, source })?;

        self.last_sync = Instant::now();
        Ok(())
    }

    /// Flush, sync and move the artifact to its final name
    pub async fn finalize(mut self) -> Result<PathBuf, ArtifactError> {
        self.flush_buffer().await?;

        let partial = self.partial_path.clone();
        self.file
            .flush()
            .await
            .map_err(|source| ArtifactError::Finalize {
                path: partial.clone(),
                source,
            })?;
        self.file
            .into_inner()
            .sync_all()
            .await
            .map_err(|source| ArtifactError::Finalize {
                path: partial.clone(),
                source,
            })?;

        tokio::fs::rename(&partial, &self.final_path)
            .await
            .map_err(|source| ArtifactError::Finalize {
                path: self.final_path.clone(),
                source,
            })?;

        info!(
            "Finalized artifact {} ({} frames, {} bytes)",
            self.final_path.display(),
            self.frame_count,
            self.bytes_written
        );
        Ok(self.final_path)
    }

    /// Drop the partial file
    pub async fn abort(self) {
        let path = self.partial_path.clone();
        drop(self.file);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!("Removed partial artifact {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove partial artifact {}: {}", path.display(), e),
        }
    }
}

pub fn partial_path_for(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_os_string();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}
