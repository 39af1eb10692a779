//! Atomic JSON documents on local disk

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::trace;

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

fn to_io(e: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

/// Replace `path` with the JSON form of `value` (temp file, fsync, rename)
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(to_io)?;
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_bytes_atomic(&path, &bytes))
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
}

fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let temp = temp_path_for(path);
    {
        let mut file = std::fs::File::create(&temp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&temp, path)?;
    trace!("Persisted {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

/// Read a JSON document; `Ok(None)` when the file does not exist
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, ReadError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ReadError::Io(e)),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_atomic_write_and_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("doc.json");

        let mut doc = BTreeMap::new();
        doc.insert("budget".to_string(), 6u32);
        write_json_atomic(&path, &doc).await.unwrap();

        let loaded: Option<BTreeMap<String, u32>> = read_json(&path).unwrap();
        assert_eq!(loaded, Some(doc));
        assert!(!temp_path_for(&path).exists());

        let missing: Option<BTreeMap<String, u32>> =
            read_json(&dir.path().join("missing.json")).unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_corrupt_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let result: Result<Option<BTreeMap<String, u32>>, ReadError> = read_json(&path);
        assert!(matches!(result, Err(ReadError::Json(_))));
    }
}
