use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage unavailable at {}: {source}", path.display())]
    Unavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("corrupt file at {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
}

impl StorageError {
    pub(crate) fn unavailable(path: &Path, source: io::Error) -> Self {
        Self::Unavailable {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Read and decode a JSON file. A missing file is `Ok(None)`.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StorageError::unavailable(path, e)),
    };

    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| StorageError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Bytes written and fsynced next to their target, not yet visible there.
#[derive(Debug)]
pub struct StagedFile {
    temp_path: PathBuf,
    target: PathBuf,
}

impl StagedFile {
    /// Atomically replace the target with the staged bytes.
    pub async fn commit(self) -> Result<(), StorageError> {
        if let Err(e) = tokio::fs::rename(&self.temp_path, &self.target).await {
            let _ = tokio::fs::remove_file(&self.temp_path).await;
            return Err(StorageError::unavailable(&self.target, e));
        }

        // Fsync parent directory so the rename itself survives a crash
        if let Ok(dir) = tokio::fs::File::open(parent_dir(&self.target)).await {
            let _ = dir.sync_all().await;
        }
        Ok(())
    }
}

/// Write `data` to a unique temp file in the target's directory and fsync it.
pub async fn stage(target: &Path, data: &[u8]) -> Result<StagedFile, StorageError> {
    let dir = parent_dir(target);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| StorageError::unavailable(&dir, e))?;

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "formsync".to_owned());
    let temp_path = dir.join(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

    if let Err(e) = write_synced(&temp_path, data).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(StorageError::unavailable(&temp_path, e));
    }

    Ok(StagedFile {
        temp_path,
        target: target.to_path_buf(),
    })
}

/// Stage then commit: readers see either the old file or the new one.
pub async fn write_atomic(target: &Path, data: &[u8]) -> Result<(), StorageError> {
    stage(target, data).await?.commit().await
}

async fn write_synced(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(data).await?;
    file.sync_all().await
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        value: u32,
    }

    #[tokio::test]
    async fn read_json_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let got: Option<Sample> = read_json(&dir.path().join("absent.json")).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn read_json_reports_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        tokio::fs::write(&path, b"{\"value\": ").await.unwrap();

        let err = read_json::<Sample>(&path).await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { .. }), "got: {err:?}");
    }

    #[tokio::test]
    async fn write_atomic_replaces_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        write_atomic(&path, br#"{"value": 1}"#).await.unwrap();
        write_atomic(&path, br#"{"value": 2}"#).await.unwrap();

        let got: Sample = read_json(&path).await.unwrap().unwrap();
        assert_eq!(got, Sample { value: 2 });

        let entries: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries.len(), 1, "got: {entries:?}");
    }

    #[tokio::test]
    async fn staged_but_uncommitted_write_is_invisible() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        write_atomic(&path, br#"{"value": 1}"#).await.unwrap();

        let staged = stage(&path, br#"{"value": 2}"#).await.unwrap();
        drop(staged);

        let got: Sample = read_json(&path).await.unwrap().unwrap();
        assert_eq!(got, Sample { value: 1 });
    }

    #[tokio::test]
    async fn unreadable_path_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where a file is expected cannot be read as a string
        let err = read_json::<Sample>(dir.path()).await.unwrap_err();
        assert!(matches!(err, StorageError::Unavailable { .. }), "got: {err:?}");
    }
}
