use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use formsync_config::CheckpointGranularity;
use serde::{Deserialize, Serialize};

use crate::storage::{self, StagedFile, StorageError};

/// Persists the upper bound of already-processed `created_at` values.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// `Ok(None)` means no run has completed yet.
    async fn load(&self) -> Result<Option<DateTime<Utc>>, StorageError>;

    /// Replace the checkpoint. Never leaves a partial value behind.
    async fn save(&self, checkpoint: DateTime<Utc>) -> Result<(), StorageError>;
}

/// On-disk shape: `{"last_run_date": "YYYY-MM-DD"}`, plus `last_run_at` when
/// the store keeps full timestamps.
#[derive(Debug, Serialize, Deserialize)]
struct CheckpointFile {
    last_run_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_run_at: Option<DateTime<Utc>>,
}

impl CheckpointFile {
    fn checkpoint(&self) -> DateTime<Utc> {
        self.last_run_at
            .unwrap_or_else(|| self.last_run_date.and_time(NaiveTime::MIN).and_utc())
    }
}

pub struct FileCheckpointStore {
    path: PathBuf,
    granularity: CheckpointGranularity,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>, granularity: CheckpointGranularity) -> Self {
        Self {
            path: path.into(),
            granularity,
        }
    }

    fn encode(&self, checkpoint: DateTime<Utc>) -> Result<Vec<u8>, StorageError> {
        let file = CheckpointFile {
            last_run_date: checkpoint.date_naive(),
            last_run_at: match self.granularity {
                CheckpointGranularity::Date => None,
                CheckpointGranularity::Timestamp => Some(checkpoint),
            },
        };
        serde_json::to_vec(&file).map_err(|e| StorageError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    /// First half of `save`: the new value is durable but not yet visible.
    pub(crate) async fn stage(
        &self,
        checkpoint: DateTime<Utc>,
    ) -> Result<StagedFile, StorageError> {
        let bytes = self.encode(checkpoint)?;
        storage::stage(&self.path, &bytes).await
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self) -> Result<Option<DateTime<Utc>>, StorageError> {
        let file: Option<CheckpointFile> = storage::read_json(&self.path).await?;
        match file {
            Some(file) => Ok(Some(file.checkpoint())),
            None => {
                tracing::info!(
                    path = %self.path.display(),
                    "no previous run found, assuming first run"
                );
                Ok(None)
            }
        }
    }

    async fn save(&self, checkpoint: DateTime<Utc>) -> Result<(), StorageError> {
        self.stage(checkpoint).await?.commit().await?;
        tracing::info!(
            path = %self.path.display(),
            last_run_date = %checkpoint.date_naive(),
            "checkpoint saved"
        );
        Ok(())
    }
}
