use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::{self, StorageError};

/// A request that failed in a previous run and has not been synced since.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub record_id: i64,
    pub reason: String,
    pub attempts: u32,
    pub first_failed_at: DateTime<Utc>,
    pub last_failed_at: DateTime<Utc>,
}

/// Dead letters ordered by record id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterList {
    #[serde(default)]
    entries: Vec<DeadLetter>,
}

impl DeadLetterList {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.entries.iter().map(|e| e.record_id)
    }

    #[cfg(test)]
    pub fn get(&self, record_id: i64) -> Option<&DeadLetter> {
        self.position(record_id).ok().map(|i| &self.entries[i])
    }

    /// Add a failure, or refresh the entry if the record already failed before.
    pub fn record_failure(
        &mut self,
        record_id: i64,
        reason: impl Into<String>,
        attempts: u32,
        now: DateTime<Utc>,
    ) {
        let reason = reason.into();
        match self.position(record_id) {
            Ok(i) => {
                let entry = &mut self.entries[i];
                entry.reason = reason;
                entry.attempts = entry.attempts.saturating_add(attempts);
                entry.last_failed_at = now;
            }
            Err(i) => self.entries.insert(
                i,
                DeadLetter {
                    record_id,
                    reason,
                    attempts,
                    first_failed_at: now,
                    last_failed_at: now,
                },
            ),
        }
    }

    /// Remove a record that has since been synced. Returns whether it was listed.
    pub fn resolve(&mut self, record_id: i64) -> bool {
        match self.position(record_id) {
            Ok(i) => {
                self.entries.remove(i);
                true
            }
            Err(_) => false,
        }
    }

    pub fn retain(&mut self, mut keep: impl FnMut(i64) -> bool) {
        self.entries.retain(|e| keep(e.record_id));
    }

    fn position(&self, record_id: i64) -> Result<usize, usize> {
        self.entries.binary_search_by_key(&record_id, |e| e.record_id)
    }

    fn normalize(mut self) -> Self {
        self.entries.sort_by_key(|e| e.record_id);
        self.entries.dedup_by_key(|e| e.record_id);
        self
    }
}

/// JSON file holding the dead-letter list, replaced atomically on save.
pub struct DeadLetterFile {
    path: PathBuf,
}

impl DeadLetterFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn load(&self) -> Result<DeadLetterList, StorageError> {
        let list: Option<DeadLetterList> = storage::read_json(&self.path).await?;
        Ok(list.map(DeadLetterList::normalize).unwrap_or_default())
    }

    pub async fn save(&self, list: &DeadLetterList) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(list).map_err(|e| StorageError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        storage::write_atomic(&self.path, &bytes).await
    }
}
