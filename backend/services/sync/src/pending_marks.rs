use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::storage::{self, StorageError};

/// A ticket that exists in the tracker while its request is still unmarked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMark {
    pub record_id: i64,
    pub ticket_key: String,
}

/// Pending marks ordered by record id. A listed request must never be
/// submitted again, only re-marked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMarks {
    #[serde(default)]
    entries: Vec<PendingMark>,
}

impl PendingMarks {
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, record_id: i64) -> bool {
        self.position(record_id).is_ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingMark> {
        self.entries.iter()
    }

    pub fn insert(&mut self, record_id: i64, ticket_key: impl Into<String>) {
        let mark = PendingMark {
            record_id,
            ticket_key: ticket_key.into(),
        };
        match self.position(record_id) {
            Ok(i) => self.entries[i] = mark,
            Err(i) => self.entries.insert(i, mark),
        }
    }

    pub fn remove(&mut self, record_id: i64) -> bool {
        match self.position(record_id) {
            Ok(i) => {
                self.entries.remove(i);
                true
            }
            Err(_) => false,
        }
    }

    fn position(&self, record_id: i64) -> Result<usize, usize> {
        self.entries.binary_search_by_key(&record_id, |m| m.record_id)
    }

    fn normalize(mut self) -> Self {
        self.entries.sort_by_key(|m| m.record_id);
        self.entries.dedup_by_key(|m| m.record_id);
        self
    }
}

/// JSON file holding pending marks, replaced atomically on save.
pub struct PendingMarkFile {
    path: PathBuf,
}

impl PendingMarkFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn load(&self) -> Result<PendingMarks, StorageError> {
        let marks: Option<PendingMarks> = storage::read_json(&self.path).await?;
        Ok(marks.map(PendingMarks::normalize).unwrap_or_default())
    }

    pub async fn save(&self, marks: &PendingMarks) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(marks).map_err(|e| StorageError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        storage::write_atomic(&self.path, &bytes).await
    }
}
