use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use formsync_db::requests::models::SupportRequest;
use serde::Serialize;

use crate::storage;
use crate::transform::TicketDraft;

/// CSV row using the source column names.
#[derive(Debug, Serialize)]
struct SnapshotRow<'a> {
    id: i64,
    created_at: DateTime<Utc>,
    #[serde(rename = "newusername")]
    new_user_name: Option<&'a str>,
    #[serde(rename = "departmentname")]
    department_name: Option<&'a str>,
    #[serde(rename = "samplename")]
    sample_name: Option<&'a str>,
    #[serde(rename = "phonenumber")]
    phone_number: Option<&'a str>,
    job: Option<&'a str>,
    #[serde(rename = "emailaddress")]
    email_address: Option<&'a str>,
    #[serde(rename = "costcenter")]
    cost_center: Option<&'a str>,
    #[serde(rename = "telephonelinesandinstallations")]
    telephone_lines: Option<&'a str>,
    #[serde(rename = "handsetsandheadsets")]
    handsets: Option<&'a str>,
    timeframe: Option<&'a str>,
    #[serde(rename = "dateneededby")]
    date_needed_by: Option<NaiveDate>,
    #[serde(rename = "approximateendingdate")]
    approximate_ending_date: Option<NaiveDate>,
    comments: Option<&'a str>,
    priority: Option<&'a str>,
}

impl<'a> From<&'a SupportRequest> for SnapshotRow<'a> {
    fn from(r: &'a SupportRequest) -> Self {
        Self {
            id: r.id,
            created_at: r.created_at,
            new_user_name: r.new_user_name.as_deref(),
            department_name: r.department_name.as_deref(),
            sample_name: r.sample_name.as_deref(),
            phone_number: r.phone_number.as_deref(),
            job: r.job.as_deref(),
            email_address: r.email_address.as_deref(),
            cost_center: r.cost_center.as_deref(),
            telephone_lines: r.telephone_lines.as_deref(),
            handsets: r.handsets.as_deref(),
            timeframe: r.timeframe.as_deref(),
            date_needed_by: r.date_needed_by,
            approximate_ending_date: r.approximate_ending_date,
            comments: r.comments.as_deref(),
            priority: r.priority.as_deref(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum SnapshotError {
    #[error("csv encoding failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("csv buffer failed: {0}")]
    Buffer(String),

    #[error(transparent)]
    Storage(#[from] storage::StorageError),
}

/// Optional CSV copies of each run's data. Every path is independent and
/// failures are logged, never returned.
#[derive(Debug, Clone, Default)]
pub struct SnapshotWriter {
    fetch_path: Option<PathBuf>,
    initial_path: Option<PathBuf>,
    preprocessed_path: Option<PathBuf>,
}

impl SnapshotWriter {
    pub fn new(
        fetch_path: Option<PathBuf>,
        initial_path: Option<PathBuf>,
        preprocessed_path: Option<PathBuf>,
    ) -> Self {
        Self {
            fetch_path,
            initial_path,
            preprocessed_path,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.fetch_path.is_some() || self.initial_path.is_some() || self.preprocessed_path.is_some()
    }

    /// Raw rows of the run. The initial snapshot is only written once.
    pub async fn write_fetched(&self, records: &[SupportRequest]) {
        if records.is_empty() {
            return;
        }
        let rows: Vec<SnapshotRow<'_>> = records.iter().map(SnapshotRow::from).collect();

        if let Some(path) = &self.fetch_path {
            write_logged(path, "fetched", &rows).await;
        }

        if let Some(path) = &self.initial_path {
            match tokio::fs::try_exists(path).await {
                Ok(true) => {
                    tracing::debug!(path = %path.display(), "initial snapshot exists, leaving it")
                }
                Ok(false) => write_logged(path, "initial", &rows).await,
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "cannot check initial snapshot"
                ),
            }
        }
    }

    /// Rows after field defaulting, for records that transformed cleanly.
    pub async fn write_preprocessed(&self, drafts: &[TicketDraft]) {
        let Some(path) = &self.preprocessed_path else {
            return;
        };
        if drafts.is_empty() {
            return;
        }
        let rows: Vec<SnapshotRow<'_>> = drafts
            .iter()
            .map(|d| SnapshotRow::from(&d.request))
            .collect();
        write_logged(path, "preprocessed", &rows).await;
    }
}

async fn write_logged(path: &Path, kind: &str, rows: &[SnapshotRow<'_>]) {
    match write_csv(path, rows).await {
        Ok(()) => tracing::info!(path = %path.display(), rows = rows.len(), kind, "wrote snapshot"),
        Err(e) => tracing::warn!(path = %path.display(), kind, error = %e, "snapshot not written"),
    }
}

async fn write_csv(path: &Path, rows: &[SnapshotRow<'_>]) -> Result<(), SnapshotError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| SnapshotError::Buffer(e.to_string()))?;
    storage::write_atomic(path, &bytes).await?;
    Ok(())
}
