use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::requests::models::{SupportRequest, SYNC_MARKER_COLUMN};
use crate::requests::repositories::SupportRequestRepository;
use formsync_common::error::{FormsyncError, FormsyncResult};

/// A validated, quoted table reference (`table` or `schema.table`).
///
/// Table names cannot be bound as query parameters, so they are checked
/// against a strict identifier grammar before being spliced into SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTable {
    quoted: String,
}

impl SourceTable {
    pub fn parse(raw: &str) -> FormsyncResult<Self> {
        let parts: Vec<&str> = raw.trim().split('.').collect();
        if parts.is_empty() || parts.len() > 2 || !parts.iter().all(|p| is_identifier(p)) {
            return Err(FormsyncError::Validation(format!(
                "invalid table name `{raw}`: expected `table` or `schema.table` made of letters, digits and underscores"
            )));
        }

        let quoted = parts
            .iter()
            .map(|p| format!("\"{p}\""))
            .collect::<Vec<_>>()
            .join(".");
        Ok(Self { quoted })
    }

    pub fn as_sql(&self) -> &str {
        &self.quoted
    }
}

fn is_identifier(part: &str) -> bool {
    let mut chars = part.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    part.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Clone)]
pub struct PgSupportRequestRepository {
    pool: PgPool,
    table: SourceTable,
}

impl PgSupportRequestRepository {
    pub fn new(pool: PgPool, table: SourceTable) -> Self {
        Self { pool, table }
    }

    /// Add the sync marker column if the source table lacks it. Idempotent.
    pub async fn ensure_sync_marker(&self) -> FormsyncResult<()> {
        let sql = format!(
            "alter table {} add column if not exists {SYNC_MARKER_COLUMN} text",
            self.table.as_sql()
        );
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| FormsyncError::Database(e.to_string()))?;
        Ok(())
    }

    fn map_row(row: &PgRow) -> FormsyncResult<SupportRequest> {
        Ok(SupportRequest {
            id: decode_id(row)?,
            created_at: decode_created_at(row)?,
            new_user_name: text(row, "newusername")?,
            department_name: text(row, "departmentname")?,
            sample_name: text(row, "samplename")?,
            phone_number: text(row, "phonenumber")?,
            job: text(row, "job")?,
            email_address: text(row, "emailaddress")?,
            cost_center: text(row, "costcenter")?,
            telephone_lines: text(row, "telephonelinesandinstallations")?,
            handsets: text(row, "handsetsandheadsets")?,
            timeframe: text(row, "timeframe")?,
            date_needed_by: row
                .try_get("dateneededby")
                .map_err(|e| decode_error("dateneededby", e))?,
            approximate_ending_date: row
                .try_get("approximateendingdate")
                .map_err(|e| decode_error("approximateendingdate", e))?,
            comments: text(row, "comments")?,
            // Optional column; older tables do not carry it.
            priority: row.try_get("priority").ok().flatten(),
        })
    }

    fn map_rows(rows: Vec<PgRow>) -> FormsyncResult<Vec<SupportRequest>> {
        rows.iter().map(Self::map_row).collect()
    }
}

fn text(row: &PgRow, column: &str) -> FormsyncResult<Option<String>> {
    row.try_get(column).map_err(|e| decode_error(column, e))
}

fn decode_id(row: &PgRow) -> FormsyncResult<i64> {
    row.try_get::<i64, _>("id")
        .or_else(|_| row.try_get::<i32, _>("id").map(i64::from))
        .map_err(|e| decode_error("id", e))
}

/// `timestamptz` decodes directly; a plain `timestamp` is read as UTC.
fn decode_created_at(row: &PgRow) -> FormsyncResult<DateTime<Utc>> {
    row.try_get::<DateTime<Utc>, _>("created_at")
        .or_else(|_| {
            row.try_get::<NaiveDateTime, _>("created_at")
                .map(|naive| naive.and_utc())
        })
        .map_err(|e| decode_error("created_at", e))
}

fn decode_error(column: &str, e: sqlx::Error) -> FormsyncError {
    FormsyncError::Database(format!("failed to decode column `{column}`: {e}"))
}

#[async_trait]
impl SupportRequestRepository for PgSupportRequestRepository {
    async fn fetch_unsynced(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> FormsyncResult<Vec<SupportRequest>> {
        let rows = match since {
            Some(since) => {
                let sql = format!(
                    "select * from {}
                     where created_at > $1 and {SYNC_MARKER_COLUMN} is null
                     order by created_at asc, id asc",
                    self.table.as_sql()
                );
                sqlx::query(&sql).bind(since).fetch_all(&self.pool).await
            }
            None => {
                let sql = format!(
                    "select * from {}
                     where {SYNC_MARKER_COLUMN} is null
                     order by created_at asc, id asc",
                    self.table.as_sql()
                );
                sqlx::query(&sql).fetch_all(&self.pool).await
            }
        }
        .map_err(|e| FormsyncError::Database(e.to_string()))?;

        Self::map_rows(rows)
    }

    async fn fetch_unsynced_by_ids(&self, ids: &[i64]) -> FormsyncResult<Vec<SupportRequest>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "select * from {}
             where id = any($1) and {SYNC_MARKER_COLUMN} is null
             order by created_at asc, id asc",
            self.table.as_sql()
        );
        let rows = sqlx::query(&sql)
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| FormsyncError::Database(e.to_string()))?;

        Self::map_rows(rows)
    }

    async fn mark_synced(&self, id: i64, ticket_key: &str) -> FormsyncResult<()> {
        let sql = format!(
            "update {} set {SYNC_MARKER_COLUMN} = $1
             where id = $2 and {SYNC_MARKER_COLUMN} is null",
            self.table.as_sql()
        );
        let result = sqlx::query(&sql)
            .bind(ticket_key)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| FormsyncError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(FormsyncError::NotFound(format!(
                "request {id} does not exist or is already synced"
            )));
        }
        Ok(())
    }
}
