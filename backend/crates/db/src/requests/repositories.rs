use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::requests::models::SupportRequest;
use formsync_common::error::FormsyncResult;

#[async_trait]
pub trait SupportRequestRepository: Send + Sync {
    /// Unsynced requests created strictly after `since`.
    /// `None` returns every unsynced request (first run).
    async fn fetch_unsynced(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> FormsyncResult<Vec<SupportRequest>>;

    /// Unsynced requests among `ids`. Ids that are synced or gone are omitted.
    async fn fetch_unsynced_by_ids(&self, ids: &[i64]) -> FormsyncResult<Vec<SupportRequest>>;

    /// Record the created ticket against the request.
    /// Fails with `NotFound` if the request does not exist or is already synced.
    async fn mark_synced(&self, id: i64, ticket_key: &str) -> FormsyncResult<()>;
}
