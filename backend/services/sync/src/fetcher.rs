use chrono::{DateTime, Utc};
use formsync_db::requests::models::SupportRequest;
use formsync_db::requests::repositories::SupportRequestRepository;

#[derive(Debug, thiserror::Error)]
#[error("source unavailable: {0}")]
pub struct SourceUnavailable(pub String);

/// Records of one fetch window plus the newest `created_at` seen in it.
#[derive(Debug, Default)]
pub struct FetchedBatch {
    pub records: Vec<SupportRequest>,
    pub max_created_at: Option<DateTime<Utc>>,
}

pub struct ChangeFetcher<R> {
    repo: R,
}

impl<R> ChangeFetcher<R>
where
    R: SupportRequestRepository,
{
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Unsynced records created strictly after `since`, or all of them when
    /// `since` is `None`. Nothing is returned if the query fails.
    pub async fn fetch(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<FetchedBatch, SourceUnavailable> {
        match since {
            Some(since) => tracing::info!(%since, "fetching new requests"),
            None => tracing::info!("first run, fetching all requests"),
        }

        let mut records = self
            .repo
            .fetch_unsynced(since)
            .await
            .map_err(|e| SourceUnavailable(e.to_string()))?;

        // The window bound is exclusive even if the source is sloppy about it
        if let Some(since) = since {
            let before = records.len();
            records.retain(|r| r.created_at > since);
            if records.len() != before {
                tracing::warn!(
                    dropped = before - records.len(),
                    %since,
                    "source returned records at or before the checkpoint"
                );
            }
        }

        let max_created_at = records.iter().map(|r| r.created_at).max();
        tracing::info!(count = records.len(), ?max_created_at, "fetched requests");

        Ok(FetchedBatch {
            records,
            max_created_at,
        })
    }

    /// Unsynced records among `ids`, used to retry dead letters.
    pub async fn fetch_by_ids(
        &self,
        ids: &[i64],
    ) -> Result<Vec<SupportRequest>, SourceUnavailable> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let records = self
            .repo
            .fetch_unsynced_by_ids(ids)
            .await
            .map_err(|e| SourceUnavailable(e.to_string()))?;

        tracing::info!(
            requested = ids.len(),
            found = records.len(),
            "fetched dead-lettered requests"
        );
        Ok(records)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone};
    use formsync_common::error::{FormsyncError, FormsyncResult};
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    // ── In-memory SupportRequestRepository ─────────────────────

    #[derive(Default)]
    struct MemoryState {
        rows: Vec<SupportRequest>,
        synced: BTreeMap<i64, String>,
        fail_fetch: bool,
        fail_mark: bool,
        ignore_bound: bool,
    }

    /// Shared by the publisher and orchestrator tests.
    #[derive(Clone, Default)]
    pub(crate) struct MemoryRepo {
        state: Arc<Mutex<MemoryState>>,
    }

    impl MemoryRepo {
        pub(crate) fn with_rows(rows: Vec<SupportRequest>) -> Self {
            let repo = Self::default();
            repo.state.lock().unwrap().rows = rows;
            repo
        }

        pub(crate) fn set_fail_fetch(&self, fail: bool) {
            self.state.lock().unwrap().fail_fetch = fail;
        }

        pub(crate) fn set_fail_mark(&self, fail: bool) {
            self.state.lock().unwrap().fail_mark = fail;
        }

        fn set_ignore_bound(&self, ignore: bool) {
            self.state.lock().unwrap().ignore_bound = ignore;
        }

        pub(crate) fn synced(&self) -> BTreeMap<i64, String> {
            self.state.lock().unwrap().synced.clone()
        }
    }

    #[async_trait]
    impl SupportRequestRepository for MemoryRepo {
        async fn fetch_unsynced(
            &self,
            since: Option<DateTime<Utc>>,
        ) -> FormsyncResult<Vec<SupportRequest>> {
            let state = self.state.lock().unwrap();
            if state.fail_fetch {
                return Err(FormsyncError::Database("connection refused".into()));
            }
            // Reverse order: callers must not rely on ordering
            Ok(state
                .rows
                .iter()
                .rev()
                .filter(|r| !state.synced.contains_key(&r.id))
                .filter(|r| state.ignore_bound || since.map_or(true, |s| r.created_at > s))
                .cloned()
                .collect())
        }

        async fn fetch_unsynced_by_ids(&self, ids: &[i64]) -> FormsyncResult<Vec<SupportRequest>> {
            let state = self.state.lock().unwrap();
            if state.fail_fetch {
                return Err(FormsyncError::Database("connection refused".into()));
            }
            Ok(state
                .rows
                .iter()
                .filter(|r| ids.contains(&r.id) && !state.synced.contains_key(&r.id))
                .cloned()
                .collect())
        }

        async fn mark_synced(&self, id: i64, ticket_key: &str) -> FormsyncResult<()> {
            let mut state = self.state.lock().unwrap();
            if state.fail_mark {
                return Err(FormsyncError::Database("write failed".into()));
            }
            if state.synced.contains_key(&id) || !state.rows.iter().any(|r| r.id == id) {
                return Err(FormsyncError::NotFound(format!("request {id}")));
            }
            state.synced.insert(id, ticket_key.to_owned());
            Ok(())
        }
    }

    pub(crate) fn ts(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, day, hour, 0, 0).unwrap()
    }

    /// A complete request that transforms cleanly.
    pub(crate) fn request(id: i64, created_at: DateTime<Utc>) -> SupportRequest {
        let mut r = SupportRequest::new(id, created_at);
        r.new_user_name = Some(format!("User {id}"));
        r.department_name = Some("Finance".to_owned());
        r.email_address = Some(format!("user{id}@example.com"));
        r.date_needed_by = NaiveDate::from_ymd_opt(2025, 2, 1);
        r
    }

    #[tokio::test]
    async fn first_run_fetches_everything() {
        let repo = MemoryRepo::with_rows(vec![request(1, ts(1, 9)), request(2, ts(2, 9))]);
        let fetcher = ChangeFetcher::new(repo);

        let batch = fetcher.fetch(None).await.unwrap();
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.max_created_at, Some(ts(2, 9)));
    }

    #[tokio::test]
    async fn window_is_strictly_after_checkpoint() {
        let repo = MemoryRepo::with_rows(vec![
            request(1, ts(1, 9)),
            request(2, ts(2, 9)),
            request(3, ts(3, 9)),
        ]);
        let fetcher = ChangeFetcher::new(repo);

        let batch = fetcher.fetch(Some(ts(2, 9))).await.unwrap();
        let ids: Vec<i64> = batch.records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3]);
        assert_eq!(batch.max_created_at, Some(ts(3, 9)));
    }

    #[tokio::test]
    async fn checkpoint_at_max_yields_empty_batch() {
        let repo = MemoryRepo::with_rows(vec![request(1, ts(1, 9)), request(2, ts(4, 9))]);
        let fetcher = ChangeFetcher::new(repo);

        let first = fetcher.fetch(None).await.unwrap();
        let second = fetcher.fetch(first.max_created_at).await.unwrap();
        assert!(second.records.is_empty());
        assert_eq!(second.max_created_at, None);
    }

    #[tokio::test]
    async fn boundary_rows_from_a_sloppy_source_are_dropped() {
        let repo = MemoryRepo::with_rows(vec![request(1, ts(1, 9)), request(2, ts(2, 9))]);
        repo.set_ignore_bound(true);
        let fetcher = ChangeFetcher::new(repo);

        let batch = fetcher.fetch(Some(ts(1, 9))).await.unwrap();
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.records[0].id, 2);
    }

    #[tokio::test]
    async fn max_is_found_regardless_of_order() {
        let repo = MemoryRepo::with_rows(vec![
            request(1, ts(5, 9)),
            request(2, ts(9, 9)),
            request(3, ts(7, 9)),
        ]);
        let batch = ChangeFetcher::new(repo).fetch(None).await.unwrap();
        assert_eq!(batch.max_created_at, Some(ts(9, 9)));
    }

    #[tokio::test]
    async fn query_failure_is_source_unavailable() {
        let repo = MemoryRepo::with_rows(vec![request(1, ts(1, 9))]);
        repo.set_fail_fetch(true);
        let fetcher = ChangeFetcher::new(repo);

        let err = fetcher.fetch(None).await.unwrap_err();
        assert!(err.to_string().contains("connection refused"), "got: {err}");
        assert!(fetcher.fetch_by_ids(&[1]).await.is_err());
    }

    #[tokio::test]
    async fn fetch_by_ids_skips_synced() {
        let repo = MemoryRepo::with_rows(vec![request(1, ts(1, 9)), request(2, ts(1, 10))]);
        repo.mark_synced(1, "HELP-1").await.unwrap();
        let fetcher = ChangeFetcher::new(repo);

        let rows = fetcher.fetch_by_ids(&[1, 2]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, 2);
        assert!(fetcher.fetch_by_ids(&[]).await.unwrap().is_empty());
    }
}
