use std::collections::HashSet;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use formsync_db::requests::repositories::SupportRequestRepository;
use serde::Serialize;

use crate::checkpoint::CheckpointStore;
use crate::dead_letter::{DeadLetterFile, DeadLetterList};
use crate::export::SnapshotWriter;
use crate::fetcher::{ChangeFetcher, SourceUnavailable};
use crate::pending_marks::{PendingMarkFile, PendingMarks};
use crate::publisher::{IssueTracker, RemarkOutcome, RetryPolicy, TicketPublisher, TicketResult};
use crate::storage::StorageError;
use crate::transform::RecordTransformer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Fetching,
    Publishing,
    Checkpointing,
}

/// Run-level failures. Nothing is checkpointed when one of these aborts a run.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] StorageError),

    #[error(transparent)]
    SourceUnavailable(#[from] SourceUnavailable),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Transform,
    Publish,
}

/// A record that did not make it into the tracker during this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordFailure {
    pub record_id: i64,
    pub stage: FailureStage,
    pub error: String,
    pub attempts: u32,
}

/// Aggregate of one orchestration pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncRun {
    pub window_start: Option<DateTime<Utc>>,
    pub records_fetched: usize,
    pub records_succeeded: usize,
    pub records_failed: usize,
    pub dead_letters_retried: usize,
    /// Requests from earlier runs whose existing ticket was marked this run.
    pub marks_recovered: usize,
    /// Requests with a ticket but no mark after this run. They are counted in
    /// `records_fetched` when re-fetched but never submitted again.
    pub marks_pending: usize,
    pub new_checkpoint: Option<DateTime<Utc>>,
    pub results: Vec<TicketResult>,
    pub failures: Vec<RecordFailure>,
}

impl fmt::Display for SyncRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let window = self
            .window_start
            .map_or_else(|| "beginning".to_owned(), |t| t.to_rfc3339());
        let checkpoint = self
            .new_checkpoint
            .map_or_else(|| "none".to_owned(), |t| t.to_rfc3339());
        write!(
            f,
            "since {window}: fetched={} succeeded={} failed={} dead_letters_retried={} \
             marks_pending={} checkpoint={checkpoint}",
            self.records_fetched,
            self.records_succeeded,
            self.records_failed,
            self.dead_letters_retried,
            self.marks_pending
        )
    }
}

#[derive(Debug)]
pub enum SyncOutcome {
    Completed(SyncRun),
    /// Another run was still in flight.
    Skipped,
}

/// Resets the orchestrator to `Idle` however the run ends.
struct RunGuard<'a> {
    state: &'a Mutex<RunState>,
}

impl RunGuard<'_> {
    fn enter(&self, next: RunState) {
        *lock(self.state) = next;
        tracing::debug!(state = ?next, "sync state");
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        *lock(self.state) = RunState::Idle;
    }
}

fn lock(state: &Mutex<RunState>) -> MutexGuard<'_, RunState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Where created-but-unmarked tickets are remembered between runs.
enum PendingStore {
    /// Survives runs of this process only.
    Memory(Mutex<PendingMarks>),
    File(PendingMarkFile),
}

impl PendingStore {
    async fn load(&self) -> Result<PendingMarks, StorageError> {
        match self {
            Self::Memory(marks) => Ok(marks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone()),
            Self::File(file) => file.load().await,
        }
    }

    async fn save(&self, next: PendingMarks) -> Result<(), StorageError> {
        match self {
            Self::Memory(marks) => {
                *marks.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = next;
                Ok(())
            }
            Self::File(file) => file.save(&next).await,
        }
    }
}

pub struct SyncOrchestrator<C, R, T> {
    checkpoints: C,
    fetcher: ChangeFetcher<R>,
    transformer: RecordTransformer,
    publisher: TicketPublisher<T, R>,
    dead_letters: Option<DeadLetterFile>,
    retry_dead_letters: bool,
    pending: PendingStore,
    snapshots: SnapshotWriter,
    state: Mutex<RunState>,
}

impl<C, R, T> SyncOrchestrator<C, R, T>
where
    C: CheckpointStore,
    R: SupportRequestRepository + Clone,
    T: IssueTracker,
{
    pub fn new(
        checkpoints: C,
        repo: R,
        transformer: RecordTransformer,
        tracker: T,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            checkpoints,
            fetcher: ChangeFetcher::new(repo.clone()),
            transformer,
            publisher: TicketPublisher::new(tracker, repo, policy),
            dead_letters: None,
            retry_dead_letters: false,
            pending: PendingStore::Memory(Mutex::new(PendingMarks::default())),
            snapshots: SnapshotWriter::default(),
            state: Mutex::new(RunState::Idle),
        }
    }

    /// Keep failed records in `file`; with `retry`, later runs submit them again.
    pub fn with_dead_letters(mut self, file: DeadLetterFile, retry: bool) -> Self {
        self.dead_letters = Some(file);
        self.retry_dead_letters = retry;
        self
    }

    /// Persist created-but-unmarked tickets in `file` instead of memory.
    pub fn with_pending_marks(mut self, file: PendingMarkFile) -> Self {
        self.pending = PendingStore::File(file);
        self
    }

    pub fn with_snapshots(mut self, snapshots: SnapshotWriter) -> Self {
        self.snapshots = snapshots;
        self
    }

    #[cfg(test)]
    pub fn state(&self) -> RunState {
        *lock(&self.state)
    }

    fn begin(&self) -> Option<RunGuard<'_>> {
        let mut state = lock(&self.state);
        if *state != RunState::Idle {
            return None;
        }
        *state = RunState::Fetching;
        Some(RunGuard { state: &self.state })
    }

    /// One pass: load checkpoint, fetch, transform and publish every record,
    /// then persist dead letters and the new checkpoint.
    pub async fn run(&self) -> Result<SyncOutcome, SyncError> {
        let Some(guard) = self.begin() else {
            tracing::info!("sync already running, skipping");
            return Ok(SyncOutcome::Skipped);
        };

        // ── Fetching ──
        let since = self.checkpoints.load().await?;
        let mut dead = match &self.dead_letters {
            Some(file) => file.load().await?,
            None => DeadLetterList::default(),
        };

        let mut pending = self.pending.load().await?;
        let marks_recovered = self.recover_marks(&mut pending, &mut dead).await;

        let batch = self.fetcher.fetch(since).await?;
        let mut records = batch.records;
        let mut dead_letters_retried = 0;

        if self.retry_dead_letters && !dead.is_empty() {
            let in_window: HashSet<i64> = records.iter().map(|r| r.id).collect();
            let outside: Vec<i64> = dead.ids().filter(|id| !in_window.contains(id)).collect();
            let retried = self.fetcher.fetch_by_ids(&outside).await?;

            let live: HashSet<i64> = in_window
                .iter()
                .copied()
                .chain(retried.iter().map(|r| r.id))
                .collect();
            let before = dead.len();
            dead.retain(|id| live.contains(&id));
            if dead.len() != before {
                tracing::info!(
                    dropped = before - dead.len(),
                    "dropped dead letters that are synced or gone"
                );
            }

            dead_letters_retried = retried.len();
            records.extend(retried);
        }

        self.snapshots.write_fetched(&records).await;
        let records_fetched = records.len();

        // A ticket already exists for these; submitting again would duplicate it
        records.retain(|r| {
            let listed = pending.contains(r.id);
            if listed {
                tracing::warn!(
                    record_id = r.id,
                    "ticket exists but request is unmarked, not resubmitting"
                );
            }
            !listed
        });

        // ── Publishing ──
        guard.enter(RunState::Publishing);
        let mut failures = Vec::new();
        let mut drafts = Vec::with_capacity(records.len());

        for record in records {
            let record_id = record.id;
            match self.transformer.transform(record) {
                Ok(draft) => drafts.push(draft),
                Err(e) => {
                    tracing::warn!(record_id, error = %e, "request skipped");
                    dead.record_failure(record_id, e.to_string(), 0, Utc::now());
                    failures.push(RecordFailure {
                        record_id,
                        stage: FailureStage::Transform,
                        error: e.to_string(),
                        attempts: 0,
                    });
                }
            }
        }

        self.snapshots.write_preprocessed(&drafts).await;

        let mut results = Vec::with_capacity(drafts.len());
        for draft in &drafts {
            let result = self.publisher.publish(draft).await;
            if result.is_success() {
                dead.resolve(result.record_id);
                if let (false, Some(key)) = (result.marked_synced, &result.external_ticket_id) {
                    pending.insert(result.record_id, key.clone());
                }
            } else {
                let error = result.last_error.clone().unwrap_or_default();
                dead.record_failure(result.record_id, &error, result.attempts_made, Utc::now());
                failures.push(RecordFailure {
                    record_id: result.record_id,
                    stage: FailureStage::Publish,
                    error,
                    attempts: result.attempts_made,
                });
            }
            results.push(result);
        }

        // ── Checkpointing ──
        guard.enter(RunState::Checkpointing);
        let marks_pending = pending.iter().count();
        self.pending.save(pending).await?;
        if let Some(file) = &self.dead_letters {
            file.save(&dead).await?;
        }

        // Advance past failed records too; they live on in the dead-letter list
        let new_checkpoint = match (since, batch.max_created_at) {
            (Some(prior), Some(max)) => Some(prior.max(max)),
            (prior, max) => prior.or(max),
        };
        if let Some(checkpoint) = new_checkpoint {
            self.checkpoints.save(checkpoint).await?;
        }

        let records_succeeded = results.iter().filter(|r| r.is_success()).count();
        let run = SyncRun {
            window_start: since,
            records_fetched,
            records_succeeded,
            records_failed: failures.len(),
            dead_letters_retried,
            marks_recovered,
            marks_pending,
            new_checkpoint,
            results,
            failures,
        };

        for failure in &run.failures {
            tracing::warn!(
                record_id = failure.record_id,
                stage = ?failure.stage,
                attempts = failure.attempts,
                error = %failure.error,
                "request not synced"
            );
        }
        tracing::info!(
            fetched = run.records_fetched,
            succeeded = run.records_succeeded,
            failed = run.records_failed,
            dead_letters = dead.len(),
            marks_pending = run.marks_pending,
            new_checkpoint = ?run.new_checkpoint,
            "sync run completed"
        );

        Ok(SyncOutcome::Completed(run))
    }

    /// Mark requests whose tickets were created in an earlier run. Returns how
    /// many were marked; entries that still fail stay listed.
    async fn recover_marks(&self, pending: &mut PendingMarks, dead: &mut DeadLetterList) -> usize {
        let marks: Vec<_> = pending.iter().cloned().collect();
        let mut recovered = 0;
        for mark in marks {
            match self.publisher.remark(mark.record_id, &mark.ticket_key).await {
                RemarkOutcome::Marked => {
                    recovered += 1;
                    pending.remove(mark.record_id);
                    dead.resolve(mark.record_id);
                }
                RemarkOutcome::Gone => {
                    pending.remove(mark.record_id);
                    dead.resolve(mark.record_id);
                }
                RemarkOutcome::Failed(_) => {}
            }
        }
        recovered
    }
}
