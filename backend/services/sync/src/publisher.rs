use std::time::Duration;

use async_trait::async_trait;
use formsync_common::error::FormsyncError;
use formsync_db::requests::repositories::SupportRequestRepository;
use serde::Serialize;

use crate::transform::TicketDraft;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    /// Network failure, 5xx or rate limiting. Worth another attempt.
    #[error("transient publish error: {reason}")]
    Transient {
        reason: String,
        retry_after: Option<Duration>,
    },

    /// Rejected outright (auth, validation). Retrying cannot help.
    #[error("fatal publish error: {0}")]
    Fatal(String),
}

/// Identifier of a ticket created in the remote tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedTicket {
    pub key: String,
}

/// Remote ticket creation; one call creates at most one ticket.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    async fn create_ticket(&self, draft: &TicketDraft) -> Result<CreatedTicket, PublishError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_base: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base,
        }
    }

    /// Linear, uncapped: `base * attempt`.
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        self.backoff_base * attempt
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Success,
    Failed,
}

/// Outcome of publishing one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TicketResult {
    pub record_id: i64,
    pub status: TicketStatus,
    pub external_ticket_id: Option<String>,
    pub attempts_made: u32,
    pub last_error: Option<String>,
    /// `false` on success means the ticket exists but the source row was not
    /// marked, so a later run could submit it again.
    pub marked_synced: bool,
}

impl TicketResult {
    pub fn is_success(&self) -> bool {
        self.status == TicketStatus::Success
    }
}

/// Result of marking a request whose ticket was created in an earlier run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemarkOutcome {
    Marked,
    /// Already synced or deleted; nothing left to mark.
    Gone,
    Failed(String),
}

pub struct TicketPublisher<T, R> {
    tracker: T,
    repo: R,
    policy: RetryPolicy,
}

impl<T, R> TicketPublisher<T, R>
where
    T: IssueTracker,
    R: SupportRequestRepository,
{
    pub fn new(tracker: T, repo: R, policy: RetryPolicy) -> Self {
        Self {
            tracker,
            repo,
            policy,
        }
    }

    /// Create a ticket for `draft`, retrying transient failures, then mark
    /// the source record as synced.
    pub async fn publish(&self, draft: &TicketDraft) -> TicketResult {
        let record_id = draft.record_id();
        let max_attempts = self.policy.max_attempts;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.tracker.create_ticket(draft).await {
                Ok(ticket) => {
                    tracing::info!(record_id, ticket = %ticket.key, attempt, "created ticket");
                    return self.mark_synced(record_id, ticket, attempt).await;
                }
                Err(PublishError::Fatal(reason)) => {
                    tracing::error!(
                        record_id,
                        attempt,
                        error = %reason,
                        "ticket creation rejected, not retrying"
                    );
                    return failed(record_id, attempt, reason);
                }
                Err(PublishError::Transient {
                    reason,
                    retry_after,
                }) => {
                    tracing::warn!(
                        record_id,
                        attempt,
                        max_attempts,
                        error = %reason,
                        "ticket creation failed"
                    );
                    last_error = reason;

                    if attempt < max_attempts {
                        let backoff = self.policy.backoff_after(attempt);
                        let wait = retry_after.map_or(backoff, |ra| ra.max(backoff));
                        tracing::info!(
                            record_id,
                            wait_secs = wait.as_secs_f64(),
                            "retrying after backoff"
                        );
                        tokio::time::sleep(wait).await;
                    }
                }
            }
        }

        tracing::error!(record_id, max_attempts, "all attempts failed");
        failed(record_id, max_attempts, last_error)
    }

    /// Mark `record_id` with an existing ticket. Never calls the tracker.
    pub async fn remark(&self, record_id: i64, ticket_key: &str) -> RemarkOutcome {
        match self.repo.mark_synced(record_id, ticket_key).await {
            Ok(()) => {
                tracing::info!(record_id, ticket = ticket_key, "marked pending request synced");
                RemarkOutcome::Marked
            }
            Err(FormsyncError::NotFound(reason)) => {
                tracing::warn!(
                    record_id,
                    ticket = ticket_key,
                    %reason,
                    "pending mark no longer applies"
                );
                RemarkOutcome::Gone
            }
            Err(e) => {
                tracing::warn!(
                    record_id,
                    ticket = ticket_key,
                    error = %e,
                    "request still cannot be marked synced"
                );
                RemarkOutcome::Failed(e.to_string())
            }
        }
    }

    async fn mark_synced(
        &self,
        record_id: i64,
        ticket: CreatedTicket,
        attempts: u32,
    ) -> TicketResult {
        let marked = self.repo.mark_synced(record_id, &ticket.key).await;
        let (marked_synced, last_error) = match marked {
            Ok(()) => (true, None),
            Err(e) => {
                tracing::error!(
                    record_id,
                    ticket = %ticket.key,
                    error = %e,
                    "ticket created but request not marked synced"
                );
                (false, Some(format!("mark synced failed: {e}")))
            }
        };

        TicketResult {
            record_id,
            status: TicketStatus::Success,
            external_ticket_id: Some(ticket.key),
            attempts_made: attempts,
            last_error,
            marked_synced,
        }
    }
}

fn failed(record_id: i64, attempts: u32, error: String) -> TicketResult {
    TicketResult {
        record_id,
        status: TicketStatus::Failed,
        external_ticket_id: None,
        attempts_made: attempts,
        last_error: Some(error),
        marked_synced: false,
    }
}
