mod checkpoint;
mod dead_letter;
mod export;
mod fetcher;
mod jira;
mod orchestrator;
mod pending_marks;
mod publisher;
mod storage;
mod transform;

use std::process::ExitCode;
use std::time::Duration;

use formsync_config::{init_tracing, AppConfig};
use formsync_db::requests::pg_repository::{PgSupportRequestRepository, SourceTable};
use formsync_db::requests::repositories::SupportRequestRepository;
use tokio::sync::watch;

use crate::checkpoint::{CheckpointStore, FileCheckpointStore};
use crate::dead_letter::DeadLetterFile;
use crate::export::SnapshotWriter;
use crate::jira::client::{JiraClient, JiraClientConfig};
use crate::orchestrator::{SyncOrchestrator, SyncOutcome};
use crate::pending_marks::PendingMarkFile;
use crate::publisher::{IssueTracker, RetryPolicy};
use crate::transform::RecordTransformer;

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let _log_guard = init_tracing("info");

    tracing::info!(service = "formsync-sync", "starting");

    let config = AppConfig::from_env().expect("invalid configuration");
    let jira_config = JiraClientConfig::from_env().expect("jira configuration error (fail-fast)");
    tracing::info!(
        table = %config.source_table,
        checkpoint = %config.checkpoint_path.display(),
        granularity = ?config.checkpoint_granularity,
        project = %jira_config.project_key,
        max_attempts = config.max_attempts,
        backoff_base_secs = config.backoff_base_secs,
        "configuration loaded"
    );

    let table = SourceTable::parse(&config.source_table).expect("invalid DB_TABLE_NAME");
    let pool = formsync_db::create_pool(&config.database_url)
        .await
        .expect("failed to connect to database");
    let repo = PgSupportRequestRepository::new(pool, table);
    repo.ensure_sync_marker()
        .await
        .expect("failed to prepare sync marker column");

    let transformer = RecordTransformer::new(jira_config.default_priority);
    let client = JiraClient::new(jira_config).expect("failed to create jira client");
    tracing::info!(base_url = %client.config().base_url, "jira client ready");
    let checkpoints =
        FileCheckpointStore::new(&config.checkpoint_path, config.checkpoint_granularity);
    let policy = RetryPolicy::new(
        config.max_attempts,
        Duration::from_secs(config.backoff_base_secs),
    );

    let snapshots = SnapshotWriter::new(
        config.fetch_csv_path.clone(),
        config.initial_csv_path.clone(),
        config.preprocessed_csv_path.clone(),
    );
    if snapshots.is_enabled() {
        tracing::info!("csv snapshots enabled");
    }

    let mut orchestrator = SyncOrchestrator::new(checkpoints, repo, transformer, client, policy)
        .with_pending_marks(PendingMarkFile::new(&config.pending_marks_path))
        .with_snapshots(snapshots);
    if let Some(path) = &config.dead_letter_path {
        orchestrator =
            orchestrator.with_dead_letters(DeadLetterFile::new(path), config.retry_dead_letters);
    }

    match config.run_interval_secs {
        None => run_once(&orchestrator).await,
        Some(secs) => {
            run_every(&orchestrator, Duration::from_secs(secs)).await;
            ExitCode::SUCCESS
        }
    }
}

async fn run_once<C, R, T>(orchestrator: &SyncOrchestrator<C, R, T>) -> ExitCode
where
    C: CheckpointStore,
    R: SupportRequestRepository + Clone,
    T: IssueTracker,
{
    match orchestrator.run().await {
        Ok(SyncOutcome::Completed(run)) => {
            tracing::info!(summary = %run, "sync finished");
            ExitCode::SUCCESS
        }
        Ok(SyncOutcome::Skipped) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "sync run aborted");
            ExitCode::FAILURE
        }
    }
}

/// Run on a fixed interval until Ctrl-C. A run in progress is allowed to
/// finish before the loop exits.
async fn run_every<C, R, T>(orchestrator: &SyncOrchestrator<C, R, T>, period: Duration)
where
    C: CheckpointStore,
    R: SupportRequestRepository + Clone,
    T: IssueTracker,
{
    let (stop_tx, mut stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested, stopping after the current run");
            let _ = stop_tx.send(true);
        }
    });

    tracing::info!(interval_secs = period.as_secs(), "running on interval");
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            Ok(()) = stop_rx.changed() => break,
        }

        run_once(orchestrator).await;

        if *stop_rx.borrow() {
            break;
        }
    }

    tracing::info!("sync loop stopped");
}
