use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the tracing subscriber with env-based filtering.
///
/// Reads `RUST_LOG` (or `LOG_LEVEL`) to set the filter and defaults to
/// `default_level` if neither is set. When `LOG_FILE_JIRA` names a file, a
/// second plain-text layer appends to it; keep the returned guard alive for
/// as long as the process logs, otherwise buffered lines are lost.
pub fn init_tracing(default_level: &str) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_env("RUST_LOG")
        .or_else(|_| EnvFilter::try_from_env("LOG_LEVEL"))
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let log_file = std::env::var("LOG_FILE_JIRA")
        .ok()
        .filter(|v| !v.trim().is_empty());

    let Some(log_file) = log_file else {
        fmt().with_env_filter(filter).with_target(true).init();
        return None;
    };

    let path = Path::new(&log_file);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "formsync.log".into());

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(
        dir, file_name,
    ));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .with(
            fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_writer(writer),
        )
        .init();

    Some(guard)
}
