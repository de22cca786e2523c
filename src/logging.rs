use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const LOG_FILE_PREFIX: &str = "elegoo_watcher.log";
const DEFAULT_FILTER: &str = "elegoo_watcher=debug,info";

/// Logs to stderr and to a daily file in `log_dir`.
///
/// The returned guard flushes the file writer on drop, keep it alive for the
/// life of the program.
pub fn init_logs(log_dir: &Path, keep: usize) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log dir {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_line_number(true);

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_line_number(true);

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer);

    tracing_log::LogTracer::init().context("failed to bridge log records")?;
    tracing::subscriber::set_global_default(subscriber).context("failed to set subscriber")?;

    match prune_logs(log_dir, keep) {
        Ok(removed) if !removed.is_empty() => debug!("removed {} old log files", removed.len()),
        Ok(_) => {}
        Err(e) => warn!("failed to clean up old logs: {:?}", e),
    }

    Ok(guard)
}

/// Deletes all but the newest `keep` rolled log files in `log_dir`.
///
/// Rolled files are named `<prefix>.YYYY-MM-DD`, so name order is date order.
pub fn prune_logs(log_dir: &Path, keep: usize) -> Result<Vec<PathBuf>> {
    let mut logs = vec![];
    for entry in std::fs::read_dir(log_dir).context("failed to read log dir")? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name.starts_with(LOG_FILE_PREFIX) && entry.file_type()?.is_file() {
            logs.push(entry.path());
        }
    }

    logs.sort();
    let excess = logs.len().saturating_sub(keep);

    let mut removed = vec![];
    for path in logs.into_iter().take(excess) {
        std::fs::remove_file(&path).with_context(|| format!("failed to remove {}", path.display()))?;
        removed.push(path);
    }
    Ok(removed)
}
