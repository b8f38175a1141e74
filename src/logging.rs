//! Tracing setup: stderr plus one log file per session.

use std::io;
use std::path::Path;

use chrono::Local;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_PREFIX: &str = "harness_";
const LOG_SUFFIX: &str = ".log";

/// Install the global subscriber.
///
/// Logs go to stderr and to `<log_dir>/harness_<timestamp>.log`. Older
/// session logs beyond `max_log_files` are deleted. `RUST_LOG` overrides
/// the configured level. Keep the returned guard alive until exit or the
/// file output is lost.
pub fn init(log_dir: &Path, config: &LoggingConfig) -> io::Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;
    let filename = format!(
        "{LOG_PREFIX}{}{LOG_SUFFIX}",
        Local::now().format("%Y%m%d_%H%M%S")
    );
    let appender = tracing_appender::rolling::never(log_dir, &filename);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .try_init();
    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }

    let removed = prune_logs(log_dir, config.max_log_files)?;
    tracing::debug!(dir = %log_dir.display(), removed, "Session log ready: {}", filename);
    Ok(guard)
}

/// Delete the oldest session logs so at most `keep` remain.
pub fn prune_logs(log_dir: &Path, keep: usize) -> io::Result<usize> {
    let mut logs: Vec<_> = std::fs::read_dir(log_dir)?
        .filter_map(|e| e.ok())
        .filter(|e| {
            let name = e.file_name();
            let name = name.to_string_lossy();
            name.starts_with(LOG_PREFIX) && name.ends_with(LOG_SUFFIX)
        })
        .map(|e| e.path())
        .collect();
    if logs.len() <= keep {
        return Ok(0);
    }

    // Timestamped names sort oldest first.
    logs.sort();
    let excess = logs.len() - keep;
    let mut removed = 0;
    for path in logs.into_iter().take(excess) {
        match std::fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove old log"),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prunes_oldest_session_logs() {
        let dir = tempfile::tempdir().unwrap();
        for stamp in ["20260101_000000", "20260102_000000", "20260103_000000"] {
            std::fs::write(dir.path().join(format!("harness_{stamp}.log")), "").unwrap();
        }
        std::fs::write(dir.path().join("monitor_101010.log"), "").unwrap();

        assert_eq!(prune_logs(dir.path(), 2).unwrap(), 1);
        assert!(!dir.path().join("harness_20260101_000000.log").exists());
        assert!(dir.path().join("harness_20260103_000000.log").exists());
        assert!(dir.path().join("monitor_101010.log").exists());
    }

    #[test]
    fn nothing_to_prune_under_limit() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("harness_20260101_000000.log"), "").unwrap();
        assert_eq!(prune_logs(dir.path(), 5).unwrap(), 0);
    }
}
