//! Structured logging: compact human output on stderr, JSON lines on disk.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

pub const LOG_FILE_PREFIX: &str = "conductor.log";

/// Filter from `RUST_LOG`, else `info` (`debug` when verbose).
pub fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "conductor=debug,info" } else { "info" })
    })
}

/// Install the global subscriber.
///
/// With `log_dir` set, a daily-rolling JSON file layer is added; keep the returned
/// guard alive for as long as logs should be flushed. A subscriber that is already
/// installed is left in place.
pub fn init(verbose: bool, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let stderr = fmt::layer()
        .compact()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(env_filter(verbose));

    let (file, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_current_span(false)
                .with_writer(writer)
                .with_filter(env_filter(verbose));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    if tracing_subscriber::registry()
        .with(stderr)
        .with(file)
        .try_init()
        .is_err()
    {
        tracing::debug!("Global tracing subscriber already installed");
    }
    Ok(guard)
}
