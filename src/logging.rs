//! Tracing setup: compact console output plus a daily-rolling file under
//! the configured log directory. Filtering follows `RUST_LOG`, defaulting
//! to `info`.

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Keeps the non-blocking file writer alive; dropping it loses buffered
/// log lines, so the caller holds it for the process lifetime.
pub struct LogGuard {
    _file: WorkerGuard,
}

pub fn init(log_dir: &str) -> anyhow::Result<LogGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory {log_dir}"))?;

    let appender = tracing_appender::rolling::daily(log_dir, "codepod.log");
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .with(
            fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(true),
        )
        .init();

    Ok(LogGuard { _file: guard })
}
