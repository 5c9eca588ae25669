//! Tracing setup for the Flow indexer binary.
//!
//! Wraps `tracing-subscriber` the way the binary wants it: `RUST_LOG`
//! controlled filtering with a sane default, stdout output, and an optional
//! non-blocking rolling file appender.

use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initializes stdout tracing. `default_directive` applies when `RUST_LOG`
/// is unset (e.g. `"info,flowidx=debug"`).
pub fn init(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(true).with_filter(filter))
        .init();
}

/// Initializes stdout tracing plus a daily-rolling file appender in
/// `directory`. Returns the guard that flushes the file writer; the caller
/// keeps it alive for the process lifetime.
pub fn init_with_file(
    default_directive: &str,
    directory: &Path,
    file_name: &str,
) -> tracing_appender::non_blocking::WorkerGuard {
    let appender = tracing_appender::rolling::daily(directory, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let stdout_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let file_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(true).with_filter(stdout_filter))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(file_filter),
        )
        .init();
    guard
}
