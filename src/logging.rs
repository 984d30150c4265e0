// ABOUTME: Installs the tracing subscriber: console output plus an appended plain-text log file
// ABOUTME: The returned guard flushes the non-blocking file writer and must live for the process

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when RUST_LOG is unset
pub const DEFAULT_FILTER: &str = "info";

/// Log to the console and append to `log_file` (never rotated).
pub fn init(log_file: &Path) -> Result<WorkerGuard> {
    let directory = match log_file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file_name = log_file
        .file_name()
        .with_context(|| format!("log file path has no file name: {}", log_file.display()))?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name.to_string_lossy())
        .build(directory)
        .with_context(|| format!("cannot open log file {}", log_file.display()))?;
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into()))
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .try_init()
        .context("tracing subscriber already installed")?;

    Ok(guard)
}
