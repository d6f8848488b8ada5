//! File + stdout logging setup (SPEC_FULL.md §1 Logging), the same shape
//! as the teacher's `streamlib-runtime::setup_file_logging` minus the
//! non-blocking file appender, which that crate pulls in via
//! `tracing-appender` — a dependency this workspace doesn't otherwise
//! need, so log files here are written with a plain blocking writer.

use std::fs::OpenOptions;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_subscriber::prelude::*;

pub fn init(log_dir: Option<PathBuf>, verbose: bool) -> Result<()> {
    let dir = log_dir.unwrap_or_else(std::env::temp_dir);
    std::fs::create_dir_all(&dir).context("failed to create log directory")?;
    let log_path = dir.join(format!("patchbayd-{}.log", std::process::id()));

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open log file {}", log_path.display()))?;

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_level.parse().unwrap());

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file)
        .with_ansi(false);
    let stdout_layer = tracing_subscriber::fmt::layer();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    tracing::info!(log_path = %log_path.display(), "logging initialized");
    Ok(())
}
