//! Tracing subscriber setup.
//!
//! Human-readable or JSON lines on stderr, plus an optional daily rolling
//! file. `RUST_LOG` overrides the configured level.

use crate::config::LogConfig;
use anyhow::{Context, Result};
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static INITIALIZED: OnceLock<()> = OnceLock::new();

const LOG_FILE_PREFIX: &str = "sayonara.log";

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Later calls are no-ops.
///
/// The returned guard must be held for the lifetime of the process when a
/// log directory is configured, or buffered file lines are lost on exit.
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    if INITIALIZED.get().is_some() {
        return Ok(None);
    }

    let (file_layer, guard) = match &config.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_target(true)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let json_layer = config.json.then(|| {
        fmt::layer()
            .json()
            .with_target(true)
            .with_writer(std::io::stderr)
    });
    let text_layer = (!config.json).then(|| {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(build_filter(&config.level))
        .with(json_layer)
        .with(text_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    let _ = INITIALIZED.set(());
    Ok(guard)
}
