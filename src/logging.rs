//! Tracing setup for the wizard CLI.
//!
//! Events go to stderr, or to `<state>/logs/wizard-{datetime}.log` when
//! `logging.to_file` is set.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

pub struct LoggingHandle {
    /// Flushes the file writer on drop; hold it until exit
    pub _guard: Option<WorkerGuard>,

    pub log_file_path: Option<PathBuf>,
}

/// Log file name for a given UTC timestamp
pub fn log_file_name(timestamp: chrono::DateTime<chrono::Utc>) -> String {
    format!("wizard-{}.log", timestamp.format("%Y%m%dT%H%M%SZ"))
}

/// Effective filter directive: `--debug` wins over the configured level
pub fn effective_level(config: &Config, debug_override: bool) -> String {
    if debug_override {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    }
}

/// A non-empty `RUST_LOG` replaces the level directive entirely
fn filter_directive(level: String, rust_log: Option<String>) -> String {
    rust_log.filter(|d| !d.trim().is_empty()).unwrap_or(level)
}

/// Install the global subscriber. Keep the returned handle alive.
pub fn init_logging(config: &Config, debug_override: bool) -> Result<LoggingHandle> {
    let directive = filter_directive(
        effective_level(config, debug_override),
        std::env::var("RUST_LOG").ok(),
    );
    let filter = EnvFilter::try_new(&directive)
        .with_context(|| format!("Invalid log filter '{directive}'"))?;

    let (writer, guard, log_file_path) = if config.logging.to_file {
        let logs_dir = config.logs_path();
        std::fs::create_dir_all(&logs_dir)
            .with_context(|| format!("Failed to create {}", logs_dir.display()))?;

        let file_name = log_file_name(chrono::Utc::now());
        let path = logs_dir.join(&file_name);
        let (non_blocking, guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::never(&logs_dir, &file_name));
        (BoxMakeWriter::new(non_blocking), Some(guard), Some(path))
    } else {
        (BoxMakeWriter::new(std::io::stderr), None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(log_file_path.is_none())
                .with_writer(writer),
        )
        .try_init()
        .context("Logging was already initialized")?;

    Ok(LoggingHandle {
        _guard: guard,
        log_file_path,
    })
}
