//! Tracing setup for the host and for script output.
//!
//! Host events use the usual per-module targets. Text printed by scripts is
//! logged under [`SCRIPT_TARGET`] with its own level, so script output can be
//! turned down without hiding host diagnostics.

use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::{Result, ScriptHostError};

/// Target of log events carrying script output.
pub const SCRIPT_TARGET: &str = "script";

/// Parse a level name (case-insensitive).
pub fn parse_level(level: &str) -> Option<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

fn level_or_info(name: &str) -> Level {
    parse_level(name).unwrap_or(Level::INFO)
}

/// `RUST_LOG` plus the configured host level and script level.
fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let script_level = level_or_info(&config.script_level);
    let script: Directive = format!(
        "{}={}",
        SCRIPT_TARGET,
        script_level.as_str().to_lowercase()
    )
    .parse()
    .map_err(|e| ScriptHostError::Config(format!("invalid script log directive: {e}")))?;

    Ok(EnvFilter::from_default_env()
        .add_directive(level_or_info(&config.level).into())
        .add_directive(script))
}

/// Log to stdout and to the configured file.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(config)?;

    if let Some(parent) = Path::new(&config.file).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let log_file = Arc::new(File::create(&config.file)?);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout.and(log_file))
                .with_ansi(false)
                .with_target(true),
        )
        .with(filter)
        .try_init()
        .map_err(|e| ScriptHostError::Config(format!("logging already initialized: {e}")))
}

/// Log to stdout only. Used when the log file can't be opened.
pub fn init_console_only(config: &LoggingConfig) {
    let filter = build_filter(config).unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_target(true),
        )
        .with(filter)
        .try_init();
}
