use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{AppError, Result};

/// Default file for `--log`
pub const DEFAULT_LOG_FILE: &str = "nethelp.log";

pub fn level_from_flags(verbose: bool) -> tracing::Level {
    if verbose {
        tracing::Level::TRACE
    } else {
        tracing::Level::WARN
    }
}

fn build_filter(level: tracing::Level) -> EnvFilter {
    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::new(directives),
        _ => EnvFilter::new(format!("warn,nethelp={}", level)),
    }
}

/// Install the global subscriber. Records go to stderr, or are appended
/// without colour to `log_file` when one is given.
pub fn init(level: tracing::Level, log_file: Option<&Path>) -> Result<()> {
    let filter = build_filter(level);
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_target(false)
                        .with_writer(Mutex::new(file)),
                )
                .try_init()
        }
        None => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };

    installed.map_err(|e| AppError::Config(format!("Failed to initialize logging: {}", e)))
}
