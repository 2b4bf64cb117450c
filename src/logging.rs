//! Logging setup for feedvault.
//!
//! Output goes to stdout and, when configured, an append-only log file.
//! `RUST_LOG` takes precedence over the configured level.

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::{Result, VaultError};

/// Dependencies that are chatty at debug level.
const QUIET_TARGETS: &[&str] = &["sqlx=warn", "hyper=warn", "reqwest=warn", "rustls=warn"];

/// Map a configured level name to a tracing level. Unknown names mean info.
fn parse_level(level: &str) -> Level {
    level.trim().parse().unwrap_or(match level.trim() {
        l if l.eq_ignore_ascii_case("warning") => Level::WARN,
        _ => Level::INFO,
    })
}

/// Build the filter: `RUST_LOG` if set, else the level plus quiet dependencies.
fn build_filter(level: &str) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    QUIET_TARGETS.iter().fold(
        EnvFilter::default().add_directive(parse_level(level).into()),
        |filter, target| match target.parse() {
            Ok(directive) => filter.add_directive(directive),
            Err(_) => filter,
        },
    )
}

/// Install the global subscriber writing to stdout and the log file.
///
/// Fails if the file cannot be opened or a subscriber is already set.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let path = Path::new(&config.file);
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;

    tracing_subscriber::registry()
        .with(build_filter(&config.level))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout.and(Arc::new(file)))
                .with_ansi(false)
                .with_target(true),
        )
        .try_init()
        .map_err(|e| VaultError::Config(format!("logging already initialized: {e}")))
}

/// Install a stdout-only subscriber; a no-op if one is already set.
pub fn init_console_only(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(build_filter(level))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init();
}
