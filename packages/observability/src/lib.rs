//! # Observability
//!
//! Logging initialization for the gallery workspace.
//!
//! Binaries call [`init_with_config`] once at startup and use the standard
//! `tracing` macros everywhere else. Library crates never install a
//! subscriber themselves.
//!
//! Two sinks are supported:
//!
//! - compact human-readable output on stderr,
//! - structured JSONL appended to a log file (one object per line with
//!   `timestamp`, `level`, `service`, `pid`, `target`, `message`, `fields`).
//!
//! `RUST_LOG` always wins over the configured default level.
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "gallery".into(),
//!     default_level: "debug".into(),
//!     also_stderr: true,
//!     ..Default::default()
//! });
//! tracing::info!("ready");
//! ```

mod file;
mod json_layer;

use std::path::PathBuf;

pub use file::{default_log_path, CentralLogWriter};
pub use json_layer::LogEntry;

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service (e.g., "gallery", "gallery-watch").
    /// Included in every JSONL line for filtering.
    pub service_name: String,

    /// Default log level filter (e.g., "debug", "info", "warn").
    /// Can be overridden by `RUST_LOG` environment variable.
    pub default_level: String,

    /// JSONL log file. When `None`, logs only go to stderr.
    pub log_path: Option<PathBuf>,

    /// Also emit compact logs to stderr when a log file is configured.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Initialize logging with default settings and stderr output only.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize logging with custom configuration.
///
/// If the log file cannot be opened, logging falls back to stderr and a
/// warning is emitted once the subscriber is installed.
pub fn init_with_config(config: LogConfig) {
    if let Some(log_path) = config.log_path.clone() {
        if let Err(err) = file::init_file_subscriber(&config, &log_path) {
            init_stderr(&config.default_level);
            tracing::warn!(
                log_path = %log_path.display(),
                error = %err,
                "failed to open log file, logging to stderr only"
            );
        }
        return;
    }

    init_stderr(&config.default_level);
}

fn env_filter(default_level: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level))
}

fn init_stderr(default_level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_level))
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact()
        .try_init();
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;
