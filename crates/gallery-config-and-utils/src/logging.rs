//! Logging initialization for gallery binaries.
//!
//! Thin wrapper over the `observability` crate so every binary configures
//! the same sinks.

use crate::Paths;
use observability::LogConfig;

/// Initialize logging for a binary.
///
/// Logs go to the JSONL file under `paths` and, when `also_stderr` is set,
/// to stderr as well. `RUST_LOG` overrides `level`.
pub fn init_logging(service_name: &str, level: &str, paths: Option<&Paths>, also_stderr: bool) {
    observability::init_with_config(LogConfig {
        service_name: service_name.into(),
        default_level: level.into(),
        log_path: paths.map(Paths::log_file),
        also_stderr,
    });
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
