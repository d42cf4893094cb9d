//! Configuration, paths, and logging setup shared by the gallery crates.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, DEFAULT_API_URL, DEFAULT_LOG_LEVEL, DEFAULT_REFRESH_MAX_RETRIES,
    DEFAULT_REFRESH_SKEW_SECS, DEFAULT_REQUEST_TIMEOUT_SECS,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level};
pub use paths::Paths;
