//! CLI command implementations.

mod api;
mod auth;
mod session;

pub use api::get;
pub use auth::{login, login_google, logout};
pub use session::{status, watch};

use anyhow::{Context, Result};
use gallery_auth::{HttpAuthApi, RefreshConfig, SessionConfig, SessionManager};
use gallery_config_and_utils::{Config, Paths};
use gallery_storage::open_credential_store;
use gallery_transport::ApiTransport;
use std::sync::Arc;
use tracing::debug;

/// Everything a command needs: configuration and the session manager.
pub struct AppContext {
    pub config: Config,
    pub session: SessionManager,
}

impl AppContext {
    pub fn new(paths: &Paths, config: Config) -> Result<Self> {
        paths.ensure_dirs()?;

        let credentials_file = paths.credentials_file();
        let store = open_credential_store(&credentials_file).with_context(|| {
            format!("Failed to open credentials at {}", credentials_file.display())
        })?;

        let api = HttpAuthApi::new(config.api_url()?, config.request_timeout())?;
        let session_config = SessionConfig {
            refresh_skew: config.refresh_skew(),
            request_timeout: config.request_timeout(),
            refresh: RefreshConfig {
                max_retries: config.refresh_max_retries,
                ..RefreshConfig::default()
            },
        };
        debug!(api_url = %config.api_url, "Session context ready");

        let session = SessionManager::with_config(Arc::new(api), Arc::new(store), session_config);
        Ok(Self { config, session })
    }

    /// Authenticated transport sharing this context's session.
    pub fn transport(&self) -> Result<ApiTransport> {
        Ok(ApiTransport::new(
            self.config.api_url()?,
            self.session.clone(),
            self.config.request_timeout(),
        )?)
    }
}
