//! Authentication for the gallery client.
//!
//! This crate provides:
//! - Token endpoints behind the [`AuthApi`] trait, with an HTTP implementation
//! - Unsigned JWT expiry inspection
//! - Session management with proactive, single-flight token refresh
//! - Explicit FSM-based session state

mod api;
mod auth_fsm;
mod error;
mod session;
mod timer;
pub mod token;

pub use api::{AuthApi, HttpAuthApi, RefreshedTokens, TokenGrant, UserInfo};
pub use auth_fsm::session_machine;
pub use auth_fsm::{
    RefreshConfig, SessionMachine, SessionMachineInput, SessionMachineState, SessionState,
};
pub use error::{AuthError, AuthResult};
pub use session::{
    AccessTokenHandle, Identity, LoginCredential, SessionConfig, SessionEvent, SessionManager,
    SessionSnapshot,
};
pub use timer::RefreshTimer;
pub use token::TokenError;
