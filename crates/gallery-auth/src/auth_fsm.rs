//! Session state machine using rust-fsm.
//!
//! ## State Diagram
//!
//! ```text
//!                    ┌───────────────────┐
//!          ┌────────►│  Unauthenticated  │ (initial) ◄──────────────┐
//!          │         └─────────┬─────────┘                          │
//!          │                   │ StoredTokenFound                   │
//!          │                   ▼                                    │
//!          │ VerifyFailed ┌─────────────┐                           │
//!          │ RefreshFailed│  Verifying  │                           │
//!          └──────────────┴──────┬──────┘                           │
//!                                │ VerifySucceeded / RefreshSucceeded
//!                                ▼                                  │
//!   LoginSucceeded ──►  ┌─────────────────┐                         │
//!                       │  Authenticated  │                         │
//!                       └────────┬────────┘                         │
//!                                │ RefreshArmed                     │
//!                                ▼                                  │
//!                       ┌──────────────────┐ RefreshSucceeded       │
//!                       │ RefreshScheduled │◄──────┐ RefreshArmed   │
//!                       └────────┬─────────┴───────┘                │
//!                                │ RefreshFailed                    │
//!                                ▼                                  │
//!                       ┌──────────────────┐  ExpiryAcknowledged    │
//!                       │ SessionExpiring  │────────────────────────┘
//!                       └──────────────────┘
//! ```
//!
//! `LogoutRequested` leads to `Unauthenticated` from every state, and
//! `LoginSucceeded` leads to `Authenticated` from every state.

use rust_fsm::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub session_machine(Unauthenticated)

    Unauthenticated => {
        StoredTokenFound => Verifying,
        LoginSucceeded => Authenticated,
        LogoutRequested => Unauthenticated
    },
    Verifying => {
        VerifySucceeded => Authenticated,
        VerifyFailed => Unauthenticated,
        // Stored access token was already expired; refreshed instead of verified
        RefreshSucceeded => Authenticated,
        RefreshFailed => Unauthenticated,
        LoginSucceeded => Authenticated,
        LogoutRequested => Unauthenticated
    },
    Authenticated => {
        RefreshArmed => RefreshScheduled,
        RefreshSucceeded => Authenticated,
        RefreshFailed => SessionExpiring,
        LoginSucceeded => Authenticated,
        LogoutRequested => Unauthenticated
    },
    RefreshScheduled => {
        RefreshArmed => RefreshScheduled,
        RefreshSucceeded => RefreshScheduled,
        RefreshFailed => SessionExpiring,
        LoginSucceeded => Authenticated,
        LogoutRequested => Unauthenticated
    },
    SessionExpiring => {
        ExpiryAcknowledged => Unauthenticated,
        LoginSucceeded => Authenticated,
        LogoutRequested => Unauthenticated
    }
}

pub use session_machine::Input as SessionMachineInput;
pub use session_machine::State as SessionMachineState;
pub use session_machine::StateMachine as SessionMachine;

/// Session state for external consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No usable credentials.
    Unauthenticated,
    /// Checking stored credentials with the server.
    Verifying,
    /// Credentials accepted, no refresh armed yet.
    Authenticated,
    /// Credentials accepted and a refresh timer is pending.
    RefreshScheduled,
    /// Refresh failed; credentials are being discarded.
    SessionExpiring,
}

impl SessionState {
    /// Returns true when requests can be made with the stored access token.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated | SessionState::RefreshScheduled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Unauthenticated => "unauthenticated",
            SessionState::Verifying => "verifying",
            SessionState::Authenticated => "authenticated",
            SessionState::RefreshScheduled => "refresh_scheduled",
            SessionState::SessionExpiring => "session_expiring",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&SessionMachineState> for SessionState {
    fn from(state: &SessionMachineState) -> Self {
        match state {
            SessionMachineState::Unauthenticated => SessionState::Unauthenticated,
            SessionMachineState::Verifying => SessionState::Verifying,
            SessionMachineState::Authenticated => SessionState::Authenticated,
            SessionMachineState::RefreshScheduled => SessionState::RefreshScheduled,
            SessionMachineState::SessionExpiring => SessionState::SessionExpiring,
        }
    }
}

/// Configuration for retry behavior during token refresh.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Maximum number of attempts.
    pub max_retries: u32,
    /// Initial delay between retries in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 5000,
        }
    }
}

impl RefreshConfig {
    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_ms = self
            .initial_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        let capped_ms = delay_ms.min(self.max_delay_ms);
        Duration::from_millis(capped_ms)
    }
}
