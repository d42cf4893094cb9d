//! Session lifecycle management.
//!
//! [`SessionManager`] is the single writer of credentials and session
//! state. It:
//!
//! - restores a stored session at startup (verify, or refresh when the
//!   stored access token has already expired),
//! - logs in with a password or an OAuth token,
//! - keeps exactly one refresh timer armed `refresh_skew` before the access
//!   token expires,
//! - runs at most one refresh call at a time; every trigger (timer, 401,
//!   explicit call) awaits the same in-flight result,
//! - on refresh failure clears credentials and broadcasts
//!   [`SessionEvent::Expired`] once.
//!
//! State transitions go through the explicit FSM in [`crate::auth_fsm`].

use crate::api::{AuthApi, RefreshedTokens, TokenGrant};
use crate::auth_fsm::{RefreshConfig, SessionMachine, SessionMachineInput, SessionState};
use crate::timer::RefreshTimer;
use crate::token;
use crate::{AuthError, AuthResult};
use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use gallery_storage::{CredentialStore, StoredCredentials};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Timing and retry settings for a [`SessionManager`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Refresh this long before the access token expires.
    pub refresh_skew: Duration,
    /// Upper bound for each verify, refresh and login call.
    pub request_timeout: Duration,
    /// Retry policy for transient refresh failures.
    pub refresh: RefreshConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_skew: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
            refresh: RefreshConfig::default(),
        }
    }
}

/// What the user supplies to log in.
#[derive(Clone)]
pub enum LoginCredential {
    Password { identifier: String, password: String },
    OAuth { access_token: String },
}

impl LoginCredential {
    pub fn password(identifier: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Password {
            identifier: identifier.into(),
            password: password.into(),
        }
    }

    pub fn oauth(access_token: impl Into<String>) -> Self {
        Self::OAuth {
            access_token: access_token.into(),
        }
    }
}

impl fmt::Debug for LoginCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password { identifier, .. } => f
                .debug_struct("Password")
                .field("identifier", identifier)
                .finish_non_exhaustive(),
            Self::OAuth { .. } => f.debug_struct("OAuth").finish_non_exhaustive(),
        }
    }
}

/// Display identity of the logged-in principal. Informational only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub username: String,
}

impl Identity {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.username)
    }
}

/// Broadcast to every [`SessionManager::subscribe`] receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged { from: SessionState, to: SessionState },
    /// The session could not be kept alive and credentials were cleared.
    Expired,
}

/// Point-in-time view of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub authenticated: bool,
    pub username: Option<String>,
    pub state: SessionState,
    pub access_expires_at: Option<DateTime<Utc>>,
}

/// Read-only accessor for the current access token. Always reflects the
/// latest save, rotation or clear.
#[derive(Clone)]
pub struct AccessTokenHandle {
    store: Arc<CredentialStore>,
}

impl AccessTokenHandle {
    pub fn current(&self) -> Option<String> {
        self.store.access_token()
    }
}

impl fmt::Debug for AccessTokenHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessTokenHandle")
            .field("present", &self.store.access_token().is_some())
            .finish()
    }
}

type RefreshOutcome = Result<String, Arc<AuthError>>;
type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

struct InFlightRefresh {
    id: u64,
    epoch: u64,
    /// Set once any trigger other than startup restore joins.
    announce_expiry: Arc<AtomicBool>,
    future: SharedRefresh,
}

struct SessionInner {
    api: Arc<dyn AuthApi>,
    store: Arc<CredentialStore>,
    config: SessionConfig,
    fsm: Mutex<SessionMachine>,
    identity: RwLock<Option<Identity>>,
    /// Bumped on login and logout. Held while credentials are written so a
    /// refresh started under an older session can never write them.
    epoch: Mutex<u64>,
    /// Bumped when a refresh commits or expires. Only written under `epoch`.
    settled: AtomicU64,
    in_flight: Mutex<Option<InFlightRefresh>>,
    next_refresh_id: AtomicU64,
    timer: RefreshTimer,
    events: broadcast::Sender<SessionEvent>,
}

/// Session lifecycle controller. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    /// Create a session manager with default timing.
    pub fn new(api: Arc<dyn AuthApi>, store: Arc<CredentialStore>) -> Self {
        Self::with_config(api, store, SessionConfig::default())
    }

    /// Create a session manager with custom timing and retry settings.
    pub fn with_config(
        api: Arc<dyn AuthApi>,
        store: Arc<CredentialStore>,
        config: SessionConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(SessionInner {
                api,
                store,
                config,
                fsm: Mutex::new(SessionMachine::new()),
                identity: RwLock::new(None),
                epoch: Mutex::new(0),
                settled: AtomicU64::new(0),
                in_flight: Mutex::new(None),
                next_refresh_id: AtomicU64::new(0),
                timer: RefreshTimer::new(),
                events,
            }),
        }
    }

    /// Receive state changes and expiry notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state().is_authenticated()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.inner.identity.read().clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state();
        SessionSnapshot {
            authenticated: state.is_authenticated(),
            username: self.identity().map(|identity| identity.username),
            state,
            access_expires_at: self
                .inner
                .store
                .access_token()
                .and_then(|access| token::expiry_of(&access).ok()),
        }
    }

    pub fn access_token_handle(&self) -> AccessTokenHandle {
        AccessTokenHandle {
            store: Arc::clone(&self.inner.store),
        }
    }

    /// Whether a refresh timer is currently armed.
    pub fn refresh_pending(&self) -> bool {
        self.inner.timer.is_armed()
    }

    /// Validate stored credentials at startup.
    ///
    /// Returns `Ok(true)` when a session was restored and `Ok(false)` when
    /// there was nothing to restore or the stored session was rejected (in
    /// which case it has been cleared). Only local storage failures are
    /// returned as errors.
    pub async fn restore_session(&self) -> AuthResult<bool> {
        let inner = &self.inner;

        let Some(credentials) = inner.store.load() else {
            if inner.store.has_persisted_keys()? {
                info!("Clearing incomplete stored credentials");
                inner.store.clear()?;
            }
            debug!("No stored session found");
            return Ok(false);
        };

        let started = {
            let epoch = inner.epoch.lock();
            let state = inner.state();
            if state != SessionState::Unauthenticated {
                debug!(state = %state, "Session already active, skipping restore");
                return Ok(state.is_authenticated());
            }
            inner.transition(&SessionMachineInput::StoredTokenFound)?;
            (*epoch, inner.settled.load(Ordering::SeqCst))
        };

        match token::expiry_of(&credentials.access) {
            Err(err) => {
                warn!(error = %err, "Stored access token is malformed");
                inner.finish_verification(started, &credentials, Err(err.into()))
            }
            Ok(expires_at) if expires_at <= Utc::now() => {
                info!(
                    username = %credentials.username,
                    "Stored access token expired, refreshing"
                );
                match inner.shared_refresh(false).await {
                    Ok(_) => Ok(true),
                    Err(err) => {
                        warn!(error = %err, "Startup refresh failed, session cleared");
                        Ok(false)
                    }
                }
            }
            Ok(_) => {
                debug!(username = %credentials.username, "Verifying stored session with server");
                let verified = inner.bounded(inner.api.verify(&credentials.access)).await;
                inner.finish_verification(started, &credentials, verified)
            }
        }
    }

    /// Log in and persist the resulting credentials.
    ///
    /// On failure the session state is unchanged.
    pub async fn login(&self, credential: LoginCredential) -> AuthResult<Identity> {
        let inner = &self.inner;

        let (grant, typed_identifier) = match &credential {
            LoginCredential::Password {
                identifier,
                password,
            } => {
                debug!(identifier = %identifier, "Attempting password login");
                let grant = inner
                    .bounded(inner.api.obtain_token(identifier, password))
                    .await?;
                (grant, Some(identifier.as_str()))
            }
            LoginCredential::OAuth { access_token } => {
                debug!("Attempting OAuth login");
                let grant = inner.bounded(inner.api.google_login(access_token)).await?;
                (grant, None)
            }
        };

        let username = grant
            .identity()
            .or_else(|| typed_identifier.map(str::to_string))
            .ok_or_else(|| {
                AuthError::UnexpectedResponse("login response carried no identity".to_string())
            })?;

        inner.establish(&grant, username)
    }

    /// Drop the session locally. Never contacts the server.
    pub fn logout(&self) -> AuthResult<()> {
        let inner = &self.inner;
        let mut epoch = inner.epoch.lock();
        *epoch += 1;

        inner.timer.cancel();
        *inner.identity.write() = None;
        let cleared = inner.store.clear();
        inner.transition(&SessionMachineInput::LogoutRequested)?;

        info!("Logged out");
        cleared.map_err(AuthError::from)
    }

    /// Refresh the access token now, or join the refresh already running.
    ///
    /// An active session without a refresh token is expired.
    pub async fn refresh_now(&self) -> AuthResult<String> {
        let state = self.state();
        let active = matches!(
            state,
            SessionState::Verifying | SessionState::Authenticated | SessionState::RefreshScheduled
        );
        if !active {
            return Err(AuthError::NotLoggedIn);
        }

        self.inner
            .shared_refresh(true)
            .await
            .map_err(|err| unshare(&err))
    }

    /// Called by the transport when a request carrying `stale_token` was
    /// rejected with 401. Returns the token to replay the request with.
    ///
    /// If the token was already rotated by someone else, the current token
    /// is returned without a network call.
    pub async fn handle_unauthorized(&self, stale_token: &str) -> AuthResult<String> {
        match self.inner.store.access_token() {
            None => Err(AuthError::NotLoggedIn),
            Some(current) if current != stale_token => {
                debug!("Access token already rotated, replaying with current token");
                Ok(current)
            }
            Some(_) => {
                debug!("Request unauthorized, refreshing access token");
                self.refresh_now().await
            }
        }
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.state())
            .field("identity", &self.identity())
            .finish_non_exhaustive()
    }
}

impl SessionInner {
    fn state(&self) -> SessionState {
        SessionState::from(self.fsm.lock().state())
    }

    /// Transition the FSM and broadcast if the state changed.
    fn transition(&self, input: &SessionMachineInput) -> AuthResult<SessionState> {
        let mut fsm = self.fsm.lock();
        let old_state = SessionState::from(fsm.state());

        fsm.consume(input).map_err(|_| {
            AuthError::InvalidStateTransition(format!(
                "Cannot apply {:?} in state {}",
                input, old_state
            ))
        })?;

        let new_state = SessionState::from(fsm.state());
        drop(fsm);

        if old_state != new_state {
            debug!(old_state = %old_state, new_state = %new_state, "Session state transition");
            // No receivers is fine.
            let _ = self.events.send(SessionEvent::StateChanged {
                from: old_state,
                to: new_state,
            });
        }

        Ok(new_state)
    }

    async fn bounded<T, F>(&self, call: F) -> AuthResult<T>
    where
        F: Future<Output = AuthResult<T>>,
    {
        tokio::time::timeout(self.config.request_timeout, call)
            .await
            .map_err(|_| AuthError::Timeout)?
    }

    /// Store a fresh login and arm the refresh timer.
    fn establish(self: &Arc<Self>, grant: &TokenGrant, username: String) -> AuthResult<Identity> {
        let mut epoch = self.epoch.lock();

        self.store.save(&StoredCredentials::new(
            grant.access.as_str(),
            grant.refresh.as_str(),
            username.as_str(),
        ))?;
        *epoch += 1;
        self.timer.cancel();

        let identity = Identity::new(username);
        *self.identity.write() = Some(identity.clone());
        self.transition(&SessionMachineInput::LoginSucceeded)?;
        self.schedule_refresh(&grant.access)?;

        info!(username = %identity, "Login successful");
        Ok(identity)
    }

    /// Apply a verify result, unless a login, logout or refresh settled the
    /// session after `started` was taken.
    fn finish_verification(
        self: &Arc<Self>,
        started: (u64, u64),
        credentials: &StoredCredentials,
        verified: AuthResult<()>,
    ) -> AuthResult<bool> {
        let current = self.epoch.lock();
        if (*current, self.settled.load(Ordering::SeqCst)) != started {
            debug!("Session changed during verification, ignoring result");
            return Ok(self.state().is_authenticated());
        }

        match verified {
            Ok(()) => {
                self.transition(&SessionMachineInput::VerifySucceeded)?;
                *self.identity.write() = Some(Identity::new(credentials.username.as_str()));
                self.schedule_refresh(&credentials.access)?;
                info!(username = %credentials.username, "Session restored");
                Ok(true)
            }
            Err(err) => {
                warn!(error = %err, "Stored session rejected, clearing credentials");
                self.store.clear()?;
                *self.identity.write() = None;
                self.transition(&SessionMachineInput::VerifyFailed)?;
                Ok(false)
            }
        }
    }

    /// Arm the timer for `refresh_skew` before `access` expires.
    fn schedule_refresh(self: &Arc<Self>, access: &str) -> AuthResult<()> {
        let time_left = token::time_to_expiry(access, Utc::now());
        let delay = time_left.saturating_sub(self.config.refresh_skew);

        let weak = Arc::downgrade(self);
        self.timer.arm(delay, move |generation| async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if !inner.timer.is_current(generation) {
                return;
            }
            debug!("Refresh timer fired");
            // Failures are handled by the refresh task itself.
            let _ = inner.shared_refresh(true).await;
        });

        self.transition(&SessionMachineInput::RefreshArmed)?;
        debug!(delay_secs = delay.as_secs(), "Refresh scheduled");
        Ok(())
    }

    /// Join the in-flight refresh for the current session, or start one.
    ///
    /// `announce_expiry` asks for [`SessionEvent::Expired`] even when the
    /// refresh fails before the session was established.
    fn shared_refresh(self: &Arc<Self>, announce_expiry: bool) -> SharedRefresh {
        let epoch = *self.epoch.lock();
        let mut in_flight = self.in_flight.lock();

        if let Some(current) = in_flight.as_ref() {
            if current.epoch == epoch {
                debug!(refresh_id = current.id, "Joining in-flight refresh");
                if announce_expiry {
                    current.announce_expiry.store(true, Ordering::SeqCst);
                }
                return current.future.clone();
            }
        }

        let id = self.next_refresh_id.fetch_add(1, Ordering::SeqCst);
        let announce = Arc::new(AtomicBool::new(announce_expiry));
        let inner = Arc::clone(self);
        let task_announce = Arc::clone(&announce);
        let task = tokio::spawn(async move {
            let outcome = inner.run_refresh(epoch, &task_announce).await;
            inner.release_refresh(id);
            outcome
        });

        let future = async move {
            task.await.unwrap_or_else(|join_err| {
                Err(Arc::new(AuthError::TokenRefresh(format!(
                    "refresh task failed: {join_err}"
                ))))
            })
        }
        .boxed()
        .shared();

        *in_flight = Some(InFlightRefresh {
            id,
            epoch,
            announce_expiry: announce,
            future: future.clone(),
        });
        future
    }

    fn release_refresh(&self, id: u64) {
        let mut in_flight = self.in_flight.lock();
        if in_flight.as_ref().is_some_and(|current| current.id == id) {
            *in_flight = None;
        }
    }

    async fn run_refresh(self: &Arc<Self>, epoch: u64, announce: &AtomicBool) -> RefreshOutcome {
        let result = match self.store.refresh_token().filter(|token| !token.is_empty()) {
            Some(refresh_token) => self.refresh_with_backoff(&refresh_token).await,
            None => {
                warn!("No refresh token stored");
                Err(AuthError::NotLoggedIn)
            }
        };
        self.apply_refresh(epoch, result, announce).map_err(Arc::new)
    }

    /// Refresh with exponential backoff on transient failures.
    async fn refresh_with_backoff(&self, refresh_token: &str) -> AuthResult<RefreshedTokens> {
        let max_retries = self.config.refresh.max_retries.max(1);

        for attempt in 0..max_retries {
            match self.bounded(self.api.refresh(refresh_token)).await {
                Ok(tokens) => return Ok(tokens),
                Err(e) if e.is_transient() => {
                    if attempt + 1 < max_retries {
                        let delay = self.config.refresh.delay_for_attempt(attempt);
                        debug!(
                            attempt = attempt + 1,
                            max_retries,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Refresh failed with transient error, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    } else {
                        warn!(error = %e, "Last refresh attempt failed");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Refresh rejected");
                    return Err(e);
                }
            }
        }

        warn!(max_retries, "Refresh failed after all attempts");
        Err(AuthError::RefreshExhausted(max_retries))
    }

    /// Commit a refresh result, unless the session changed meanwhile.
    fn apply_refresh(
        self: &Arc<Self>,
        epoch: u64,
        result: AuthResult<RefreshedTokens>,
        announce: &AtomicBool,
    ) -> AuthResult<String> {
        let current = self.epoch.lock();
        if *current != epoch {
            debug!("Discarding refresh result from a previous session");
            return Err(AuthError::SessionInvalid(
                "session changed during refresh".to_string(),
            ));
        }

        let committed = result.and_then(|tokens| {
            if token::is_expired(&tokens.access, Utc::now()) {
                return Err(AuthError::UnexpectedResponse(
                    "refresh returned an expired or malformed access token".to_string(),
                ));
            }
            self.store
                .rotate_tokens(&tokens.access, tokens.refresh.as_deref())?;
            Ok(tokens)
        });

        self.settled.fetch_add(1, Ordering::SeqCst);
        match committed {
            Ok(tokens) => {
                self.transition(&SessionMachineInput::RefreshSucceeded)?;
                {
                    let mut identity = self.identity.write();
                    if identity.is_none() {
                        *identity = self.store.username().map(Identity::new);
                    }
                }
                self.schedule_refresh(&tokens.access)?;
                info!(refresh_rotated = tokens.refresh.is_some(), "Access token refreshed");
                Ok(tokens.access)
            }
            Err(err) => {
                self.expire(&err, announce.load(Ordering::SeqCst));
                Err(err)
            }
        }
    }

    /// Drop credentials after a failed refresh. Broadcasts `Expired` when an
    /// established session ends. A failure while verifying a restored session
    /// is announced only when `announce` is set.
    fn expire(&self, reason: &AuthError, announce: bool) {
        self.timer.cancel();
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear credentials after refresh failure");
        }
        *self.identity.write() = None;

        match self.transition(&SessionMachineInput::RefreshFailed) {
            Ok(SessionState::SessionExpiring) => {
                warn!(error = %reason, "Session expired");
                let _ = self.events.send(SessionEvent::Expired);
                if let Err(e) = self.transition(&SessionMachineInput::ExpiryAcknowledged) {
                    warn!(error = %e, "Failed to leave expiring state");
                }
            }
            Ok(state) if announce => {
                warn!(state = %state, error = %reason, "Session expired before it was established");
                let _ = self.events.send(SessionEvent::Expired);
            }
            Ok(state) => {
                debug!(state = %state, error = %reason, "Refresh failed before session was established");
            }
            Err(e) => warn!(error = %e, "Refresh failed in unexpected state"),
        }
    }
}

/// Recover an owned error from a result shared between several waiters.
fn unshare(err: &AuthError) -> AuthError {
    match err {
        AuthError::NotLoggedIn => AuthError::NotLoggedIn,
        AuthError::Timeout => AuthError::Timeout,
        AuthError::RefreshExhausted(attempts) => AuthError::RefreshExhausted(*attempts),
        AuthError::TokenRefresh(reason) => AuthError::TokenRefresh(reason.clone()),
        AuthError::SessionInvalid(reason) => AuthError::SessionInvalid(reason.clone()),
        AuthError::UnexpectedResponse(reason) => AuthError::UnexpectedResponse(reason.clone()),
        AuthError::Server { status, body } => AuthError::Server {
            status: *status,
            body: body.clone(),
        },
        other => AuthError::TokenRefresh(other.to_string()),
    }
}
