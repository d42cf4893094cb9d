//! Remote authentication API.
//!
//! [`AuthApi`] is the seam between the session manager and the network.
//! [`HttpAuthApi`] talks to the gallery REST service:
//!
//! | Call           | Endpoint                    | Body                |
//! |----------------|-----------------------------|---------------------|
//! | `obtain_token` | `POST /api/token/`          | `{username, password}` |
//! | `google_login` | `POST /api/google/login/`   | `{access_token}`    |
//! | `refresh`      | `POST /api/token/refresh/`  | `{refresh}`         |
//! | `verify`       | `POST /api/token/verify/`   | `{token}`           |

use crate::{AuthError, AuthResult};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const TOKEN_PATH: &str = "api/token/";
const REFRESH_PATH: &str = "api/token/refresh/";
const VERIFY_PATH: &str = "api/token/verify/";
const GOOGLE_LOGIN_PATH: &str = "api/google/login/";

/// Maximum length for error response bodies in error messages.
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Profile block returned by the OAuth login endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Tokens returned by a successful login.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct TokenGrant {
    pub access: String,
    pub refresh: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub user: Option<UserInfo>,
}

impl TokenGrant {
    /// Display identity carried by the response: `username`, else the
    /// profile email, else the profile name. Blank values are skipped.
    pub fn identity(&self) -> Option<String> {
        let profile = self.user.as_ref();
        [
            self.username.as_deref(),
            profile.and_then(|u| u.email.as_deref()),
            profile.and_then(|u| u.name.as_deref()),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
    }
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("username", &self.username)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

/// Tokens returned by a successful refresh. The refresh token is only
/// present when the server rotates it.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct RefreshedTokens {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}

impl std::fmt::Debug for RefreshedTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshedTokens")
            .field("rotated", &self.refresh.is_some())
            .finish_non_exhaustive()
    }
}

/// Authentication endpoints consumed by the session manager.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Exchange a username and password for a token pair.
    async fn obtain_token(&self, username: &str, password: &str) -> AuthResult<TokenGrant>;

    /// Exchange a third-party OAuth access token for a token pair.
    async fn google_login(&self, access_token: &str) -> AuthResult<TokenGrant>;

    /// Obtain a new access token.
    async fn refresh(&self, refresh_token: &str) -> AuthResult<RefreshedTokens>;

    /// Check that the server still accepts `access_token`.
    async fn verify(&self, access_token: &str) -> AuthResult<()>;
}

#[derive(Serialize)]
struct PasswordRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct GoogleLoginRequest<'a> {
    access_token: &'a str,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    token: &'a str,
}

/// Error payload shapes used by the server.
#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP implementation of [`AuthApi`].
#[derive(Debug, Clone)]
pub struct HttpAuthApi {
    client: Client,
    base_url: Url,
}

impl HttpAuthApi {
    /// Create a client for the API rooted at `base_url`. Every call is
    /// bounded by `timeout`.
    pub fn new(base_url: Url, timeout: Duration) -> AuthResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, mut base_url: Url) -> Self {
        // Url::join drops the last path segment unless it ends with '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> AuthResult<(StatusCode, String)> {
        let url = self.base_url.join(path)?;
        debug!(url = %url, "auth request");

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        let text = response.text().await.map_err(map_send_error)?;
        Ok((status, text))
    }
}

fn map_send_error(err: reqwest::Error) -> AuthError {
    if err.is_timeout() {
        AuthError::Timeout
    } else {
        AuthError::Http(err)
    }
}

fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}

/// Human-readable reason from an error body: `detail`, else `error`, else
/// the (truncated) raw body.
fn error_detail(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.detail.or(parsed.error))
        .unwrap_or_else(|| truncate_body(body))
}

fn parse_json<'a, T: Deserialize<'a>>(body: &'a str, what: &str) -> AuthResult<T> {
    serde_json::from_str(body)
        .map_err(|e| AuthError::UnexpectedResponse(format!("invalid {what} response: {e}")))
}

fn server_error(status: StatusCode, body: &str) -> AuthError {
    AuthError::Server {
        status: status.as_u16(),
        body: truncate_body(body),
    }
}

fn unexpected_status(status: StatusCode, body: &str) -> AuthError {
    AuthError::UnexpectedResponse(format!("HTTP {}: {}", status, truncate_body(body)))
}

/// Map a login response status to the error taxonomy.
fn login_error(status: StatusCode, body: &str) -> AuthError {
    let detail = error_detail(body);
    match status.as_u16() {
        400 | 401 => AuthError::InvalidCredentials(detail),
        403 => AuthError::UnconfirmedAccount(detail),
        429 => AuthError::RateLimited(detail),
        500..=599 => server_error(status, body),
        _ => unexpected_status(status, body),
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn obtain_token(&self, username: &str, password: &str) -> AuthResult<TokenGrant> {
        let (status, body) = self
            .post(TOKEN_PATH, &PasswordRequest { username, password })
            .await?;

        if !status.is_success() {
            warn!(status = %status, "password login rejected");
            return Err(login_error(status, &body));
        }
        parse_json(&body, "login")
    }

    async fn google_login(&self, access_token: &str) -> AuthResult<TokenGrant> {
        let (status, body) = self
            .post(GOOGLE_LOGIN_PATH, &GoogleLoginRequest { access_token })
            .await?;

        if !status.is_success() {
            warn!(status = %status, "oauth login rejected");
            return Err(match status.as_u16() {
                // The OAuth endpoint reports a bad provider token as 400/401/403.
                400 | 401 | 403 => AuthError::InvalidCredentials(error_detail(&body)),
                _ => login_error(status, &body),
            });
        }
        parse_json(&body, "oauth login")
    }

    async fn refresh(&self, refresh_token: &str) -> AuthResult<RefreshedTokens> {
        let (status, body) = self
            .post(REFRESH_PATH, &RefreshRequest { refresh: refresh_token })
            .await?;

        if !status.is_success() {
            warn!(status = %status, "token refresh rejected");
            return Err(match status.as_u16() {
                400 | 401 | 403 => AuthError::TokenRefresh(error_detail(&body)),
                500..=599 => server_error(status, &body),
                _ => unexpected_status(status, &body),
            });
        }
        parse_json(&body, "refresh")
    }

    async fn verify(&self, access_token: &str) -> AuthResult<()> {
        let (status, body) = self
            .post(VERIFY_PATH, &VerifyRequest { token: access_token })
            .await?;

        if status.is_success() {
            return Ok(());
        }

        warn!(status = %status, "token verification rejected");
        Err(if status.is_server_error() {
            server_error(status, &body)
        } else {
            AuthError::SessionInvalid(error_detail(&body))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Json;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::post;
    use axum::Router;
    use serde_json::{json, Value};
    use tokio::net::TcpListener;

    async fn serve(app: Router) -> HttpAuthApi {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let base = Url::parse(&format!("http://{addr}")).unwrap();
        HttpAuthApi::new(base, Duration::from_secs(5)).unwrap()
    }

    fn token_routes() -> Router {
        Router::new()
            .route(
                "/api/token/",
                post(|Json(body): Json<Value>| async move {
                    match (body["username"].as_str(), body["password"].as_str()) {
                        (Some("alice"), Some("correct")) => (
                            AxumStatus::OK,
                            Json(json!({"access": "A1", "refresh": "R1", "username": "alice"})),
                        ),
                        (Some("bob"), _) => (
                            AxumStatus::FORBIDDEN,
                            Json(json!({"detail": "Please confirm your email before logging in."})),
                        ),
                        (Some("mallory"), _) => (
                            AxumStatus::TOO_MANY_REQUESTS,
                            Json(json!({"detail": "Too many failed login attempts. Please try again later."})),
                        ),
                        _ => (
                            AxumStatus::UNAUTHORIZED,
                            Json(json!({"detail": "No active account found with the given credentials"})),
                        ),
                    }
                }),
            )
            .route(
                "/api/token/refresh/",
                post(|Json(body): Json<Value>| async move {
                    match body["refresh"].as_str() {
                        Some("R1") => (AxumStatus::OK, Json(json!({"access": "A2"}))),
                        Some("R-rotate") => (
                            AxumStatus::OK,
                            Json(json!({"access": "A3", "refresh": "R3"})),
                        ),
                        Some("R-down") => (
                            AxumStatus::BAD_GATEWAY,
                            Json(json!({"detail": "upstream unavailable"})),
                        ),
                        _ => (
                            AxumStatus::UNAUTHORIZED,
                            Json(json!({"detail": "Token is invalid or expired", "code": "token_not_valid"})),
                        ),
                    }
                }),
            )
            .route(
                "/api/token/verify/",
                post(|Json(body): Json<Value>| async move {
                    if body["token"] == "A1" {
                        (AxumStatus::OK, Json(json!({})))
                    } else {
                        (
                            AxumStatus::UNAUTHORIZED,
                            Json(json!({"detail": "Token is invalid or expired"})),
                        )
                    }
                }),
            )
            .route(
                "/api/google/login/",
                post(|Json(body): Json<Value>| async move {
                    if body["access_token"] == "google-ok" {
                        (
                            AxumStatus::OK,
                            Json(json!({
                                "access": "GA",
                                "refresh": "GR",
                                "user": {"email": "carol@example.com", "name": "Carol"}
                            })),
                        )
                    } else {
                        (
                            AxumStatus::BAD_REQUEST,
                            Json(json!({"error": "Failed to retrieve user info from Google"})),
                        )
                    }
                }),
            )
    }

    #[tokio::test]
    async fn test_obtain_token_success() {
        let api = serve(token_routes()).await;

        let grant = api.obtain_token("alice", "correct").await.unwrap();
        assert_eq!(grant.access, "A1");
        assert_eq!(grant.refresh, "R1");
        assert_eq!(grant.identity().as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_obtain_token_error_mapping() {
        let api = serve(token_routes()).await;

        match api.obtain_token("alice", "wrong").await {
            Err(AuthError::InvalidCredentials(detail)) => {
                assert!(detail.contains("No active account"))
            }
            other => panic!("expected InvalidCredentials, got {other:?}"),
        }
        match api.obtain_token("bob", "whatever").await {
            Err(AuthError::UnconfirmedAccount(detail)) => {
                assert!(detail.contains("confirm your email"))
            }
            other => panic!("expected UnconfirmedAccount, got {other:?}"),
        }
        assert!(matches!(
            api.obtain_token("mallory", "x").await,
            Err(AuthError::RateLimited(_))
        ));
    }

    #[tokio::test]
    async fn test_google_login_identity_from_profile() {
        let api = serve(token_routes()).await;

        let grant = api.google_login("google-ok").await.unwrap();
        assert_eq!(grant.access, "GA");
        assert_eq!(grant.identity().as_deref(), Some("carol@example.com"));

        match api.google_login("bogus").await {
            Err(AuthError::InvalidCredentials(detail)) => {
                assert_eq!(detail, "Failed to retrieve user info from Google")
            }
            other => panic!("expected InvalidCredentials, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_refresh_with_and_without_rotation() {
        let api = serve(token_routes()).await;

        let kept = api.refresh("R1").await.unwrap();
        assert_eq!(kept.access, "A2");
        assert_eq!(kept.refresh, None);

        let rotated = api.refresh("R-rotate").await.unwrap();
        assert_eq!(rotated.access, "A3");
        assert_eq!(rotated.refresh.as_deref(), Some("R3"));
    }

    #[tokio::test]
    async fn test_refresh_failures_are_classified() {
        let api = serve(token_routes()).await;

        let rejected = api.refresh("R-revoked").await.unwrap_err();
        assert!(matches!(rejected, AuthError::TokenRefresh(_)));
        assert!(!rejected.is_transient());

        let down = api.refresh("R-down").await.unwrap_err();
        assert!(matches!(down, AuthError::Server { status: 502, .. }));
        assert!(down.is_transient());
    }

    #[tokio::test]
    async fn test_verify() {
        let api = serve(token_routes()).await;

        api.verify("A1").await.unwrap();
        assert!(matches!(
            api.verify("A-stale").await,
            Err(AuthError::SessionInvalid(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transient() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let base = Url::parse(&format!("http://{addr}")).unwrap();
        let api = HttpAuthApi::new(base, Duration::from_secs(5)).unwrap();

        let err = api.verify("A1").await.unwrap_err();
        assert!(err.is_transient(), "got {err:?}");
    }

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let api = HttpAuthApi::with_client(
            Client::new(),
            Url::parse("https://photos.example.com/backend").unwrap(),
        );
        assert_eq!(
            api.base_url().join(TOKEN_PATH).unwrap().as_str(),
            "https://photos.example.com/backend/api/token/"
        );
    }

    #[test]
    fn test_identity_resolution_order() {
        let grant = |username: Option<&str>, email: Option<&str>, name: Option<&str>| TokenGrant {
            access: "a".into(),
            refresh: "r".into(),
            username: username.map(Into::into),
            user: Some(UserInfo {
                email: email.map(Into::into),
                name: name.map(Into::into),
            }),
        };

        assert_eq!(grant(Some("alice"), Some("a@x"), Some("A")).identity().as_deref(), Some("alice"));
        assert_eq!(grant(None, Some("a@x"), Some("A")).identity().as_deref(), Some("a@x"));
        assert_eq!(grant(Some(" "), None, Some("A")).identity().as_deref(), Some("A"));
        assert_eq!(grant(None, None, None).identity(), None);
    }

    #[test]
    fn test_error_detail_and_truncation() {
        assert_eq!(error_detail(r#"{"detail":"nope"}"#), "nope");
        assert_eq!(error_detail(r#"{"error":"bad"}"#), "bad");
        assert_eq!(error_detail("plain text"), "plain text");

        let long = "é".repeat(400);
        let truncated = truncate_body(&long);
        assert!(truncated.contains("truncated, 800 total bytes"));
    }
}
