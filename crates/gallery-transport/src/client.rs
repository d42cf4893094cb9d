//! Authenticated REST client.

use crate::{TransportError, TransportResult};
use gallery_auth::{AccessTokenHandle, SessionManager};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// JSON client for the gallery API.
///
/// Every request carries the access token current at send time. A `401`
/// is handed to the session manager once; the request is then replayed
/// with whatever token it returns.
#[derive(Clone)]
pub struct ApiTransport {
    client: Client,
    base_url: Url,
    session: SessionManager,
    tokens: AccessTokenHandle,
}

impl ApiTransport {
    pub fn new(base_url: Url, session: SessionManager, timeout: Duration) -> TransportResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url, session))
    }

    pub fn with_client(client: Client, mut base_url: Url, session: SessionManager) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let tokens = session.access_token_handle();
        Self {
            client,
            base_url,
            session,
            tokens,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// GET `path` and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> TransportResult<T> {
        let response = self.send::<()>(Method::GET, path, None).await?;
        Self::decode(response).await
    }

    /// POST `body` as JSON to `path` and decode the JSON reply.
    pub async fn post_json<T, B>(&self, path: &str, body: &B) -> TransportResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let response = self.send(Method::POST, path, Some(body)).await?;
        Self::decode(response).await
    }

    /// Send a request and return the successful response.
    pub async fn send<B>(&self, method: Method, path: &str, body: Option<&B>) -> TransportResult<Response>
    where
        B: Serialize + ?Sized,
    {
        let url = self.endpoint(path)?;
        let sent_token = self.tokens.current();

        let response = self
            .dispatch(method.clone(), &url, body, sent_token.as_deref())
            .await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Self::check(response).await;
        }

        let Some(sent_token) = sent_token else {
            debug!(url = %url, "Anonymous request unauthorized");
            return Err(TransportError::Unauthorized);
        };

        debug!(url = %url, "Request unauthorized, asking session for a fresh token");
        let fresh_token = self
            .session
            .handle_unauthorized(&sent_token)
            .await
            .inspect_err(|e| warn!(error = %e, "Could not recover from 401"))?;

        let replayed = self
            .dispatch(method, &url, body, Some(&fresh_token))
            .await?;
        if replayed.status() == StatusCode::UNAUTHORIZED {
            warn!(url = %url, "Request still unauthorized after refresh");
        }
        Self::check(replayed).await
    }

    fn endpoint(&self, path: &str) -> TransportResult<Url> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    async fn dispatch<B>(
        &self,
        method: Method,
        url: &Url,
        body: Option<&B>,
        token: Option<&str>,
    ) -> TransportResult<Response>
    where
        B: Serialize + ?Sized,
    {
        let mut request = self.client.request(method, url.clone());
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check(response: Response) -> TransportResult<Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(TransportError::from_status(status, &body))
        }
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> TransportResult<T> {
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

impl std::fmt::Debug for ApiTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiTransport")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}
