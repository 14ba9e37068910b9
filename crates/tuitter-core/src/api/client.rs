//! The authenticated session client.
//!
//! `SessionClient` owns the token state and executes every backend call.
//! When a call is rejected for authentication reasons it restores the
//! session from persisted credentials and retries the call exactly once.

use std::sync::Arc;

use reqwest::{header, Client, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::auth::{
    CredentialBlob, CredentialStore, HttpTokenRefresher, StoreError, TokenRefresher, TokenState,
    UNAUTHENTICATED_HANDLE,
};
use crate::config::Config;
use crate::models::{NewPost, Post, User};

use super::{ApiError, ApiRequest};

/// A response as it came off the wire, before decoding.
#[derive(Debug)]
pub(crate) struct RawResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
    /// Token generation the request was sent with.
    pub generation: u64,
}

/// What the most recent restore did, recorded under the restore lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LastRestore {
    /// Token generation the restore left installed.
    pub generation: u64,
    pub restored: bool,
}

/// Authenticated client for the tuitter backend.
/// Clone is cheap: all clones share one token state and connection pool.
#[derive(Clone)]
pub struct SessionClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http: Client,
    base_url: String,
    probe_path: String,
    bad_request_is_auth_failure: bool,
    tokens: TokenState,
    store: Arc<dyn CredentialStore>,
    refresher: Arc<dyn TokenRefresher>,
    /// Serializes restores so concurrent auth failures trigger one refresh.
    restore_lock: Mutex<Option<LastRestore>>,
}

impl SessionClient {
    /// Create a client that refreshes tokens against the configured backend.
    pub fn new(config: &Config, store: Arc<dyn CredentialStore>) -> Result<Self, ApiError> {
        let http = Self::build_http(config)?;
        let refresher = HttpTokenRefresher::new(http.clone(), &config.base_url, &config.refresh_path);
        Ok(Self::from_parts(config, http, store, Arc::new(refresher)))
    }

    fn build_http(config: &Config) -> Result<Client, ApiError> {
        Ok(Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("tuitter/", env!("CARGO_PKG_VERSION")))
            .build()?)
    }

    fn from_parts(
        config: &Config,
        http: Client,
        store: Arc<dyn CredentialStore>,
        refresher: Arc<dyn TokenRefresher>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                http,
                base_url: config.base_url.trim_end_matches('/').to_string(),
                probe_path: config.probe_path.clone(),
                bad_request_is_auth_failure: config.bad_request_is_auth_failure,
                tokens: TokenState::new(),
                store,
                refresher,
                restore_lock: Mutex::new(None),
            }),
        }
    }

    pub fn tokens(&self) -> &TokenState {
        &self.inner.tokens
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.inner.store
    }

    pub(crate) fn refresher(&self) -> &Arc<dyn TokenRefresher> {
        &self.inner.refresher
    }

    pub(crate) fn probe_path(&self) -> &str {
        &self.inner.probe_path
    }

    pub(crate) fn restore_lock(&self) -> &Mutex<Option<LastRestore>> {
        &self.inner.restore_lock
    }

    /// Install a freshly signed-in session. Returns false if the access
    /// token could not be installed; the previous session is then kept.
    pub fn install_login(&self, username: &str, access_token: &str, refresh_token: Option<&str>) -> bool {
        if !self.inner.tokens.set_pair(access_token, refresh_token) {
            return false;
        }
        let handle = if username.is_empty() {
            UNAUTHENTICATED_HANDLE
        } else {
            username
        };
        self.inner.tokens.bind_handle(handle);
        true
    }

    /// Forget the session in memory and in the credential store.
    pub fn sign_out(&self) -> Result<(), StoreError> {
        self.inner.tokens.clear();
        self.inner.store.clear()
    }

    /// Write a pair to the store off the async workers. Failure is logged,
    /// never fatal: the in-memory session keeps working until the next restart.
    pub(crate) async fn persist(&self, blob: CredentialBlob) {
        let store = Arc::clone(&self.inner.store);
        match tokio::task::spawn_blocking(move || store.save(&blob)).await {
            Ok(Ok(())) => debug!("Persisted credentials"),
            Ok(Err(e)) => warn!(error = %e, "Failed to persist credentials; session kept in memory only"),
            Err(e) => warn!(error = %e, "Credential save task failed"),
        }
    }

    /// Read the stored blob off the async workers.
    pub(crate) async fn load_stored(&self) -> Result<Option<CredentialBlob>, StoreError> {
        let store = Arc::clone(&self.inner.store);
        tokio::task::spawn_blocking(move || store.load())
            .await
            .map_err(|e| StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
    }

    pub(crate) fn is_auth_rejection(&self, status: StatusCode) -> bool {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => true,
            StatusCode::BAD_REQUEST => self.inner.bad_request_is_auth_failure,
            _ => false,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.inner.base_url, path.trim_start_matches('/'))
    }

    /// Send one attempt with whatever session is installed right now.
    pub(crate) async fn send(&self, request: &ApiRequest) -> Result<RawResponse, ApiError> {
        let session = self.inner.tokens.snapshot();
        let url = self.url(&request.path);

        let mut builder = self
            .inner
            .http
            .request(request.method.clone(), &url)
            .query(&request.query_with_handle(&session.handle));
        if let Some(ref authorization) = session.authorization {
            builder = builder.header(header::AUTHORIZATION, authorization.clone());
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.bytes().await?.to_vec();
        debug!(status = status.as_u16(), retry_eligible = request.retry_eligible, "Response received");

        Ok(RawResponse {
            status,
            body,
            generation: session.generation,
        })
    }

    /// Execute a request, restoring the session and retrying once on an
    /// authentication rejection.
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn execute<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let first = self.send(&request).await?;

        let response = if request.retry_eligible && self.is_auth_rejection(first.status) {
            info!(status = first.status.as_u16(), "Auth failure; attempting session restore");
            if self.restore_after(first.generation).await {
                info!("Session restored; retrying request once");
                self.send(&request.as_retry()).await?
            } else {
                debug!("Restore failed; surfacing original failure");
                first
            }
        } else {
            first
        };

        self.decode(&request.path, response)
    }

    /// Restore unless the token this request was rejected with has already
    /// been dealt with by another task.
    async fn restore_after(&self, seen_generation: u64) -> bool {
        let mut last = self.inner.restore_lock.lock().await;
        let current = self.inner.tokens.snapshot();
        if current.generation != seen_generation {
            match *last {
                // A restore ran since this request was sent; share its result.
                Some(prev) if prev.generation == current.generation => {
                    debug!(seen_generation, restored = prev.restored, "Reusing concurrent restore result");
                    return prev.restored;
                }
                // Replaced by a sign-in.
                _ if current.is_authenticated() => {
                    debug!(seen_generation, current = current.generation, "Session already replaced");
                    return true;
                }
                _ => {}
            }
        }
        self.attempt_restore_locked(&mut last).await.is_restored()
    }

    fn decode<T: DeserializeOwned>(&self, path: &str, response: RawResponse) -> Result<T, ApiError> {
        if !response.status.is_success() {
            let body = String::from_utf8_lossy(&response.body);
            return Err(ApiError::from_status(
                response.status,
                &body,
                self.is_auth_rejection(response.status),
            ));
        }

        let body: &[u8] = if response.body.iter().all(u8::is_ascii_whitespace) {
            b"null"
        } else {
            &response.body
        };
        serde_json::from_slice(body).map_err(|source| ApiError::Decode {
            path: path.to_string(),
            source,
        })
    }

    // ===== Backend Calls =====

    /// Fetch the signed-in user's profile
    pub async fn current_user(&self) -> Result<User, ApiError> {
        self.execute(ApiRequest::get("/me")).await
    }

    /// Fetch the home timeline
    pub async fn timeline(&self, limit: u32) -> Result<Vec<Post>, ApiError> {
        self.execute(ApiRequest::get("/timeline").query("limit", limit))
            .await
    }

    /// Fetch posts for the discover feed
    pub async fn discover(&self, limit: u32) -> Result<Vec<Post>, ApiError> {
        self.execute(ApiRequest::get("/discover").query("limit", limit))
            .await
    }

    pub async fn create_post(&self, content: &str) -> Result<Post, ApiError> {
        let request = ApiRequest::post("/posts").json(&NewPost { content })?;
        self.execute(request).await
    }

    pub async fn like_post(&self, post_id: &str) -> Result<(), ApiError> {
        let _: serde_json::Value = self
            .execute(ApiRequest::post(format!("/posts/{}/like", post_id)))
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("base_url", &self.inner.base_url)
            .field("handle", &self.inner.tokens.handle())
            .field("tokens", &"[REDACTED]")
            .finish()
    }
}
