//! Interactive sign-in, run off the UI loop.
//!
//! The coordinator spawns the login flow, installs the resulting tokens and
//! reports exactly one [`LoginResult`] per attempt over an mpsc channel.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::api::SessionClient;

use super::credentials::CredentialBlob;

/// Buffer for login results; one attempt produces one result.
const RESULT_CHANNEL_SIZE: usize = 4;

#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct LoginTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl fmt::Debug for LoginTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginTokens")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// What a successful sign-in hands back.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoginCredentials {
    pub username: String,
    pub tokens: LoginTokens,
}

impl LoginCredentials {
    pub fn new(username: impl Into<String>, access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            username: username.into(),
            tokens: LoginTokens {
                access_token: access_token.into(),
                refresh_token,
            },
        }
    }

    fn from_blob(blob: &CredentialBlob) -> Option<Self> {
        let access_token = blob.access_token()?;
        Some(Self::new(
            blob.username().unwrap_or_default(),
            access_token,
            blob.refresh_token().map(str::to_string),
        ))
    }

    fn to_blob(&self) -> CredentialBlob {
        CredentialBlob::full(
            &self.username,
            &self.tokens.access_token,
            self.tokens.refresh_token.as_deref(),
        )
    }
}

#[derive(Error, Debug)]
pub enum AuthenticateError {
    /// The user declined, cancelled, or the identity provider said no.
    #[error("authentication failed: {0}")]
    Failed(String),

    #[error("unexpected sign-in failure: {0}")]
    Unexpected(String),
}

/// Runs an interactive sign-in.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self) -> Result<LoginCredentials, AuthenticateError>;
}

/// Failure reported to the UI.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoginError {
    #[error("{0}")]
    Authentication(String),

    #[error("sign-in failed unexpectedly")]
    Unexpected,
}

impl LoginError {
    /// Worth offering the sign-in button again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginResult {
    Authenticated(LoginCredentials),
    Failed(LoginError),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FlowError {
    #[error("a sign-in is already in progress")]
    AlreadyInProgress,
}

/// Starts login flows and routes their single result back to the UI.
pub struct AuthFlowCoordinator {
    client: SessionClient,
    authenticator: Arc<dyn Authenticator>,
    results: mpsc::Sender<LoginResult>,
    in_flight: Arc<AtomicBool>,
}

impl AuthFlowCoordinator {
    pub fn new(
        client: SessionClient,
        authenticator: Arc<dyn Authenticator>,
        results: mpsc::Sender<LoginResult>,
    ) -> Self {
        Self {
            client,
            authenticator,
            results,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Result channel sized for this coordinator.
    pub fn channel() -> (mpsc::Sender<LoginResult>, mpsc::Receiver<LoginResult>) {
        mpsc::channel(RESULT_CHANNEL_SIZE)
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Spawn a login flow. Fails if one is still running.
    pub fn start(&self) -> Result<JoinHandle<()>, FlowError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Sign-in requested while another is running");
            return Err(FlowError::AlreadyInProgress);
        }
        info!("Starting sign-in flow");

        let client = self.client.clone();
        let authenticator = Arc::clone(&self.authenticator);
        let results = self.results.clone();
        let in_flight = Arc::clone(&self.in_flight);

        Ok(tokio::spawn(async move {
            let result = run_flow(&client, authenticator).await;
            in_flight.store(false, Ordering::SeqCst);
            if let Err(e) = results.send(result).await {
                error!(error = %e, "Failed to deliver sign-in result - channel closed");
            }
        }))
    }
}

async fn run_flow(client: &SessionClient, authenticator: Arc<dyn Authenticator>) -> LoginResult {
    // Inner task so a panicking authenticator surfaces as a JoinError.
    let outcome = tokio::spawn(async move { authenticator.authenticate().await }).await;

    let failure = match outcome {
        Ok(Ok(credentials)) => return complete_login(client, credentials).await,
        Ok(Err(AuthenticateError::Failed(reason))) => {
            info!(%reason, "Sign-in was not completed");
            LoginError::Authentication(reason)
        }
        Ok(Err(AuthenticateError::Unexpected(reason))) => {
            error!(%reason, "Sign-in failed unexpectedly");
            LoginError::Unexpected
        }
        Err(e) => {
            error!(error = %e, "Sign-in task aborted");
            LoginError::Unexpected
        }
    };

    // The flow may have stored credentials before it failed.
    match client.load_stored().await {
        Ok(Some(blob)) => {
            if let Some(credentials) = LoginCredentials::from_blob(&blob) {
                if install(client, &credentials) {
                    info!("Recovered credentials written by the failed sign-in");
                    return LoginResult::Authenticated(credentials);
                }
            }
        }
        Ok(None) => {}
        Err(e) => warn!(error = %e, "Could not check for stored credentials"),
    }
    LoginResult::Failed(failure)
}

async fn complete_login(client: &SessionClient, credentials: LoginCredentials) -> LoginResult {
    if credentials.tokens.access_token.is_empty() || !install(client, &credentials) {
        error!("Sign-in returned no usable access token");
        return LoginResult::Failed(LoginError::Unexpected);
    }
    info!(username = %credentials.username, "Signed in");
    client.persist(credentials.to_blob()).await;
    LoginResult::Authenticated(credentials)
}

fn install(client: &SessionClient, credentials: &LoginCredentials) -> bool {
    client.install_login(
        &credentials.username,
        &credentials.tokens.access_token,
        credentials.tokens.refresh_token.as_deref(),
    )
}
