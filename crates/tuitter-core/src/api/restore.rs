//! Rebuilding a session from persisted credentials.
//!
//! One call is one attempt: load the blob, validate or refresh, install.
//! Retrying at startup is the caller's job (see `auth::restore_at_startup`).

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::auth::{BlobShape, CredentialBlob, RefreshError, RefreshToken, RestoreOutcome, SessionRestorer};
use crate::models::User;

use super::client::LastRestore;
use super::{ApiRequest, SessionClient};

impl SessionClient {
    /// True iff the token state now holds a usable session.
    pub async fn restore(&self) -> bool {
        self.attempt_restore().await.is_restored()
    }

    /// Like [`SessionClient::restore`], but says why a restore failed.
    pub async fn attempt_restore(&self) -> RestoreOutcome {
        let mut last = self.restore_lock().lock().await;
        self.attempt_restore_locked(&mut last).await
    }

    /// Run one attempt and record it in `last`, the restore lock's contents.
    pub(crate) async fn attempt_restore_locked(&self, last: &mut Option<LastRestore>) -> RestoreOutcome {
        let outcome = self.run_restore().await;
        *last = Some(LastRestore {
            generation: self.tokens().generation(),
            restored: outcome.is_restored(),
        });
        outcome
    }

    #[instrument(skip(self))]
    async fn run_restore(&self) -> RestoreOutcome {
        let blob = match self.load_stored().await {
            Ok(Some(blob)) => blob,
            Ok(None) => {
                debug!("No stored credentials");
                return RestoreOutcome::NoCredentials;
            }
            Err(e) => {
                warn!(error = %e, "Stored credentials unreadable; treating as no session");
                return RestoreOutcome::NoCredentials;
            }
        };

        let username = blob.username();
        let outcome = match blob.shape() {
            BlobShape::Full {
                access_token,
                refresh_token,
            } => self.restore_full(username, access_token, refresh_token).await,
            BlobShape::RefreshOnly { refresh_token } => {
                debug!(?username, "Refresh-only credentials found");
                self.refresh_and_install(username, refresh_token).await
            }
            BlobShape::Empty => {
                debug!("Stored credentials hold no tokens");
                RestoreOutcome::NoCredentials
            }
        };
        info!(?outcome, "Restore attempt finished");
        outcome
    }

    async fn restore_full(
        &self,
        username: Option<&str>,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> RestoreOutcome {
        // Provisional install: the probe below must carry this token.
        if !self.tokens().set_pair(access_token, refresh_token) {
            warn!("Stored access token is unusable");
            return match refresh_token {
                Some(refresh_token) => self.refresh_and_install(username, refresh_token).await,
                None => RestoreOutcome::Rejected,
            };
        }
        if let Some(username) = username {
            self.tokens().bind_handle(username);
        }

        let probe = ApiRequest::get(self.probe_path());
        let fallback = match self.send(&probe).await {
            Ok(response) if response.status.is_success() => {
                debug!("Stored access token is valid");
                if username.is_none() {
                    self.bind_handle_from_profile(&response.body);
                }
                return RestoreOutcome::Restored;
            }
            Ok(response) if self.is_auth_rejection(response.status) => {
                info!(status = response.status.as_u16(), "Stored access token rejected");
                RestoreOutcome::Rejected
            }
            Ok(response) => {
                warn!(status = response.status.as_u16(), "Session validation failed");
                RestoreOutcome::Unavailable
            }
            Err(e) => {
                warn!(error = %e, "Session validation request failed");
                RestoreOutcome::Unavailable
            }
        };

        match refresh_token {
            Some(refresh_token) => self.refresh_and_install(username, refresh_token).await,
            None => fallback,
        }
    }

    /// Mint a new pair, persist it, then install it.
    async fn refresh_and_install(&self, username: Option<&str>, refresh_token: &str) -> RestoreOutcome {
        let refreshed = match self.refresher().refresh(&RefreshToken::new(refresh_token)).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(error = %e, "Token refresh failed");
                return match e {
                    RefreshError::Rejected { .. } => RestoreOutcome::Rejected,
                    RefreshError::Unavailable { .. }
                    | RefreshError::Transport(_)
                    | RefreshError::Malformed(_) => RestoreOutcome::Unavailable,
                };
            }
        };

        let refresh_token = refreshed
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(refresh_token);

        // Durable before visible: a crash after this point still leaves a valid pair.
        self.persist(CredentialBlob::full(
            username.unwrap_or_default(),
            &refreshed.access_token,
            Some(refresh_token),
        ))
        .await;
        if !self.tokens().set_pair(&refreshed.access_token, Some(refresh_token)) {
            return RestoreOutcome::Unavailable;
        }
        if let Some(username) = username {
            self.tokens().bind_handle(username);
        }
        info!("Session refreshed");
        RestoreOutcome::Restored
    }

    /// Older blobs carry no username; the probe's profile names the account.
    fn bind_handle_from_profile(&self, body: &[u8]) {
        match serde_json::from_slice::<User>(body) {
            Ok(user) if !user.handle.is_empty() => self.tokens().bind_handle(&user.handle),
            Ok(_) => {}
            Err(e) => debug!(error = %e, "Probe response carried no profile"),
        }
    }
}

#[async_trait]
impl SessionRestorer for SessionClient {
    async fn attempt_restore(&self) -> RestoreOutcome {
        SessionClient::attempt_restore(self).await
    }
}
