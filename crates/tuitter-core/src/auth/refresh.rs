//! Exchanging a refresh token for a new access token.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use super::tokens::{is_installable, RefreshToken};

#[derive(Error, Debug)]
pub enum RefreshError {
    /// The refresh token is expired or revoked.
    #[error("refresh token rejected (HTTP {status})")]
    Rejected { status: u16 },

    /// The endpoint failed without judging the token (5xx, 429).
    #[error("refresh endpoint unavailable (HTTP {status})")]
    Unavailable { status: u16 },

    #[error("refresh request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed refresh response: {0}")]
    Malformed(String),
}

/// A freshly minted token pair. The refresh token is optional because some
/// backends keep the old one valid instead of rotating it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RefreshedTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Fails cleanly for expired or revoked tokens so callers can fall back to
/// "no session".
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &RefreshToken) -> Result<RefreshedTokens, RefreshError>;
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Calls the backend's refresh endpoint.
#[derive(Clone)]
pub struct HttpTokenRefresher {
    client: Client,
    url: String,
}

impl HttpTokenRefresher {
    /// `client` is shared with the executor; clone is cheap.
    pub fn new(client: Client, base_url: &str, refresh_path: &str) -> Self {
        Self {
            client,
            url: format!(
                "{}/{}",
                base_url.trim_end_matches('/'),
                refresh_path.trim_start_matches('/')
            ),
        }
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    #[instrument(skip_all, fields(url = %self.url))]
    async fn refresh(&self, refresh_token: &RefreshToken) -> Result<RefreshedTokens, RefreshError> {
        let response = self
            .client
            .post(&self.url)
            .json(&RefreshRequest {
                refresh_token: refresh_token.as_str(),
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let status = status.as_u16();
            return Err(match status {
                400 | 401 | 403 => {
                    debug!(status, "Refresh rejected");
                    RefreshError::Rejected { status }
                }
                _ => {
                    debug!(status, "Refresh endpoint unavailable");
                    RefreshError::Unavailable { status }
                }
            });
        }

        let body = response.bytes().await?;
        let tokens: RefreshedTokens =
            serde_json::from_slice(&body).map_err(|e| RefreshError::Malformed(e.to_string()))?;
        if !is_installable(&tokens.access_token) {
            return Err(RefreshError::Malformed("unusable access_token".to_string()));
        }
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn refresher(server: &MockServer) -> HttpTokenRefresher {
        HttpTokenRefresher::new(Client::new(), &format!("{}/", server.uri()), "/auth/refresh")
    }

    #[tokio::test]
    async fn test_refresh_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .and(body_json(json!({"refresh_token": "r1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "a2",
                "refresh_token": "r2"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = refresher(&server)
            .refresh(&RefreshToken::new("r1"))
            .await
            .unwrap();
        assert_eq!(tokens.access_token, "a2");
        assert_eq!(tokens.refresh_token.as_deref(), Some("r2"));
    }

    #[tokio::test]
    async fn test_refresh_without_rotation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "a2"})))
            .mount(&server)
            .await;

        let tokens = refresher(&server)
            .refresh(&RefreshToken::new("r1"))
            .await
            .unwrap();
        assert!(tokens.refresh_token.is_none());
    }

    #[tokio::test]
    async fn test_expired_refresh_token_fails_cleanly() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "expired"})))
            .mount(&server)
            .await;

        let result = refresher(&server).refresh(&RefreshToken::new("old")).await;
        assert!(matches!(result, Err(RefreshError::Rejected { status: 401 })));
    }

    #[tokio::test]
    async fn test_outage_is_not_a_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh/limited"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let result = refresher(&server).refresh(&RefreshToken::new("r1")).await;
        assert!(matches!(result, Err(RefreshError::Unavailable { status: 503 })));

        let limited = HttpTokenRefresher::new(Client::new(), &server.uri(), "/auth/refresh/limited");
        let result = limited.refresh(&RefreshToken::new("r1")).await;
        assert!(matches!(result, Err(RefreshError::Unavailable { status: 429 })));
    }

    #[tokio::test]
    async fn test_access_token_that_cannot_be_sent_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "a\nb"})))
            .mount(&server)
            .await;

        let result = refresher(&server).refresh(&RefreshToken::new("r1")).await;
        assert!(matches!(result, Err(RefreshError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_malformed_refresh_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let result = refresher(&server).refresh(&RefreshToken::new("r1")).await;
        assert!(matches!(result, Err(RefreshError::Malformed(_))));
    }
}
