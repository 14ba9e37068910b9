//! In-memory session tokens.

use std::fmt;
use std::sync::RwLock;

use reqwest::header::HeaderValue;
use tracing::{debug, info, warn};

/// Handle sent by a client that has no session yet.
pub const UNAUTHENTICATED_HANDLE: &str = "yourname";

/// A short-lived bearer credential. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AccessToken").field(&"[REDACTED]").finish()
    }
}

/// A longer-lived credential used to mint new access tokens. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshToken(String);

impl RefreshToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RefreshToken").field(&"[REDACTED]").finish()
    }
}

/// A whole-value copy of the session as seen by one request.
#[derive(Debug, Clone)]
pub struct TokenSnapshot {
    pub access_token: Option<AccessToken>,
    pub refresh_token: Option<RefreshToken>,
    /// Pre-built `Authorization` value, present iff `access_token` is.
    pub authorization: Option<HeaderValue>,
    pub handle: String,
    /// Bumped on every token install or clear.
    pub generation: u64,
}

impl Default for TokenSnapshot {
    fn default() -> Self {
        Self {
            access_token: None,
            refresh_token: None,
            authorization: None,
            handle: UNAUTHENTICATED_HANDLE.to_string(),
            generation: 0,
        }
    }
}

impl TokenSnapshot {
    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }
}

/// The single mutable session shared between the UI loop and worker tasks.
///
/// Writers replace the snapshot under the write lock and readers clone it
/// under the read lock, so a reader sees either the old or the new token.
#[derive(Debug, Default)]
pub struct TokenState {
    inner: RwLock<TokenSnapshot>,
}

impl TokenState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> TokenSnapshot {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn handle(&self) -> String {
        self.snapshot().handle
    }

    pub fn is_authenticated(&self) -> bool {
        self.snapshot().is_authenticated()
    }

    pub fn generation(&self) -> u64 {
        self.snapshot().generation
    }

    /// Install an access token and its outgoing header in one write.
    /// The refresh token held in memory, if any, is kept.
    /// Returns false, leaving the state untouched, if the token cannot be sent.
    pub fn set(&self, access_token: &str) -> bool {
        self.install(access_token, None)
    }

    /// Install an access token together with a refresh token.
    pub fn set_pair(&self, access_token: &str, refresh_token: Option<&str>) -> bool {
        self.install(access_token, Some(refresh_token))
    }

    fn install(&self, access_token: &str, refresh_token: Option<Option<&str>>) -> bool {
        let Some(authorization) = bearer_header(access_token) else {
            warn!("Refusing access token that is not a valid header value");
            return false;
        };

        let mut state = self.write();
        state.access_token = Some(AccessToken::new(access_token));
        state.authorization = Some(authorization);
        if let Some(refresh_token) = refresh_token {
            state.refresh_token = refresh_token.map(RefreshToken::new);
        }
        state.generation += 1;
        info!(
            kind = token_kind(access_token),
            generation = state.generation,
            "Installed access token"
        );
        true
    }

    /// Update the account identifier sent with every request.
    pub fn bind_handle(&self, handle: &str) {
        let mut state = self.write();
        if state.handle != handle {
            debug!(handle, "Bound handle");
            state.handle = handle.to_string();
        }
    }

    /// Drop every token and fall back to the unauthenticated handle.
    pub fn clear(&self) {
        let mut state = self.write();
        let generation = state.generation + 1;
        *state = TokenSnapshot {
            generation,
            ..TokenSnapshot::default()
        };
        info!(generation, "Cleared session tokens");
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, TokenSnapshot> {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Whether `token` can be carried in an `Authorization` header.
pub fn is_installable(token: &str) -> bool {
    !token.is_empty() && bearer_header(token).is_some()
}

fn bearer_header(token: &str) -> Option<HeaderValue> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", token)).ok()?;
    value.set_sensitive(true);
    Some(value)
}

fn token_kind(token: &str) -> &'static str {
    if token.matches('.').count() == 2 {
        "jwt"
    } else {
        "opaque"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_tokens_hide_value_in_debug() {
        let debug = format!("{:?}", AccessToken::new("eyJhbGciOiJIUzI1NiJ9.x.y"));
        assert!(!debug.contains("eyJ"));
        assert!(debug.contains("[REDACTED]"));

        let debug = format!("{:?}", RefreshToken::new("refresh_value"));
        assert!(!debug.contains("refresh_value"));
    }

    #[test]
    fn test_new_state_is_unauthenticated() {
        let state = TokenState::new();
        let snap = state.snapshot();
        assert!(!snap.is_authenticated());
        assert!(snap.authorization.is_none());
        assert_eq!(snap.handle, UNAUTHENTICATED_HANDLE);
    }

    #[test]
    fn test_set_installs_token_and_header_together() {
        let state = TokenState::new();
        state.set("abc123");
        let snap = state.snapshot();
        assert_eq!(snap.access_token.unwrap().as_str(), "abc123");
        assert_eq!(snap.authorization.unwrap(), "Bearer abc123");
        assert_eq!(snap.generation, 1);
    }

    #[test]
    fn test_set_keeps_refresh_token_and_set_pair_replaces_it() {
        let state = TokenState::new();
        state.set_pair("a1", Some("r1"));
        state.set("a2");
        assert_eq!(state.snapshot().refresh_token.unwrap().as_str(), "r1");

        state.set_pair("a3", None);
        assert!(state.snapshot().refresh_token.is_none());
    }

    #[test]
    fn test_invalid_header_token_is_refused() {
        let state = TokenState::new();
        assert!(state.set("good"));
        assert!(!state.set("bad\ntoken"));
        assert!(!is_installable("bad\ntoken"));
        assert!(!is_installable(""));
        let snap = state.snapshot();
        assert_eq!(snap.access_token.unwrap().as_str(), "good");
        assert_eq!(snap.generation, 1);
    }

    #[test]
    fn test_clear_resets_everything_but_bumps_generation() {
        let state = TokenState::new();
        state.set_pair("a", Some("r"));
        state.bind_handle("alice");
        state.clear();

        let snap = state.snapshot();
        assert!(snap.access_token.is_none());
        assert!(snap.refresh_token.is_none());
        assert!(snap.authorization.is_none());
        assert_eq!(snap.handle, UNAUTHENTICATED_HANDLE);
        assert_eq!(snap.generation, 2);
    }

    #[test]
    fn test_bind_handle_does_not_touch_tokens() {
        let state = TokenState::new();
        state.set("tok");
        state.bind_handle("bob");
        let snap = state.snapshot();
        assert_eq!(snap.handle, "bob");
        assert_eq!(snap.generation, 1);
    }

    #[test]
    fn test_concurrent_readers_never_see_torn_tokens() {
        let state = Arc::new(TokenState::new());
        let tokens: Vec<String> = (0..50).map(|i| format!("token-{i:03}")).collect();

        let writer = {
            let state = Arc::clone(&state);
            let tokens = tokens.clone();
            thread::spawn(move || {
                for token in &tokens {
                    state.set(token);
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let state = Arc::clone(&state);
                let tokens = tokens.clone();
                thread::spawn(move || {
                    for _ in 0..500 {
                        let snap = state.snapshot();
                        if let Some(token) = snap.access_token {
                            assert!(tokens.iter().any(|t| t == token.as_str()));
                            let header = snap.authorization.expect("header installed with token");
                            assert_eq!(header, format!("Bearer {}", token.as_str()).as_str());
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(state.snapshot().access_token.unwrap().as_str(), "token-049");
    }
}
