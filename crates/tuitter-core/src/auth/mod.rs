//! Session state and everything that produces it.
//!
//! This module provides:
//! - `TokenState`: the in-memory token pair shared by all requests
//! - `CredentialStore`: persisted credentials (keychain, file, memory)
//! - `TokenRefresher`: minting new access tokens from a refresh token
//! - `restore_at_startup`: the bounded restore loop run when the app starts
//! - `AuthFlowCoordinator`: interactive sign-in off the UI loop

pub mod credentials;
pub mod flow;
pub mod refresh;
pub mod startup;
pub mod tokens;

pub use credentials::{
    BlobShape, CredentialBlob, CredentialStore, FallbackStore, FileStore, KeyringStore,
    MemoryStore, StoreError, StoredTokens,
};
pub use flow::{
    AuthFlowCoordinator, AuthenticateError, Authenticator, FlowError, LoginCredentials,
    LoginError, LoginResult, LoginTokens,
};
pub use refresh::{HttpTokenRefresher, RefreshError, RefreshedTokens, TokenRefresher};
pub use startup::{restore_at_startup, RestoreBudget, RestoreOutcome, SessionRestorer};
pub use tokens::{AccessToken, RefreshToken, TokenSnapshot, TokenState, UNAUTHENTICATED_HANDLE};
