//! Core library for tuitter.
//!
//! Holds the authenticated session layer shared by the terminal client:
//! token state, the request executor with restore-and-retry, credential
//! persistence, startup restore and the sign-in coordinator.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiError, ApiRequest, SessionClient};
pub use auth::{
    restore_at_startup, AuthFlowCoordinator, Authenticator, CredentialBlob, CredentialStore,
    LoginCredentials, LoginError, LoginResult, RestoreBudget, RestoreOutcome, TokenState,
};
pub use config::Config;
