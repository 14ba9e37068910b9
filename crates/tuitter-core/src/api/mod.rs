//! REST client for the tuitter backend.
//!
//! `SessionClient` attaches the session to every call and, when the backend
//! rejects it, restores the session from persisted credentials and retries
//! the call once.

pub mod client;
pub mod error;
pub mod request;
mod restore;

pub use client::SessionClient;
pub use error::ApiError;
pub use request::ApiRequest;
