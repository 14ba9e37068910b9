use thiserror::Error;

/// Typed failure of an executed request.
///
/// Auth rejections are kept apart from every other HTTP failure so the UI can
/// send the user to the sign-in screen instead of showing a transient error.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Authentication rejected (HTTP {status})")]
    AuthRejected { status: u16, body: String },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error (HTTP {status}): {body}")]
    ServerError { status: u16, body: String },

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Malformed response from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Map a non-success status. `auth_rejected` is decided by the caller,
    /// which knows whether 400 counts as an auth failure.
    pub fn from_status(status: reqwest::StatusCode, body: &str, auth_rejected: bool) -> Self {
        let truncated = Self::truncate_body(body);
        if auth_rejected {
            return ApiError::AuthRejected {
                status: status.as_u16(),
                body: truncated,
            };
        }
        match status.as_u16() {
            404 => ApiError::NotFound(truncated),
            429 => ApiError::RateLimited,
            code @ 500..=599 => ApiError::ServerError {
                status: code,
                body: truncated,
            },
            code => ApiError::Http {
                status: code,
                body: truncated,
            },
        }
    }

    /// True when the UI should route to the sign-in screen.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ApiError::AuthRejected { .. })
    }

    /// HTTP status carried by this failure, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::AuthRejected { status, .. }
            | ApiError::ServerError { status, .. }
            | ApiError::Http { status, .. } => Some(*status),
            ApiError::NotFound(_) => Some(404),
            ApiError::RateLimited => Some(429),
            ApiError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
