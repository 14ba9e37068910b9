//! Sign-in through an external helper command.
//!
//! The helper runs the browser OAuth flow and prints the credentials as
//! JSON on stdout: `{"username": ..., "tokens": {"access_token": ..., "refresh_token": ...}}`.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument};
use tuitter_core::auth::{AuthenticateError, Authenticator, LoginCredentials};

/// Longest helper stderr kept in an error message
const MAX_STDERR_LENGTH: usize = 200;

pub struct CommandAuthenticator {
    command: String,
}

impl CommandAuthenticator {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    fn shell_command(&self) -> Command {
        #[cfg(windows)]
        {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(&self.command);
            cmd
        }
        #[cfg(not(windows))]
        {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(&self.command);
            cmd
        }
    }
}

#[async_trait]
impl Authenticator for CommandAuthenticator {
    #[instrument(skip(self))]
    async fn authenticate(&self) -> Result<LoginCredentials, AuthenticateError> {
        // The terminal belongs to the UI; the helper gets no stdin.
        let output = self
            .shell_command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AuthenticateError::Unexpected(format!("could not run sign-in helper: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr.trim();
            debug!(status = ?output.status.code(), "Sign-in helper failed");
            return Err(AuthenticateError::Failed(if reason.is_empty() {
                "Sign-in was cancelled".to_string()
            } else {
                reason.chars().take(MAX_STDERR_LENGTH).collect()
            }));
        }

        parse_credentials(&output.stdout)
    }
}

/// Read the last non-empty stdout line, so helpers may log progress first.
fn parse_credentials(stdout: &[u8]) -> Result<LoginCredentials, AuthenticateError> {
    let stdout = String::from_utf8_lossy(stdout);
    let line = stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| AuthenticateError::Unexpected("sign-in helper printed nothing".to_string()))?;

    let credentials: LoginCredentials = serde_json::from_str(line)
        .map_err(|e| AuthenticateError::Unexpected(format!("invalid credentials from helper: {}", e)))?;
    if credentials.tokens.access_token.is_empty() {
        return Err(AuthenticateError::Unexpected(
            "sign-in helper returned no access token".to_string(),
        ));
    }
    Ok(credentials)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_credentials_takes_last_line() {
        let stdout = b"opening browser...\n{\"username\":\"alice\",\"tokens\":{\"access_token\":\"a1\",\"refresh_token\":\"r1\"}}\n\n";
        let credentials = parse_credentials(stdout).unwrap();
        assert_eq!(credentials.username, "alice");
        assert_eq!(credentials.tokens.access_token, "a1");
        assert_eq!(credentials.tokens.refresh_token.as_deref(), Some("r1"));
    }

    #[test]
    fn test_parse_credentials_rejects_garbage() {
        assert!(matches!(
            parse_credentials(b"not json"),
            Err(AuthenticateError::Unexpected(_))
        ));
        assert!(matches!(
            parse_credentials(b"  \n"),
            Err(AuthenticateError::Unexpected(_))
        ));
        assert!(matches!(
            parse_credentials(br#"{"username":"a","tokens":{"access_token":""}}"#),
            Err(AuthenticateError::Unexpected(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_helper_success() {
        let auth = CommandAuthenticator::new(
            r#"echo '{"username":"bob","tokens":{"access_token":"a9"}}'"#,
        );
        let credentials = auth.authenticate().await.unwrap();
        assert_eq!(credentials.username, "bob");
        assert!(credentials.tokens.refresh_token.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_helper_failure_is_retryable_error() {
        let auth = CommandAuthenticator::new("echo 'access denied' >&2; exit 3");
        match auth.authenticate().await {
            Err(AuthenticateError::Failed(reason)) => assert_eq!(reason, "access denied"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_silent_helper_failure_reads_as_cancelled() {
        let auth = CommandAuthenticator::new("exit 1");
        match auth.authenticate().await {
            Err(AuthenticateError::Failed(reason)) => assert_eq!(reason, "Sign-in was cancelled"),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
