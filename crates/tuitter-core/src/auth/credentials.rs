//! Persisted credentials: the blob format and the stores that hold it.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use keyring::Entry;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

const SERVICE_NAME: &str = "tuitter";

/// Keyring entry holding the serialized blob.
const KEYRING_ENTRY: &str = "credentials";

/// Credentials file name in the config directory
const CREDENTIALS_FILE: &str = "credentials.json";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("credential file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("credential blob is not valid JSON: {0}")]
    Format(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTokens {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// The persisted form of a session.
///
/// Two shapes are accepted on read: the full `{username, tokens: {...}}`
/// blob and a bare `{refresh_token, username?}` left behind by a partial
/// write. Only the full shape is ever written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialBlob {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<StoredTokens>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// What a blob can be used for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobShape<'a> {
    Full {
        access_token: &'a str,
        refresh_token: Option<&'a str>,
    },
    RefreshOnly {
        refresh_token: &'a str,
    },
    Empty,
}

impl CredentialBlob {
    pub fn full(username: &str, access_token: &str, refresh_token: Option<&str>) -> Self {
        Self {
            username: Some(username.to_string()).filter(|u| !u.is_empty()),
            tokens: Some(StoredTokens {
                access_token: Some(access_token.to_string()),
                refresh_token: refresh_token.map(str::to_string),
            }),
            refresh_token: None,
        }
    }

    pub fn refresh_only(username: Option<&str>, refresh_token: &str) -> Self {
        Self {
            username: username.map(str::to_string),
            tokens: None,
            refresh_token: Some(refresh_token.to_string()),
        }
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref().filter(|u| !u.is_empty())
    }

    /// Refresh token from the `tokens` wrapper, else the top-level one.
    pub fn refresh_token(&self) -> Option<&str> {
        self.tokens
            .as_ref()
            .and_then(|t| t.refresh_token.as_deref())
            .or(self.refresh_token.as_deref())
            .filter(|t| !t.is_empty())
    }

    pub fn access_token(&self) -> Option<&str> {
        self.tokens
            .as_ref()
            .and_then(|t| t.access_token.as_deref())
            .filter(|t| !t.is_empty())
    }

    pub fn shape(&self) -> BlobShape<'_> {
        match (self.access_token(), self.refresh_token()) {
            (Some(access_token), refresh_token) => BlobShape::Full {
                access_token,
                refresh_token,
            },
            (None, Some(refresh_token)) => BlobShape::RefreshOnly { refresh_token },
            (None, None) => BlobShape::Empty,
        }
    }
}

/// Synchronous persistence for the credential blob.
///
/// Implementations must be callable from worker tasks without touching UI state.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Option<CredentialBlob>, StoreError>;
    fn save(&self, blob: &CredentialBlob) -> Result<(), StoreError>;
    fn clear(&self) -> Result<(), StoreError>;
}

/// Blob kept in the OS keychain.
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new() -> Self {
        Self {
            service: SERVICE_NAME.to_string(),
        }
    }

    fn entry(&self) -> Result<Entry, StoreError> {
        Ok(Entry::new(&self.service, KEYRING_ENTRY)?)
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeyringStore {
    fn load(&self) -> Result<Option<CredentialBlob>, StoreError> {
        match self.entry()?.get_password() {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, blob: &CredentialBlob) -> Result<(), StoreError> {
        let raw = serde_json::to_string(blob)?;
        self.entry()?.set_password(&raw)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Blob kept as a JSON file, used where no keychain is available.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(CREDENTIALS_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileStore {
    fn load(&self) -> Result<Option<CredentialBlob>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&contents)?))
    }

    fn save(&self, blob: &CredentialBlob) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(blob)?;
        // Write then rename so readers never see a half-written blob.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, contents)?;
        restrict_permissions(&tmp)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Keychain first, file when the keychain is unavailable.
pub struct FallbackStore<P, F> {
    primary: P,
    fallback: F,
}

impl<P: CredentialStore, F: CredentialStore> FallbackStore<P, F> {
    pub fn new(primary: P, fallback: F) -> Self {
        Self { primary, fallback }
    }
}

impl<P: CredentialStore, F: CredentialStore> CredentialStore for FallbackStore<P, F> {
    fn load(&self) -> Result<Option<CredentialBlob>, StoreError> {
        match self.primary.load() {
            Ok(Some(blob)) => return Ok(Some(blob)),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Primary credential store unreadable, trying fallback"),
        }
        self.fallback.load()
    }

    fn save(&self, blob: &CredentialBlob) -> Result<(), StoreError> {
        match self.primary.save(blob) {
            Ok(()) => {
                // A stale fallback copy would shadow nothing, but would outlive sign-out.
                if let Err(e) = self.fallback.clear() {
                    debug!(error = %e, "Failed to clear fallback credentials");
                }
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Primary credential store failed, writing fallback");
                self.fallback.save(blob)
            }
        }
    }

    fn clear(&self) -> Result<(), StoreError> {
        let primary = self.primary.clear();
        let fallback = self.fallback.clear();
        primary.and(fallback)
    }
}

/// In-process store. Counts writes so callers can assert on persistence.
#[derive(Default)]
pub struct MemoryStore {
    blob: Mutex<Option<CredentialBlob>>,
    saves: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blob(blob: CredentialBlob) -> Self {
        Self {
            blob: Mutex::new(Some(blob)),
            saves: Mutex::new(0),
        }
    }

    pub fn current(&self) -> Option<CredentialBlob> {
        self.blob.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl CredentialStore for MemoryStore {
    fn load(&self) -> Result<Option<CredentialBlob>, StoreError> {
        Ok(self.current())
    }

    fn save(&self, blob: &CredentialBlob) -> Result<(), StoreError> {
        *self.blob.lock().unwrap_or_else(|p| p.into_inner()) = Some(blob.clone());
        *self.saves.lock().unwrap_or_else(|p| p.into_inner()) += 1;
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.blob.lock().unwrap_or_else(|p| p.into_inner()) = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenStore;

    impl CredentialStore for BrokenStore {
        fn load(&self) -> Result<Option<CredentialBlob>, StoreError> {
            Err(keyring::Error::PlatformFailure("no keychain".into()).into())
        }
        fn save(&self, _blob: &CredentialBlob) -> Result<(), StoreError> {
            Err(keyring::Error::PlatformFailure("no keychain".into()).into())
        }
        fn clear(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[test]
    fn test_full_blob_shape() {
        let blob: CredentialBlob = serde_json::from_str(
            r#"{"username": "alice", "tokens": {"access_token": "a1", "refresh_token": "r1"}}"#,
        )
        .unwrap();
        assert_eq!(blob.username(), Some("alice"));
        assert_eq!(
            blob.shape(),
            BlobShape::Full {
                access_token: "a1",
                refresh_token: Some("r1")
            }
        );
    }

    #[test]
    fn test_refresh_only_blob_shape() {
        let blob: CredentialBlob = serde_json::from_str(r#"{"refresh_token": "r1"}"#).unwrap();
        assert_eq!(blob.username(), None);
        assert_eq!(blob.shape(), BlobShape::RefreshOnly { refresh_token: "r1" });

        // A tokens wrapper without an access token is refresh-only too.
        let blob: CredentialBlob =
            serde_json::from_str(r#"{"username": "bob", "tokens": {"refresh_token": "r2"}}"#)
                .unwrap();
        assert_eq!(blob.shape(), BlobShape::RefreshOnly { refresh_token: "r2" });
    }

    #[test]
    fn test_top_level_refresh_token_backs_up_full_blob() {
        let blob: CredentialBlob = serde_json::from_str(
            r#"{"username": "alice", "tokens": {"access_token": "a1"}, "refresh_token": "r9"}"#,
        )
        .unwrap();
        assert_eq!(
            blob.shape(),
            BlobShape::Full {
                access_token: "a1",
                refresh_token: Some("r9")
            }
        );
    }

    #[test]
    fn test_empty_strings_are_absent() {
        let blob: CredentialBlob = serde_json::from_str(
            r#"{"username": "", "tokens": {"access_token": "", "refresh_token": ""}}"#,
        )
        .unwrap();
        assert_eq!(blob.shape(), BlobShape::Empty);
        assert_eq!(blob.username(), None);
    }

    #[test]
    fn test_written_blob_is_full_shape() {
        let blob = CredentialBlob::full("alice", "a1", Some("r1"));
        let json = serde_json::to_value(&blob).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "username": "alice",
                "tokens": {"access_token": "a1", "refresh_token": "r1"}
            })
        );
    }

    #[test]
    fn test_file_store_round_trip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested"));
        assert!(store.load().unwrap().is_none());

        let blob = CredentialBlob::full("alice", "a1", None);
        store.save(&blob).unwrap();
        assert_eq!(store.load().unwrap(), Some(blob));

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
        store.clear().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.save(&CredentialBlob::full("alice", "a1", None)).unwrap();
        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_file_store_reports_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        fs::write(store.path(), "{not json").unwrap();
        assert!(matches!(store.load(), Err(StoreError::Format(_))));
    }

    #[test]
    fn test_fallback_store_uses_file_when_keychain_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = FallbackStore::new(BrokenStore, FileStore::new(dir.path()));

        let blob = CredentialBlob::full("alice", "a1", Some("r1"));
        store.save(&blob).unwrap();
        assert_eq!(store.load().unwrap(), Some(blob));

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_fallback_store_prefers_primary() {
        let primary = MemoryStore::with_blob(CredentialBlob::full("alice", "primary", None));
        let fallback = MemoryStore::with_blob(CredentialBlob::full("alice", "stale", None));
        let store = FallbackStore::new(primary, fallback);
        assert_eq!(store.load().unwrap().unwrap().access_token(), Some("primary"));
    }

    #[test]
    fn test_memory_store_counts_saves() {
        let store = MemoryStore::new();
        store.save(&CredentialBlob::full("a", "b", None)).unwrap();
        store.save(&CredentialBlob::full("a", "c", None)).unwrap();
        assert_eq!(store.save_count(), 2);
        store.clear().unwrap();
        assert!(store.current().is_none());
    }
}
