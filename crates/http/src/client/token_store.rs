//! Session persistence
//!
//! The session is kept under four keys: the access token, the refresh token,
//! the JSON-encoded user profile and the access token expiry in epoch
//! milliseconds. [`TokenStorage`] is the raw key/value backend and
//! [`TokenStore`] the typed view the rest of the client uses.

use super::error::StoreError;
use chrono::{DateTime, Utc};
use crm_core::{Clock, SessionTokens, SystemClock, UserProfile, parse_expiry_millis};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Storage keys
pub mod keys {
    pub const ACCESS_TOKEN: &str = "access_token";
    pub const REFRESH_TOKEN: &str = "refresh_token";
    pub const USER: &str = "user";
    pub const TOKEN_EXPIRY: &str = "token_expiry";

    pub const ALL: [&str; 4] = [ACCESS_TOKEN, REFRESH_TOKEN, USER, TOKEN_EXPIRY];
}

/// Durable key/value backend for session state
pub trait TokenStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// Write several keys as one update
    fn set_many(&self, entries: &[(&str, String)]) -> Result<(), StoreError>;

    /// Remove every session key as one update
    fn clear_all(&self) -> Result<(), StoreError>;
}

/// In-process storage; the session ends with the process
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStorage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set_many(&self, entries: &[(&str, String)]) -> Result<(), StoreError> {
        let mut map = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        for (key, value) in entries {
            map.insert((*key).to_string(), value.clone());
        }
        Ok(())
    }

    fn clear_all(&self) -> Result<(), StoreError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }
}

/// JSON file storage, rewritten through a temp file and rename on every update
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileStorage {
    /// Open (or lazily create) the session file at `path`
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = match fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => HashMap::new(),
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(path = %path.display(), "Discarding unreadable session file: {err}");
                    HashMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// `<data_dir>/session.json`
    pub fn in_dir(data_dir: &Path) -> Result<Self, StoreError> {
        Self::open(data_dir.join("session.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &HashMap<String, String>) -> Result<(), StoreError> {
        if entries.is_empty() {
            return match fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err.into()),
            };
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        restrict_permissions(&tmp)?;
        fs::rename(&tmp, &self.path)?;
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

impl TokenStorage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set_many(&self, entries: &[(&str, String)]) -> Result<(), StoreError> {
        let mut map = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        // The in-memory view always holds the latest session, even if the file lags.
        for (key, value) in entries {
            map.insert((*key).to_string(), value.clone());
        }
        self.persist(&map)
    }

    fn clear_all(&self) -> Result<(), StoreError> {
        let mut map = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        // Forget the session in memory even if the file cannot be removed.
        map.clear();
        self.persist(&map)
    }
}

/// Typed access to the persisted session
#[derive(Clone)]
pub struct TokenStore {
    storage: Arc<dyn TokenStorage>,
    clock: Arc<dyn Clock>,
}

impl TokenStore {
    pub fn new(storage: Arc<dyn TokenStorage>, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    /// Memory-backed store on the system clock
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()), Arc::new(SystemClock))
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn access_token(&self) -> Option<String> {
        self.non_empty(keys::ACCESS_TOKEN)
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.non_empty(keys::REFRESH_TOKEN)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.storage.get(keys::TOKEN_EXPIRY)?;
        parse_expiry_millis(&raw)
            .inspect_err(|err| warn!("Ignoring token expiry in session storage: {err}"))
            .ok()
    }

    pub fn user(&self) -> Option<UserProfile> {
        let raw = self.storage.get(keys::USER)?;
        UserProfile::from_json(&raw)
            .inspect_err(|err| warn!("Ignoring user profile in session storage: {err}"))
            .ok()
    }

    /// Full token pair, when all three parts are present
    pub fn session_tokens(&self) -> Option<SessionTokens> {
        Some(SessionTokens {
            access_token: self.access_token()?,
            refresh_token: self.refresh_token()?,
            expires_at: self.expires_at()?,
        })
    }

    /// Persist a new session: tokens, expiry and profile in one write
    pub fn save_session(
        &self,
        tokens: &SessionTokens,
        user: &UserProfile,
    ) -> Result<(), StoreError> {
        let user = serde_json::to_string(user)?;
        self.storage.set_many(&[
            (keys::ACCESS_TOKEN, tokens.access_token.clone()),
            (keys::REFRESH_TOKEN, tokens.refresh_token.clone()),
            (keys::USER, user),
            (keys::TOKEN_EXPIRY, tokens.expires_at.timestamp_millis().to_string()),
        ])
    }

    /// True when no expiry is recorded or it has passed
    pub fn is_expired(&self) -> bool {
        self.expires_at().is_none_or(|expires_at| self.now() >= expires_at)
    }

    pub fn has_session(&self) -> bool {
        self.access_token().is_some() || self.refresh_token().is_some()
    }

    pub fn clear_all(&self) -> Result<(), StoreError> {
        self.storage.clear_all()
    }

    fn non_empty(&self, key: &str) -> Option<String> {
        self.storage.get(key).filter(|value| !value.is_empty())
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("has_session", &self.has_session())
            .field("expires_at", &self.expires_at())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use crm_core::ManualClock;

    fn profile() -> UserProfile {
        UserProfile {
            email: "ana@example.com".into(),
            user_id: "42".into(),
            first_name: Some("Ana".into()),
            last_name: None,
        }
    }

    fn store_with_clock() -> (TokenStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let store = TokenStore::new(Arc::new(MemoryStorage::new()), clock.clone());
        (store, clock)
    }

    #[test]
    fn save_session_populates_all_four_keys() {
        let (store, clock) = store_with_clock();
        let tokens = SessionTokens {
            access_token: "access".into(),
            refresh_token: "refresh".into(),
            expires_at: clock.now() + Duration::hours(1),
        };
        store.save_session(&tokens, &profile()).unwrap();

        assert_eq!(store.access_token().as_deref(), Some("access"));
        assert_eq!(store.refresh_token().as_deref(), Some("refresh"));
        assert_eq!(store.user(), Some(profile()));
        assert_eq!(
            store.expires_at().map(|t| t.timestamp_millis()),
            Some(tokens.expires_at.timestamp_millis())
        );
        assert!(!store.is_expired());
    }

    #[test]
    fn expiry_follows_the_clock() {
        let (store, clock) = store_with_clock();
        let tokens = SessionTokens {
            access_token: "access".into(),
            refresh_token: "refresh".into(),
            expires_at: clock.now() + Duration::seconds(600),
        };
        store.save_session(&tokens, &profile()).unwrap();
        assert!(!store.is_expired());
        clock.advance(Duration::seconds(600));
        assert!(store.is_expired());
    }

    #[test]
    fn missing_or_malformed_expiry_counts_as_expired() {
        let storage = Arc::new(MemoryStorage::new());
        let store = TokenStore::new(storage.clone(), Arc::new(SystemClock));
        assert!(store.is_expired());

        storage
            .set_many(&[(keys::TOKEN_EXPIRY, "soon".to_string())])
            .unwrap();
        assert!(store.expires_at().is_none());
        assert!(store.is_expired());
    }

    #[test]
    fn clear_all_removes_everything() {
        let (store, clock) = store_with_clock();
        let tokens = SessionTokens {
            access_token: "access".into(),
            refresh_token: "refresh".into(),
            expires_at: clock.now() + Duration::hours(1),
        };
        store.save_session(&tokens, &profile()).unwrap();
        store.clear_all().unwrap();

        assert!(!store.has_session());
        assert!(store.user().is_none());
        assert!(store.expires_at().is_none());
    }

    #[test]
    fn file_storage_survives_reopen_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::in_dir(dir.path()).unwrap();
        storage
            .set_many(&[
                (keys::ACCESS_TOKEN, "access".to_string()),
                (keys::REFRESH_TOKEN, "refresh".to_string()),
            ])
            .unwrap();

        let reopened = FileStorage::in_dir(dir.path()).unwrap();
        assert_eq!(reopened.get(keys::ACCESS_TOKEN).as_deref(), Some("access"));

        reopened.clear_all().unwrap();
        assert!(!reopened.path().exists());
        for key in keys::ALL {
            assert!(FileStorage::in_dir(dir.path()).unwrap().get(key).is_none());
        }
    }

    #[test]
    fn corrupt_session_file_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("session.json"), b"{not json").unwrap();
        let storage = FileStorage::in_dir(dir.path()).unwrap();
        assert!(storage.get(keys::ACCESS_TOKEN).is_none());
    }

    #[test]
    fn failed_write_still_updates_memory() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::in_dir(dir.path()).unwrap();
        // A directory where the temp file goes makes every write fail.
        std::fs::create_dir(dir.path().join("session.json.tmp")).unwrap();

        let result = storage.set_many(&[(keys::ACCESS_TOKEN, "new".to_string())]);

        assert!(matches!(result, Err(StoreError::Io(_))));
        assert_eq!(storage.get(keys::ACCESS_TOKEN).as_deref(), Some("new"));
        assert!(!storage.path().exists());
    }
}
