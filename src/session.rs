// Session store
// Holds the signed-in user's credentials in memory and mirrors them to durable storage.
// Every write goes to storage first; memory is only updated once storage accepted it.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::models::{UserId, UserProfile};

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCredentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub user: Option<UserProfile>,
}

impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("user", &self.user)
            .finish()
    }
}

/// Durable storage for the session. Implementations must replace the stored
/// credentials as a whole.
pub trait SessionStorage: Send + Sync + 'static {
    fn load(&self) -> Result<Option<SessionCredentials>, ApiError>;
    fn save(&self, credentials: &SessionCredentials) -> Result<(), ApiError>;
    fn clear(&self) -> Result<(), ApiError>;
}

/// JSON file storage. Saves go through a temporary file and a rename so a crash
/// never leaves a half-written session behind.
#[derive(Debug, Clone)]
pub struct FileSessionStorage {
    path: PathBuf,
}

impl FileSessionStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "session".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn storage_error(context: &str, err: impl fmt::Display) -> ApiError {
    ApiError::StorageError(format!("{}: {}", context, err))
}

impl SessionStorage for FileSessionStorage {
    fn load(&self) -> Result<Option<SessionCredentials>, ApiError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_error("read session", e)),
        };

        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|e| storage_error("parse session", e))
    }

    fn save(&self, credentials: &SessionCredentials) -> Result<(), ApiError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| storage_error("create session dir", e))?;
        }

        let json =
            serde_json::to_vec(credentials).map_err(|e| storage_error("encode session", e))?;
        let temp = self.temp_path();

        let mut file = fs::File::create(&temp).map_err(|e| storage_error("write session", e))?;
        file.write_all(&json)
            .and_then(|_| file.sync_all())
            .map_err(|e| storage_error("write session", e))?;
        drop(file);

        fs::rename(&temp, &self.path).map_err(|e| storage_error("commit session", e))
    }

    fn clear(&self) -> Result<(), ApiError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error("remove session", e)),
        }
    }
}

/// Volatile storage, for tests and short-lived tools.
#[derive(Debug, Default)]
pub struct MemorySessionStorage {
    stored: Mutex<Option<SessionCredentials>>,
    fail_writes: AtomicBool,
}

impl MemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(credentials: SessionCredentials) -> Self {
        Self {
            stored: Mutex::new(Some(credentials)),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make subsequent saves fail, to exercise the no-divergence guarantee.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn stored(&self) -> Option<SessionCredentials> {
        self.stored.lock().clone()
    }
}

impl SessionStorage for MemorySessionStorage {
    fn load(&self) -> Result<Option<SessionCredentials>, ApiError> {
        Ok(self.stored.lock().clone())
    }

    fn save(&self, credentials: &SessionCredentials) -> Result<(), ApiError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ApiError::StorageError("storage unavailable".to_string()));
        }
        *self.stored.lock() = Some(credentials.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), ApiError> {
        *self.stored.lock() = None;
        Ok(())
    }
}

impl<S: SessionStorage> SessionStorage for Arc<S> {
    fn load(&self) -> Result<Option<SessionCredentials>, ApiError> {
        (**self).load()
    }

    fn save(&self, credentials: &SessionCredentials) -> Result<(), ApiError> {
        (**self).save(credentials)
    }

    fn clear(&self) -> Result<(), ApiError> {
        (**self).clear()
    }
}

/// The process-wide session, passed around explicitly as `Arc<Session>`.
pub struct Session {
    current: RwLock<Option<SessionCredentials>>,
    storage: Box<dyn SessionStorage>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("current", &*self.current.read())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// An empty session backed by `storage`. Call [`Session::restore`] to pick
    /// up credentials persisted by an earlier run.
    pub fn new(storage: impl SessionStorage) -> Self {
        Self {
            current: RwLock::new(None),
            storage: Box::new(storage),
        }
    }

    /// Load persisted credentials into memory. Returns whether a session was found.
    pub fn restore(&self) -> Result<bool, ApiError> {
        let mut current = self.current.write();
        let loaded = self.storage.load()?;
        let found = loaded.is_some();
        *current = loaded;
        debug!(found, "restored session");
        Ok(found)
    }

    pub fn credentials(&self) -> Option<SessionCredentials> {
        self.current.read().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.current.read().as_ref().map(|c| c.access_token.clone())
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.current
            .read()
            .as_ref()
            .and_then(|c| c.refresh_token.clone())
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.current.read().as_ref().and_then(|c| c.user.clone())
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user().map(|u| u.id)
    }

    pub fn is_signed_in(&self) -> bool {
        self.current.read().is_some()
    }

    /// Replace the whole session. Storage is written first under the write
    /// lock; if it fails the in-memory copy is left untouched.
    pub(crate) fn replace(&self, credentials: SessionCredentials) -> Result<(), ApiError> {
        let mut current = self.current.write();
        self.storage.save(&credentials)?;
        *current = Some(credentials);
        Ok(())
    }

    /// Swap in renewed tokens, keeping the signed-in user.
    ///
    /// `used_refresh` is the refresh token the renewal was made with. If the
    /// session was cleared or replaced since, nothing is written and
    /// [`ApiError::SessionExpired`] is returned.
    pub(crate) fn renew(
        &self,
        used_refresh: &str,
        access_token: String,
        refresh_token: Option<String>,
    ) -> Result<(), ApiError> {
        let mut current = self.current.write();
        let Some(previous) = current
            .as_ref()
            .filter(|c| c.refresh_token.as_deref() == Some(used_refresh))
        else {
            return Err(ApiError::SessionExpired);
        };

        let renewed = SessionCredentials {
            access_token,
            refresh_token: refresh_token.or_else(|| previous.refresh_token.clone()),
            user: previous.user.clone(),
        };

        self.storage.save(&renewed)?;
        *current = Some(renewed);
        Ok(())
    }

    /// Drop everything. Memory is always cleared; a storage failure is still reported.
    pub fn clear(&self) -> Result<(), ApiError> {
        let mut current = self.current.write();
        *current = None;
        let result = self.storage.clear();
        if let Err(e) = &result {
            warn!(error = %e, "failed to clear persisted session");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials(access: &str) -> SessionCredentials {
        SessionCredentials {
            access_token: access.to_string(),
            refresh_token: Some("refresh-1".to_string()),
            user: Some(UserProfile {
                id: UserId::new("u-1"),
                email: "ada@example.com".to_string(),
                name: "Ada".to_string(),
            }),
        }
    }

    #[test]
    fn test_file_storage_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");

        let session = Session::new(FileSessionStorage::new(&path));
        session.replace(credentials("access-1")).unwrap();
        assert!(path.exists());

        let restarted = Session::new(FileSessionStorage::new(&path));
        assert!(!restarted.is_signed_in());
        assert!(restarted.restore().unwrap());
        assert_eq!(restarted.access_token().as_deref(), Some("access-1"));
        assert_eq!(restarted.user_id(), Some(UserId::new("u-1")));

        restarted.clear().unwrap();
        assert!(!path.exists());
        assert!(!Session::new(FileSessionStorage::new(&path)).restore().unwrap());
    }

    #[test]
    fn test_failed_save_leaves_memory_untouched() {
        let storage = Arc::new(MemorySessionStorage::new());
        let session = Session::new(storage.clone());
        session.replace(credentials("access-1")).unwrap();

        storage.set_fail_writes(true);
        let result = session.renew("refresh-1", "access-2".to_string(), None);
        assert!(matches!(result, Err(ApiError::StorageError(_))));

        // both copies still agree on the old token
        assert_eq!(session.access_token().as_deref(), Some("access-1"));
        assert_eq!(storage.stored().unwrap().access_token, "access-1");
    }

    #[test]
    fn test_renew_keeps_user_and_refresh_token() {
        let storage = Arc::new(MemorySessionStorage::new());
        let session = Session::new(storage.clone());
        session.replace(credentials("access-1")).unwrap();

        session.renew("refresh-1", "access-2".to_string(), None).unwrap();

        let stored = storage.stored().unwrap();
        assert_eq!(stored.access_token, "access-2");
        assert_eq!(stored.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(session.user().unwrap().email, "ada@example.com");
    }

    #[test]
    fn test_renew_after_clear_writes_nothing() {
        let storage = Arc::new(MemorySessionStorage::new());
        let session = Session::new(storage.clone());
        session.replace(credentials("access-1")).unwrap();
        session.clear().unwrap();

        let result = session.renew("refresh-1", "access-2".to_string(), None);
        assert_eq!(result, Err(ApiError::SessionExpired));
        assert!(!session.is_signed_in());
        assert!(storage.stored().is_none());
    }

    #[test]
    fn test_renew_ignores_a_replaced_session() {
        let storage = Arc::new(MemorySessionStorage::new());
        let session = Session::new(storage.clone());
        session.replace(credentials("access-1")).unwrap();

        let result = session.renew("refresh-old", "access-2".to_string(), None);
        assert_eq!(result, Err(ApiError::SessionExpired));
        assert_eq!(storage.stored().unwrap().access_token, "access-1");
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let rendered = format!("{:?}", credentials("secret-access"));
        assert!(!rendered.contains("secret-access"));
        assert!(!rendered.contains("refresh-1"));
    }
}
