//! Credential store.
//!
//! Owns the persisted `(access, refresh, username)` triple. Writes go to the
//! backend first and then to an in-memory snapshot, so readers (request
//! header attachment in particular) never touch the backend and always see
//! either the previous or the new triple.

use crate::{SecureStorage, StorageError, StorageKeys, StorageResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// The persisted credential triple.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredentials {
    pub access: String,
    pub refresh: String,
    pub username: String,
}

impl StoredCredentials {
    pub fn new(
        access: impl Into<String>,
        refresh: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
            username: username.into(),
        }
    }
}

impl fmt::Debug for StoredCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredCredentials")
            .field("access", &"<redacted>")
            .field("refresh", &"<redacted>")
            .field("username", &self.username)
            .finish()
    }
}

/// Process-wide credential store with a write-through snapshot.
pub struct CredentialStore {
    storage: Box<dyn SecureStorage>,
    snapshot: RwLock<Option<StoredCredentials>>,
}

impl CredentialStore {
    /// Open a store over `storage`, loading whatever triple is persisted.
    ///
    /// A partially persisted triple loads as nothing.
    pub fn open(storage: Box<dyn SecureStorage>) -> StorageResult<Self> {
        let access = storage.get(StorageKeys::ACCESS)?;
        let refresh = storage.get(StorageKeys::REFRESH)?;
        let username = storage.get(StorageKeys::USERNAME)?;

        let snapshot = match (access, refresh, username) {
            (Some(access), Some(refresh), Some(username)) => {
                Some(StoredCredentials { access, refresh, username })
            }
            (None, None, None) => None,
            _ => {
                warn!("incomplete credentials in storage, ignoring");
                None
            }
        };

        Ok(Self {
            storage,
            snapshot: RwLock::new(snapshot),
        })
    }

    /// Store backed by [`crate::MemoryStorage`].
    pub fn in_memory() -> Self {
        Self {
            storage: Box::new(crate::MemoryStorage::new()),
            snapshot: RwLock::new(None),
        }
    }

    /// Overwrite all three values.
    pub fn save(&self, credentials: &StoredCredentials) -> StorageResult<()> {
        let mut snapshot = self.snapshot.write();
        self.storage.set_many(&[
            (StorageKeys::ACCESS, credentials.access.as_str()),
            (StorageKeys::REFRESH, credentials.refresh.as_str()),
            (StorageKeys::USERNAME, credentials.username.as_str()),
        ])?;
        *snapshot = Some(credentials.clone());
        debug!(username = %credentials.username, "credentials saved");
        Ok(())
    }

    /// Current triple, or `None` if never saved or cleared.
    pub fn load(&self) -> Option<StoredCredentials> {
        self.snapshot.read().clone()
    }

    /// Remove all three values. Idempotent.
    ///
    /// The snapshot is dropped even when the backend delete fails, so no
    /// reader keeps attaching a token that is being discarded.
    pub fn clear(&self) -> StorageResult<()> {
        let mut snapshot = self.snapshot.write();
        let had_credentials = snapshot.take().is_some();
        self.storage.delete_many(&StorageKeys::ALL)?;
        if had_credentials {
            debug!("credentials cleared");
        }
        Ok(())
    }

    /// Replace the access token and, when given, the refresh token.
    /// The username is kept.
    pub fn rotate_tokens(&self, access: &str, refresh: Option<&str>) -> StorageResult<()> {
        let mut snapshot = self.snapshot.write();
        let current = snapshot
            .as_ref()
            .ok_or_else(|| StorageError::NotFound("credentials".to_string()))?;

        let next = StoredCredentials {
            access: access.to_string(),
            refresh: refresh.map(str::to_string).unwrap_or_else(|| current.refresh.clone()),
            username: current.username.clone(),
        };

        match refresh {
            Some(refresh) => self.storage.set_many(&[
                (StorageKeys::ACCESS, access),
                (StorageKeys::REFRESH, refresh),
            ])?,
            None => self.storage.set(StorageKeys::ACCESS, access)?,
        }

        debug!(refresh_rotated = refresh.is_some(), "tokens rotated");
        *snapshot = Some(next);
        Ok(())
    }

    pub fn access_token(&self) -> Option<String> {
        self.snapshot.read().as_ref().map(|c| c.access.clone())
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.snapshot.read().as_ref().map(|c| c.refresh.clone())
    }

    pub fn username(&self) -> Option<String> {
        self.snapshot.read().as_ref().map(|c| c.username.clone())
    }

    /// Whether any credential key is present in the backend, including
    /// leftovers of an incomplete triple.
    pub fn has_persisted_keys(&self) -> StorageResult<bool> {
        for key in StorageKeys::ALL {
            if self.storage.has(key)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("credentials", &*self.snapshot.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FileStorage, MemoryStorage};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn alice() -> StoredCredentials {
        StoredCredentials::new("A1", "R1", "alice")
    }

    #[test]
    fn test_save_then_load() {
        let store = CredentialStore::in_memory();
        assert!(store.load().is_none());

        store.save(&alice()).unwrap();

        assert_eq!(store.load(), Some(alice()));
        assert_eq!(store.access_token().as_deref(), Some("A1"));
        assert_eq!(store.refresh_token().as_deref(), Some("R1"));
        assert_eq!(store.username().as_deref(), Some("alice"));
    }

    #[test]
    fn test_clear_is_idempotent() {
        let store = CredentialStore::in_memory();
        store.save(&alice()).unwrap();

        store.clear().unwrap();
        store.clear().unwrap();

        assert!(store.load().is_none());
        assert!(store.access_token().is_none());
        assert!(store.refresh_token().is_none());
        assert!(store.username().is_none());
        assert!(!store.has_persisted_keys().unwrap());
    }

    /// Backend whose deletes always fail.
    struct ReadOnlyStorage(MemoryStorage);

    impl SecureStorage for ReadOnlyStorage {
        fn set(&self, key: &str, value: &str) -> StorageResult<()> {
            self.0.set(key, value)
        }

        fn get(&self, key: &str) -> StorageResult<Option<String>> {
            self.0.get(key)
        }

        fn delete(&self, _key: &str) -> StorageResult<bool> {
            Err(StorageError::Backend("read-only".to_string()))
        }
    }

    #[test]
    fn test_clear_drops_snapshot_when_backend_fails() {
        let store = CredentialStore::open(Box::new(ReadOnlyStorage(MemoryStorage::new()))).unwrap();
        store.save(&alice()).unwrap();

        assert!(matches!(store.clear(), Err(StorageError::Backend(_))));

        assert!(store.load().is_none());
        assert!(store.access_token().is_none());
        assert!(store.has_persisted_keys().unwrap());
    }

    #[test]
    fn test_open_reads_persisted_triple() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = CredentialStore::open(Box::new(FileStorage::new(&path))).unwrap();
        store.save(&alice()).unwrap();
        drop(store);

        let reopened = CredentialStore::open(Box::new(FileStorage::new(&path))).unwrap();
        assert_eq!(reopened.load(), Some(alice()));
    }

    #[test]
    fn test_partial_triple_loads_as_nothing() {
        let storage = MemoryStorage::new();
        storage.set(StorageKeys::ACCESS, "A1").unwrap();
        storage.set(StorageKeys::REFRESH, "R1").unwrap();

        let store = CredentialStore::open(Box::new(storage)).unwrap();

        assert!(store.load().is_none());
        assert!(store.has_persisted_keys().unwrap());

        store.clear().unwrap();
        assert!(!store.has_persisted_keys().unwrap());
    }

    #[test]
    fn test_rotate_tokens_keeps_refresh_when_absent() {
        let store = CredentialStore::in_memory();
        store.save(&alice()).unwrap();

        store.rotate_tokens("A2", None).unwrap();

        assert_eq!(store.load(), Some(StoredCredentials::new("A2", "R1", "alice")));
    }

    #[test]
    fn test_rotate_tokens_replaces_both_when_present() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = CredentialStore::open(Box::new(FileStorage::new(&path))).unwrap();
        store.save(&alice()).unwrap();

        store.rotate_tokens("A2", Some("R2")).unwrap();

        let reopened = CredentialStore::open(Box::new(FileStorage::new(&path))).unwrap();
        assert_eq!(reopened.load(), Some(StoredCredentials::new("A2", "R2", "alice")));
    }

    #[test]
    fn test_rotate_tokens_without_credentials_fails() {
        let store = CredentialStore::in_memory();
        assert!(matches!(
            store.rotate_tokens("A2", None),
            Err(StorageError::NotFound(_))
        ));
        assert!(store.load().is_none());
    }

    #[test]
    fn test_readers_never_see_partial_triple() {
        let store = Arc::new(CredentialStore::in_memory());
        store.save(&StoredCredentials::new("A0", "R0", "u0")).unwrap();

        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 1..200 {
                    let n = i.to_string();
                    store
                        .save(&StoredCredentials::new(format!("A{n}"), format!("R{n}"), format!("u{n}")))
                        .unwrap();
                }
            })
        };

        for _ in 0..200 {
            let creds = store.load().unwrap();
            assert_eq!(&creds.access[1..], &creds.refresh[1..]);
            assert_eq!(&creds.access[1..], &creds.username[1..]);
        }

        writer.join().unwrap();
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let rendered = format!("{:?}", alice());
        assert!(!rendered.contains("A1"));
        assert!(!rendered.contains("R1"));
        assert!(rendered.contains("alice"));
    }
}
