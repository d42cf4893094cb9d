//! Credential persistence for the gallery client.
//!
//! - [`SecureStorage`]: key-value backend trait
//! - [`MemoryStorage`]: process-local backend
//! - [`FileStorage`]: JSON file backend with owner-only permissions
//! - [`CredentialStore`]: the access/refresh/username triple on top of a backend

mod credentials;
mod file;
mod keys;
mod memory;
mod traits;

pub use credentials::{CredentialStore, StoredCredentials};
pub use file::FileStorage;
pub use keys::StorageKeys;
pub use memory::MemoryStorage;
pub use traits::SecureStorage;

use std::path::Path;
use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend-specific failure
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Key not found
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Open a file-backed credential store at `path`.
pub fn open_credential_store(path: &Path) -> StorageResult<CredentialStore> {
    CredentialStore::open(Box::new(FileStorage::new(path)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_storage_keys_unique() {
        let unique: std::collections::HashSet<_> = StorageKeys::ALL.iter().collect();
        assert_eq!(unique.len(), StorageKeys::ALL.len(), "Storage keys must be unique");
        assert_eq!(StorageKeys::ALL, ["access", "refresh", "username"]);
    }

    #[test]
    fn test_open_credential_store_on_fresh_directory() {
        let dir = tempdir().unwrap();
        let store = open_credential_store(&dir.path().join("credentials.json")).unwrap();
        assert!(store.load().is_none());
    }
}
