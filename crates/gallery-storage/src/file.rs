//! JSON file storage backend.
//!
//! All keys live in one JSON object. Every mutation rewrites the file
//! through a sibling temp file and a rename, so a crash leaves either the
//! old or the new contents on disk.

use crate::{SecureStorage, StorageError, StorageResult};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

type Entries = BTreeMap<String, String>;

/// File-backed storage rooted at a single JSON document.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    // Serializes read-modify-write cycles within the process.
    lock: Mutex<()>,
}

impl FileStorage {
    /// Create a storage handle for `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> StorageResult<Entries> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Entries::new()),
            Err(err) => return Err(err.into()),
        };

        if content.trim().is_empty() {
            return Ok(Entries::new());
        }

        serde_json::from_str(&content).map_err(|e| {
            StorageError::Encoding(format!("{}: {}", self.path.display(), e))
        })
    }

    fn write_entries(&self, entries: &Entries) -> StorageResult<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let json = serde_json::to_vec_pretty(entries)
            .map_err(|e| StorageError::Encoding(e.to_string()))?;

        let tmp_path = dir.join(temp_name(&self.path));
        let write_result = (|| -> std::io::Result<()> {
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&tmp_path)?;
            restrict_permissions(&file)?;
            file.write_all(&json)?;
            file.sync_all()?;
            fs::rename(&tmp_path, &self.path)?;

            if let Ok(parent_dir) = fs::File::open(dir) {
                let _ = parent_dir.sync_all();
            }
            Ok(())
        })();

        if let Err(err) = write_result {
            let _ = fs::remove_file(&tmp_path);
            return Err(err.into());
        }

        debug!(path = %self.path.display(), keys = entries.len(), "storage file written");
        Ok(())
    }

    fn update<F>(&self, f: F) -> StorageResult<bool>
    where
        F: FnOnce(&mut Entries) -> bool,
    {
        let _guard = self.lock.lock();
        let mut entries = self.read_entries()?;
        let changed = f(&mut entries);
        if changed {
            self.write_entries(&entries)?;
        }
        Ok(changed)
    }
}

/// Hidden sibling name, unique per process and write.
fn temp_name(path: &Path) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "storage".to_string());
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();

    format!(
        ".{}.tmp.{}.{}.{}",
        file_name,
        std::process::id(),
        nanos,
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

#[cfg(unix)]
fn restrict_permissions(file: &fs::File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_file: &fs::File) -> std::io::Result<()> {
    Ok(())
}

impl SecureStorage for FileStorage {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
            true
        })?;
        Ok(())
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let _guard = self.lock.lock();
        Ok(self.read_entries()?.remove(key))
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        self.update(|entries| entries.remove(key).is_some())
    }

    fn set_many(&self, entries: &[(&str, &str)]) -> StorageResult<()> {
        self.update(|stored| {
            for (key, value) in entries {
                stored.insert(key.to_string(), value.to_string());
            }
            true
        })?;
        Ok(())
    }

    fn delete_many(&self, keys: &[&str]) -> StorageResult<()> {
        self.update(|stored| {
            let mut removed = false;
            for key in keys {
                removed |= stored.remove(*key).is_some();
            }
            removed
        })?;
        Ok(())
    }
}
