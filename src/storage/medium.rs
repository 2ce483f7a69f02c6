//! Raw key/value media backing the local cache.
//!
//! A medium stores opaque strings under string keys. It knows nothing about records;
//! quota enforcement and availability are its only concerns.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::error::LocalError;

/// Synchronous key/value storage medium.
pub trait CacheMedium: Send + Sync {
    /// Read the raw value stored under `key`.
    fn read(&self, key: &str) -> Result<Option<String>, LocalError>;

    /// Store `value` under `key`, replacing any previous value.
    fn write(&self, key: &str, value: &str) -> Result<(), LocalError>;

    /// Remove `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), LocalError>;
}

/// File-backed medium: one JSON file per key inside a directory.
pub struct FileMedium {
    dir: PathBuf,
    quota_bytes: Option<u64>,
}

impl FileMedium {
    /// Open (and create if needed) a medium rooted at `dir`.
    pub fn open<P: AsRef<Path>>(dir: P, quota_bytes: Option<u64>) -> Result<Self, LocalError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| {
            LocalError::StorageUnavailable(format!("cannot create cache directory {}: {e}", dir.display()))
        })?;
        Ok(Self { dir, quota_bytes })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{file_name}.json"))
    }

    /// Bytes used by every key except `key`.
    fn used_bytes_excluding(&self, key: &str) -> Result<u64, LocalError> {
        let skip = self.path_for(key);
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| LocalError::StorageUnavailable(format!("cannot list cache directory: {e}")))?;

        let mut total = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path == skip || path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            total += entry.metadata().map(|meta| meta.len()).unwrap_or(0);
        }
        Ok(total)
    }
}

impl CacheMedium for FileMedium {
    fn read(&self, key: &str) -> Result<Option<String>, LocalError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LocalError::StorageUnavailable(format!("cannot read '{key}': {e}"))),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<(), LocalError> {
        if let Some(quota) = self.quota_bytes {
            let used = self.used_bytes_excluding(key)?;
            if used + value.len() as u64 > quota {
                return Err(LocalError::StorageUnavailable(format!(
                    "quota exceeded writing '{key}' ({} bytes used of {quota})",
                    used
                )));
            }
        }

        // Write to a temp file then rename so readers never observe a torn value.
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)
            .and_then(|_| fs::rename(&tmp, &path))
            .map_err(|e| LocalError::StorageUnavailable(format!("cannot write '{key}': {e}")))
    }

    fn remove(&self, key: &str) -> Result<(), LocalError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LocalError::StorageUnavailable(format!("cannot remove '{key}': {e}"))),
        }
    }
}

/// In-process medium. Used by tests and when no data directory is available.
#[derive(Default)]
pub struct MemoryMedium {
    entries: Mutex<HashMap<String, String>>,
    quota_bytes: Option<usize>,
    disabled: AtomicBool,
}

impl MemoryMedium {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            quota_bytes: Some(quota_bytes),
            ..Self::default()
        }
    }

    /// Simulate a disabled medium: every operation fails with `StorageUnavailable`.
    pub fn set_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::SeqCst);
    }

    fn check_enabled(&self) -> Result<(), LocalError> {
        if self.disabled.load(Ordering::SeqCst) {
            Err(LocalError::StorageUnavailable("storage medium disabled".to_string()))
        } else {
            Ok(())
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, LocalError> {
        self.entries
            .lock()
            .map_err(|_| LocalError::StorageUnavailable("storage medium lock poisoned".to_string()))
    }
}

impl CacheMedium for MemoryMedium {
    fn read(&self, key: &str) -> Result<Option<String>, LocalError> {
        self.check_enabled()?;
        Ok(self.lock()?.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), LocalError> {
        self.check_enabled()?;
        let mut entries = self.lock()?;

        if let Some(quota) = self.quota_bytes {
            let used: usize = entries
                .iter()
                .filter(|(existing, _)| existing.as_str() != key)
                .map(|(_, v)| v.len())
                .sum();
            if used + value.len() > quota {
                return Err(LocalError::StorageUnavailable(format!(
                    "quota exceeded writing '{key}' ({used} bytes used of {quota})"
                )));
            }
        }

        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), LocalError> {
        self.check_enabled()?;
        self.lock()?.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_medium_quota() {
        let medium = MemoryMedium::with_quota(10);
        medium.write("a", "12345").unwrap();
        // Replacing a key only counts the new value.
        medium.write("a", "1234567890").unwrap();
        let err = medium.write("b", "x").unwrap_err();
        assert!(matches!(err, LocalError::StorageUnavailable(_)));
    }

    #[test]
    fn test_memory_medium_disabled() {
        let medium = MemoryMedium::new();
        medium.write("k", "v").unwrap();
        medium.set_disabled(true);
        assert!(medium.read("k").is_err());
        assert!(medium.write("k", "w").is_err());
        medium.set_disabled(false);
        assert_eq!(medium.read("k").unwrap(), Some("v".to_string()));
    }

    #[test]
    fn test_file_medium_read_write_remove() {
        let dir = tempfile::tempdir().unwrap();
        let medium = FileMedium::open(dir.path(), None).unwrap();

        assert_eq!(medium.read("flowdesk_task").unwrap(), None);
        medium.write("flowdesk_task", "[]").unwrap();
        assert_eq!(medium.read("flowdesk_task").unwrap(), Some("[]".to_string()));
        medium.remove("flowdesk_task").unwrap();
        medium.remove("flowdesk_task").unwrap();
        assert_eq!(medium.read("flowdesk_task").unwrap(), None);
    }

    #[test]
    fn test_file_medium_quota() {
        let dir = tempfile::tempdir().unwrap();
        let medium = FileMedium::open(dir.path(), Some(8)).unwrap();
        medium.write("a", "1234").unwrap();
        assert!(medium.write("b", "12345").is_err());
        medium.write("b", "1234").unwrap();
    }
}
