//! Raw key/value storage backends.
//!
//! `SecureStore` only ever talks to a [`StorageBackend`]; which one it gets
//! decides whether entries outlive the process:
//! - [`MemoryBackend`]: process memory. Used as the volatile slot for key
//!   material and as a fake durable store in tests.
//! - [`FileBackend`]: one JSON file per key under a data directory.

use base64::{engine::general_purpose, Engine as _};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::error::BackendError;

const ENTRY_EXTENSION: &str = "entry";

pub trait StorageBackend: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, BackendError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), BackendError>;
    fn remove_item(&self, key: &str) -> Result<(), BackendError>;
    fn keys(&self) -> Result<Vec<String>, BackendError>;
}

/// Bytes an entry occupies against a quota.
pub fn entry_cost(key: &str, value: &str) -> usize {
    key.len() + value.len()
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<BTreeMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl StorageBackend for MemoryBackend {
    fn get_item(&self, key: &str) -> Result<Option<String>, BackendError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), BackendError> {
        let mut guard = self.entries.write();
        if let Some(quota) = self.quota_bytes {
            let used: usize = guard
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| entry_cost(k, v))
                .sum();
            let needed = entry_cost(key, value);
            let available = quota.saturating_sub(used);
            if needed > available {
                return Err(BackendError::QuotaExceeded { needed, available });
            }
        }
        guard.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), BackendError> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, BackendError> {
        Ok(self.entries.read().keys().cloned().collect())
    }
}

/// Durable backend: each key lives in its own file, named by the URL-safe
/// base64 of the key. Writes go through a temp file and an atomic rename, so
/// a crash mid-write never leaves a truncated entry behind.
#[derive(Debug)]
pub struct FileBackend {
    dir: PathBuf,
    quota_bytes: Option<usize>,
}

impl FileBackend {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, BackendError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            quota_bytes: None,
        })
    }

    pub fn with_quota(mut self, quota_bytes: usize) -> Self {
        self.quota_bytes = Some(quota_bytes);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name = general_purpose::URL_SAFE_NO_PAD.encode(key.as_bytes());
        self.dir.join(format!("{name}.{ENTRY_EXTENSION}"))
    }

    fn key_for(path: &Path) -> Option<String> {
        if path.extension()?.to_str()? != ENTRY_EXTENSION {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        let raw = general_purpose::URL_SAFE_NO_PAD.decode(stem).ok()?;
        String::from_utf8(raw).ok()
    }

    fn used_bytes_excluding(&self, key: &str) -> Result<usize, BackendError> {
        let mut used = 0;
        for existing in self.keys()? {
            if existing == key {
                continue;
            }
            let size = match fs::metadata(self.path_for(&existing)) {
                Ok(meta) => meta.len() as usize,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            used += existing.len() + size;
        }
        Ok(used)
    }
}

impl StorageBackend for FileBackend {
    fn get_item(&self, key: &str) -> Result<Option<String>, BackendError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) if err.kind() == ErrorKind::InvalidData => {
                // Non-UTF-8 bytes on disk; surface as a corrupt value.
                Ok(Some(String::new()))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), BackendError> {
        if !self.dir.is_dir() {
            return Err(BackendError::Unavailable(format!(
                "data directory {} is missing",
                self.dir.display()
            )));
        }
        if let Some(quota) = self.quota_bytes {
            let needed = entry_cost(key, value);
            let available = quota.saturating_sub(self.used_bytes_excluding(key)?);
            if needed > available {
                return Err(BackendError::QuotaExceeded { needed, available });
            }
        }
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(value.as_bytes())?;
        tmp.flush()?;
        tmp.persist(self.path_for(key))
            .map_err(|e| BackendError::Io(e.error))?;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), BackendError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn keys(&self) -> Result<Vec<String>, BackendError> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if let Some(key) = Self::key_for(&entry.path()) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}
