use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::{now_millis, CacheBackend, CacheEntry, CacheError, CacheResult};
use crate::storage;

const MAX_STEM_LEN: usize = 100;

/// One JSON file per key under `directory`, written atomically.
#[derive(Debug, Clone)]
pub struct FileCache {
    directory: PathBuf,
}

impl FileCache {
    pub fn open(directory: impl Into<PathBuf>) -> CacheResult<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory).map_err(|source| CacheError::Io {
            path: directory.clone(),
            source,
        })?;
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// `[sanitized key]_[seahash of full key].json`
    ///
    /// The readable stem keeps the directory browsable; the digest keeps two
    /// keys that sanitize to the same stem apart.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let mut stem: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .take(MAX_STEM_LEN)
            .collect();
        // A leading dot would hide the file and collide with temp names.
        if stem.is_empty() || stem.starts_with('.') {
            stem.insert_str(0, "entry");
        }
        let digest = seahash::hash(key.as_bytes());
        self.directory.join(format!("{}_{:016x}.json", stem, digest))
    }
}

#[async_trait]
impl CacheBackend for FileCache {
    fn name(&self) -> &str {
        "file"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        let path = self.path_for(key);
        let key = key.to_string();
        let value = tokio::task::spawn_blocking(move || read_live_entry(&path, &key)).await??;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Value, ttl_seconds: i64) -> CacheResult<()> {
        let path = self.path_for(key);
        let bytes = serde_json::to_vec(&CacheEntry::new(key, value, ttl_seconds))?;
        tokio::task::spawn_blocking(move || {
            storage::write_atomic(&path, &bytes).map_err(|source| CacheError::Io { path, source })
        })
        .await??;
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> CacheResult<()> {
        let path = self.path_for(key);
        tokio::task::spawn_blocking(move || remove_if_present(&path)).await??;
        Ok(())
    }

    async fn purge_expired(&self) -> CacheResult<usize> {
        let directory = self.directory.clone();
        let purged = tokio::task::spawn_blocking(move || purge_dir(&directory)).await??;
        Ok(purged)
    }
}

fn read_live_entry(path: &Path, key: &str) -> CacheResult<Option<Value>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(CacheError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let entry: CacheEntry = match serde_json::from_slice(&bytes) {
        Ok(entry) => entry,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable cache file, treating as miss");
            return Ok(None);
        }
    };

    if entry.key != key {
        debug!(path = %path.display(), "cache file belongs to another key");
        return Ok(None);
    }
    if entry.is_expired() {
        remove_if_present(path)?;
        return Ok(None);
    }
    Ok(Some(entry.value))
}

fn remove_if_present(path: &Path) -> CacheResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(CacheError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn purge_dir(directory: &Path) -> CacheResult<usize> {
    let io_err = |source| CacheError::Io {
        path: directory.to_path_buf(),
        source,
    };
    let now = now_millis();
    let mut purged = 0;

    for dir_entry in fs::read_dir(directory).map_err(io_err)? {
        let path = dir_entry.map_err(io_err)?.path();
        let is_entry_file = path.extension().map_or(false, |ext| ext == "json")
            && !path
                .file_name()
                .map_or(true, |n| n.to_string_lossy().starts_with('.'));
        if !is_entry_file {
            continue;
        }

        let Ok(bytes) = fs::read(&path) else { continue };
        let Ok(entry) = serde_json::from_slice::<CacheEntry>(&bytes) else {
            continue;
        };
        if entry.is_expired_at(now) {
            remove_if_present(&path)?;
            purged += 1;
        }
    }
    Ok(purged)
}
