//! Key-value cache stores shared by the hook manager and external fetches.
//!
//! A store only needs "read, or absent" and "write". Each key is owned by a
//! single (hook, item) pair, so there is no read-modify-write. Concurrent writers
//! to the same key resolve as last-writer-wins.

use crate::error::{Error, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Persisted get/put by string key
pub trait CacheStore: Send + Sync {
    /// Returns `Ok(None)` when the key is absent or expired.
    fn get(&self, key: &str) -> Result<Option<Value>>;

    fn put(&self, key: &str, value: &Value) -> Result<()>;
}

/// Build a key in the `{domain}_{identifier}` convention, e.g. `legiscan_1932259`
pub fn cache_key(domain: &str, identifier: &str) -> String {
    format!("{}_{}", domain, identifier)
}

/// One JSON file per key under a directory
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    dir: PathBuf,
    max_age: Option<Duration>,
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

impl FileCacheStore {
    /// Open (and create if needed) a cache directory
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, max_age: None })
    }

    /// Treat entries older than `max_age` as absent
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing a key
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(key)))
    }

    fn is_expired(&self, path: &Path) -> bool {
        let Some(max_age) = self.max_age else {
            return false;
        };
        std::fs::metadata(path)
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .map(|age| age > max_age)
            .unwrap_or(false)
    }
}

impl CacheStore for FileCacheStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path_for(key);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::CacheStore(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        if self.is_expired(&path) {
            return Ok(None);
        }

        serde_json::from_str(&contents).map(Some).map_err(|e| {
            Error::CacheStore(format!("Corrupt cache entry {}: {}", path.display(), e))
        })
    }

    fn put(&self, key: &str, value: &Value) -> Result<()> {
        let path = self.path_for(key);
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| Error::CacheStore(format!("Failed to encode '{}': {}", key, e)))?;
        write_atomic(&path, &bytes)
            .map_err(|e| Error::CacheStore(format!("Failed to write {}: {}", path.display(), e)))
    }
}

/// Write to a unique sibling temp file, then rename over the target
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp = parent.join(format!(
        ".{}.{}.{}.tmp",
        file_name,
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    std::fs::write(&temp, bytes)?;
    if let Err(e) = std::fs::rename(&temp, path) {
        let _ = std::fs::remove_file(&temp);
        return Err(e);
    }
    Ok(())
}

/// Keys are used verbatim as file names when they are plain; anything else is
/// sanitized and disambiguated with a digest of the original key.
fn file_stem(key: &str) -> String {
    let plain = |c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.');
    if !key.is_empty() && !key.starts_with('.') && key.chars().all(plain) {
        return key.to_string();
    }

    let sanitized: String = key
        .chars()
        .map(|c| if plain(c) { c } else { '_' })
        .collect();
    let digest = Sha256::digest(key.as_bytes());
    let suffix: String = digest[..8].iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}-{}", sanitized.trim_start_matches('.'), suffix)
}

/// In-process store, mostly for tests and one-shot runs
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .map(|e| e.contains_key(key))
            .unwrap_or(false)
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| Error::CacheStore("memory cache lock poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: &Value) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| Error::CacheStore("memory cache lock poisoned".to_string()))?;
        entries.insert(key.to_string(), value.clone());
        Ok(())
    }
}

/// Store that never holds anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCacheStore;

impl CacheStore for NoopCacheStore {
    fn get(&self, _key: &str) -> Result<Option<Value>> {
        Ok(None)
    }

    fn put(&self, _key: &str, _value: &Value) -> Result<()> {
        Ok(())
    }
}
