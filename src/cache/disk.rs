//! On-disk persistence for cached render results.
//!
//! Layout: `{root}/{key}/content` holds the raw payload and
//! `{root}/{key}/meta.json` its bookkeeping. Both files are written through a
//! temporary file in the same directory and then persisted over the target.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    time::{Duration, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::domain::{OutputFormat, RenderContent};

use super::{keys::CacheKey, store::CacheEntry};

const CONTENT_FILE: &str = "content";
const META_FILE: &str = "meta.json";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cache entry `{key}` is corrupt: {reason}")]
    Corrupt { key: String, reason: String },
}

impl CacheError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn corrupt(key: &CacheKey, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct DiskMeta {
    created_at_ms: u64,
    ttl_secs: u64,
    size: u64,
    format: OutputFormat,
    renderer: String,
}

#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Opens (creating if needed) a cache directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|err| CacheError::io(&root, err))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_dir(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    /// Reads an entry back. `Ok(None)` means nothing was stored under `key`.
    pub fn load(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let dir = self.entry_dir(key);
        let meta_path = dir.join(META_FILE);
        let raw_meta = match fs::read(&meta_path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(CacheError::io(&meta_path, err)),
        };
        let meta: DiskMeta = serde_json::from_slice(&raw_meta)
            .map_err(|err| CacheError::corrupt(key, format!("unreadable meta.json: {err}")))?;

        let content_path = dir.join(CONTENT_FILE);
        let bytes = match fs::read(&content_path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(CacheError::corrupt(key, "content file is missing"));
            }
            Err(err) => return Err(CacheError::io(&content_path, err)),
        };
        if bytes.len() as u64 != meta.size {
            return Err(CacheError::corrupt(
                key,
                format!("size mismatch: meta says {}, found {}", meta.size, bytes.len()),
            ));
        }

        let content = if meta.format.is_markup() {
            let text = String::from_utf8(bytes)
                .map_err(|_| CacheError::corrupt(key, "markup payload is not UTF-8"))?;
            RenderContent::Text(text)
        } else {
            RenderContent::Binary(bytes)
        };

        Ok(Some(CacheEntry {
            content,
            format: meta.format,
            renderer_name: meta.renderer,
            created_at: UNIX_EPOCH + Duration::from_millis(meta.created_at_ms),
            ttl: Duration::from_secs(meta.ttl_secs),
        }))
    }

    /// Writes the payload first and the metadata last.
    pub fn store(&self, key: &CacheKey, entry: &CacheEntry) -> Result<(), CacheError> {
        let dir = self.entry_dir(key);
        fs::create_dir_all(&dir).map_err(|err| CacheError::io(&dir, err))?;

        let created_at_ms = entry
            .created_at
            .duration_since(UNIX_EPOCH)
            .map(|since| since.as_millis() as u64)
            .unwrap_or_default();
        let meta = DiskMeta {
            created_at_ms,
            ttl_secs: entry.ttl.as_secs(),
            size: entry.content.len() as u64,
            format: entry.format,
            renderer: entry.renderer_name.clone(),
        };
        let meta_json =
            serde_json::to_vec_pretty(&meta).map_err(|err| CacheError::io(&dir, err.into()))?;

        write_atomic(&dir, CONTENT_FILE, entry.content.as_bytes())?;
        write_atomic(&dir, META_FILE, &meta_json)
    }

    pub fn remove(&self, key: &CacheKey) -> Result<(), CacheError> {
        let dir = self.entry_dir(key);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(CacheError::io(&dir, err)),
        }
    }

    /// Removes every entry directory and returns how many were deleted.
    /// Directories whose names are not cache keys are left alone.
    pub fn purge(&self) -> Result<usize, CacheError> {
        let listing = match fs::read_dir(&self.root) {
            Ok(listing) => listing,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(CacheError::io(&self.root, err)),
        };

        let mut removed = 0;
        for item in listing {
            let item = item.map_err(|err| CacheError::io(&self.root, err))?;
            let name = item.file_name();
            let Some(key) = name.to_str().and_then(CacheKey::parse) else {
                continue;
            };
            if item.path().is_dir() {
                self.remove(&key)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> Result<(), CacheError> {
    let target = dir.join(name);
    let mut file = NamedTempFile::new_in(dir).map_err(|err| CacheError::io(dir, err))?;
    file.write_all(bytes).map_err(|err| CacheError::io(&target, err))?;
    file.flush().map_err(|err| CacheError::io(&target, err))?;
    file.persist(&target)
        .map_err(|err| CacheError::io(&target, err.error))?;
    Ok(())
}
