//! Payload cache: the last fetched document, on disk and in memory.
//!
//! The file lives at `<home>/.hermes/cache/payload.json`. Writes are
//! hash-gated and atomic:
//!
//! 1. SHA-256 the payload.
//! 2. Compare with the digest of the cached copy → skip if identical.
//! 3. Write to `payload.json.tmp`.
//! 4. Rename to `payload.json` (atomic on POSIX).
//! 5. Swap the in-memory copy.
//!
//! Consumers hold the same `Arc<FileCache>` as the orchestrator and read
//! [`FileCache::latest`]; nothing is shared through globals.

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use hermes_core::{error::persist_err, SyncError};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Write-only view of the cache used by the orchestrator.
pub trait PayloadCache: Send + Sync {
    fn save(&self, raw_payload: &str) -> Result<CacheWrite, SyncError>;
}

/// Outcome of a cache save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheWrite {
    /// The payload differed from the cached copy and was written.
    Written { path: PathBuf },
    /// The payload matched the cached digest; nothing was written.
    Unchanged { path: PathBuf },
}

/// The cached document and when it was stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CachedPayload {
    pub raw: String,
    pub sha256: String,
    pub saved_at: DateTime<Utc>,
}

/// `<home>/.hermes/cache/payload.json`. Pure, no I/O.
pub fn cache_path_at(home: &Path) -> PathBuf {
    home.join(".hermes").join("cache").join("payload.json")
}

/// File-backed cache with an in-memory latest copy.
pub struct FileCache {
    path: PathBuf,
    latest: RwLock<Option<Arc<CachedPayload>>>,
}

impl FileCache {
    /// Open the cache under `home`, loading any payload left by a previous run.
    pub fn open_at(home: &Path) -> Self {
        Self::open_path(cache_path_at(home))
    }

    /// Open a cache stored at an explicit path.
    ///
    /// The on-disk copy is best effort: an unreadable file is logged and the
    /// cache starts empty, to be replaced by the next successful save.
    pub fn open_path(path: PathBuf) -> Self {
        let latest = match load(&path) {
            Ok(Some(cached)) => {
                tracing::debug!(path = %path.display(), "loaded cached payload");
                Some(Arc::new(cached))
            }
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(error = %err, "cached payload unreadable, starting empty");
                None
            }
        };
        Self {
            path,
            latest: RwLock::new(latest),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Latest cached payload, if any.
    pub fn latest(&self) -> Option<Arc<CachedPayload>> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl PayloadCache for FileCache {
    fn save(&self, raw_payload: &str) -> Result<CacheWrite, SyncError> {
        let digest = sha256_hex(raw_payload);

        // Held across the write so concurrent saves land in order.
        let mut latest = self.latest.write().unwrap_or_else(PoisonError::into_inner);
        if latest.as_ref().map(|cached| cached.sha256.as_str()) == Some(digest.as_str()) {
            tracing::debug!(path = %self.path.display(), "payload unchanged");
            return Ok(CacheWrite::Unchanged {
                path: self.path.clone(),
            });
        }

        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| persist_err(dir, e))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, raw_payload).map_err(|e| persist_err(&tmp, e))?;
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(persist_err(&self.path, e));
        }

        *latest = Some(Arc::new(CachedPayload {
            raw: raw_payload.to_string(),
            sha256: digest,
            saved_at: Utc::now(),
        }));
        tracing::debug!(path = %self.path.display(), "payload written");
        Ok(CacheWrite::Written {
            path: self.path.clone(),
        })
    }
}

fn load(path: &Path) -> Result<Option<CachedPayload>, SyncError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path).map_err(|e| persist_err(path, e))?;
    if raw.trim().is_empty() {
        return Ok(None);
    }
    let saved_at = std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    Ok(Some(CachedPayload {
        sha256: sha256_hex(&raw),
        raw,
        saved_at,
    }))
}

fn sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}
