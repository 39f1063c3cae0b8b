//! Client recovery cache
//!
//! Lets a freshly started view render the last known progress immediately,
//! before the first fetch completes. The cache is strictly best-effort:
//! writes never fail the caller, and anything suspect on read (wrong session,
//! unparseable entry) is treated as a miss.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::progress::SessionSnapshot;

/// One cached snapshot with its owning session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub session_id: String,
    pub snapshot: SessionSnapshot,
    pub cached_at: DateTime<Utc>,
}

/// Best-effort persistence of the latest snapshot per session
///
/// `save` must never propagate failure; a full disk or missing directory
/// degrades the client to memory-only, it does not break it. `load` returns
/// `None` for anything it cannot vouch for.
pub trait RecoveryCache: Send + Sync {
    fn save(&self, snapshot: &SessionSnapshot);
    fn load(&self, session_id: &str) -> Option<SessionSnapshot>;
    fn clear(&self, session_id: &str);
    fn is_available(&self) -> bool;
}

/// File-backed cache, one JSON entry per session under a cache directory
///
/// Cross-context propagation piggybacks on every write: a version file is
/// bumped so other processes can poll for changes, and an in-process
/// broadcast carries the written session id to other views in the same
/// process.
pub struct FileCache {
    dir: PathBuf,
    change_tx: broadcast::Sender<String>,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let (change_tx, _) = broadcast::channel(64);
        Self {
            dir: dir.into(),
            change_tx,
        }
    }

    /// Observe cache writes from this process without polling
    pub fn subscribe_changes(&self) -> broadcast::Receiver<String> {
        self.change_tx.subscribe()
    }

    /// Read the cross-process change counter
    ///
    /// Other processes poll this cheap single-integer file instead of
    /// re-reading entries.
    pub fn read_version(&self) -> u64 {
        std::fs::read_to_string(self.version_path())
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0)
    }

    fn version_path(&self) -> PathBuf {
        self.dir.join(".cache_version")
    }

    fn entry_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", session_id))
    }

    fn bump_version(&self) {
        let path = self.version_path();
        let version: u64 = std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0);
        if let Err(e) = std::fs::write(&path, format!("{}", version + 1)) {
            debug!(error = %e, "Failed to write cache version file");
        }
    }

    fn try_save(&self, snapshot: &SessionSnapshot) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;

        // Terminal success keeps only a minimal completed record
        let snapshot = if snapshot.is_terminal() && snapshot.error.is_none() {
            snapshot.minimal_completed()
        } else {
            snapshot.clone()
        };

        let entry = CacheEntry {
            session_id: snapshot.session_id.clone(),
            snapshot,
            cached_at: Utc::now(),
        };

        let json = serde_json::to_string(&entry)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        // Temp file then rename, same as the store: a reader in another
        // process never observes a torn entry
        let tmp_path = self.dir.join(format!(".{}.json.tmp", entry.session_id));
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, self.entry_path(&entry.session_id))
    }
}

impl RecoveryCache for FileCache {
    fn save(&self, snapshot: &SessionSnapshot) {
        if let Err(e) = self.try_save(snapshot) {
            // Quota exhaustion and unavailable storage degrade silently
            debug!(session_id = %snapshot.session_id, error = %e, "cache save skipped");
            return;
        }
        self.bump_version();
        let _ = self.change_tx.send(snapshot.session_id.clone());
    }

    fn load(&self, session_id: &str) -> Option<SessionSnapshot> {
        let content = std::fs::read_to_string(self.entry_path(session_id)).ok()?;
        let entry: CacheEntry = match serde_json::from_str(&content) {
            Ok(entry) => entry,
            Err(e) => {
                debug!(%session_id, error = %e, "cache entry corrupt, treating as miss");
                return None;
            }
        };

        // Entry written for a different session is stale, not an error
        if entry.session_id != session_id || entry.snapshot.session_id != session_id {
            debug!(%session_id, "cache entry session mismatch, treating as miss");
            return None;
        }

        Some(entry.snapshot)
    }

    fn clear(&self, session_id: &str) {
        if let Err(e) = std::fs::remove_file(self.entry_path(session_id)) {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!(%session_id, error = %e, "cache clear failed");
            }
            return;
        }
        self.bump_version();
        let _ = self.change_tx.send(session_id.to_string());
    }

    fn is_available(&self) -> bool {
        std::fs::create_dir_all(&self.dir).is_ok()
    }
}

/// In-memory cache for tests and memory-only degraded mode
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecoveryCache for MemoryCache {
    fn save(&self, snapshot: &SessionSnapshot) {
        let snapshot = if snapshot.is_terminal() && snapshot.error.is_none() {
            snapshot.minimal_completed()
        } else {
            snapshot.clone()
        };
        let entry = CacheEntry {
            session_id: snapshot.session_id.clone(),
            snapshot,
            cached_at: Utc::now(),
        };
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(entry.session_id.clone(), entry);
        }
    }

    fn load(&self, session_id: &str) -> Option<SessionSnapshot> {
        let entries = self.entries.lock().ok()?;
        let entry = entries.get(session_id)?;
        if entry.snapshot.session_id != session_id {
            return None;
        }
        Some(entry.snapshot.clone())
    }

    fn clear(&self, session_id: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(session_id);
        }
    }

    fn is_available(&self) -> bool {
        true
    }
}

/// Build the configured cache, falling back to memory-only when the file
/// cache cannot be used
pub fn open_cache(dir: &Path, enabled: bool) -> Box<dyn RecoveryCache> {
    if enabled {
        let cache = FileCache::new(dir);
        if cache.is_available() {
            return Box::new(cache);
        }
        debug!(?dir, "cache dir unavailable, degrading to memory-only");
    }
    Box::new(MemoryCache::new())
}
