//! Core SnapStore implementation
//!
//! One JSON document per key, latest write wins. Writes go through a temp
//! file followed by a rename so readers never observe a partial document.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Result alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Durable keyed holder of the latest JSON document per key
///
/// Single-writer-per-key, multi-reader safe: `save` replaces the whole
/// document atomically, readers only ever see a complete old or new version.
/// No history is kept.
pub struct SnapStore {
    base_path: PathBuf,
}

impl SnapStore {
    /// Open or create a store at the given directory
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let base_path = path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;
        debug!(?base_path, "Opened snapstore");
        Ok(Self { base_path })
    }

    /// Directory this store writes into
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Save a document, replacing any previous version for this key
    ///
    /// Idempotent: saving the same document twice leaves the same bytes on
    /// disk. The temp-then-rename dance keeps the overwrite atomic on the
    /// same filesystem.
    pub fn save<T: Serialize>(&self, key: &str, doc: &T) -> StoreResult<()> {
        validate_key(key)?;
        let final_path = self.doc_path(key);
        let tmp_path = self.base_path.join(format!(".{key}.tmp"));

        let json = serde_json::to_vec_pretty(doc)?;
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&json)?;
            file.flush()?;
        }
        fs::rename(&tmp_path, &final_path)?;

        debug!(key, bytes = json.len(), "SnapStore::save: wrote document");
        Ok(())
    }

    /// Load the latest document for a key, or None if absent
    ///
    /// A document that fails to parse is reported as an error, not silently
    /// dropped; callers decide whether that is fatal.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        validate_key(key)?;
        let path = self.doc_path(key);
        if !path.exists() {
            debug!(key, "SnapStore::load: miss");
            return Ok(None);
        }

        let content = fs::read_to_string(&path)?;
        let doc = serde_json::from_str(&content)?;
        debug!(key, "SnapStore::load: hit");
        Ok(Some(doc))
    }

    /// Raw JSON for a key, for inspection tooling
    pub fn load_raw(&self, key: &str) -> StoreResult<Option<String>> {
        validate_key(key)?;
        let path = self.doc_path(key);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(&path)?))
    }

    /// Delete the document for a key
    ///
    /// Deleting a missing key is not an error.
    pub fn delete(&self, key: &str) -> StoreResult<()> {
        validate_key(key)?;
        let path = self.doc_path(key);
        if path.exists() {
            fs::remove_file(&path)?;
            debug!(key, "SnapStore::delete: removed document");
        } else {
            debug!(key, "SnapStore::delete: no document to remove");
        }
        Ok(())
    }

    /// List all keys currently held
    pub fn list(&self) -> StoreResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.base_path)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(key) = name.strip_suffix(".json") {
                if !key.starts_with('.') {
                    keys.push(key.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn doc_path(&self, key: &str) -> PathBuf {
        self.base_path.join(format!("{key}.json"))
    }
}

/// Keys become filenames, so path separators and dot-prefixes are rejected
fn validate_key(key: &str) -> StoreResult<()> {
    if key.is_empty()
        || key.starts_with('.')
        || key.chars().any(|c| c == '/' || c == '\\' || c == '\0')
    {
        warn!(key, "validate_key: rejected key");
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}
