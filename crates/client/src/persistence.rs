//! Durable per-installation key-value storage.
//!
//! Used only as a resilience layer: it holds the guest cart snapshot and the
//! merge-completion records. Once a user is authenticated the remote cart is
//! the source of truth and nothing here is consulted for it.
//!
//! # Keys
//!
//! - [`keys::GUEST_CART`] - JSON array of guest [`CartItem`]s
//! - `cart.merged.<userId>` - present once the guest merge ran for that user

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use thiserror::Error;
use tracing::warn;

use storefront_sync_core::{CartItem, UserId};

/// Errors from the durable store.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Simple string key-value storage that survives restarts.
pub trait DurableStore: Send + Sync {
    /// Read a value.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError` if the backing storage cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError>;

    /// Write a value, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError` if the backing storage cannot be written.
    fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError>;

    /// Delete a value. Deleting a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError` if the backing storage cannot be written.
    fn delete(&self, key: &str) -> Result<(), PersistenceError>;

    /// List all keys starting with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError` if the backing storage cannot be read.
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, PersistenceError>;
}

/// Well-known keys.
pub mod keys {
    use storefront_sync_core::UserId;

    /// Guest cart snapshot.
    pub const GUEST_CART: &str = "cart.guest";

    /// Prefix shared by every merge-completion record.
    pub const MERGE_PREFIX: &str = "cart.merged.";

    /// Merge-completion record key for a user.
    #[must_use]
    pub fn merge_record(user_id: UserId) -> String {
        format!("{MERGE_PREFIX}{user_id}")
    }
}

// =============================================================================
// Typed helpers
// =============================================================================

/// Load the guest cart snapshot.
///
/// A corrupt snapshot is logged and treated as an empty cart.
///
/// # Errors
///
/// Returns `PersistenceError` if the store cannot be read.
pub fn load_guest_cart(store: &dyn DurableStore) -> Result<Vec<CartItem>, PersistenceError> {
    let Some(raw) = store.get(keys::GUEST_CART)? else {
        return Ok(Vec::new());
    };
    match serde_json::from_str::<Vec<CartItem>>(&raw) {
        Ok(items) => Ok(items),
        Err(e) => {
            warn!(error = %e, "Discarding corrupt guest cart snapshot");
            Ok(Vec::new())
        }
    }
}

/// Replace the guest cart snapshot. An empty cart deletes the key.
///
/// # Errors
///
/// Returns `PersistenceError` if the store cannot be written.
pub fn save_guest_cart(store: &dyn DurableStore, items: &[CartItem]) -> Result<(), PersistenceError> {
    if items.is_empty() {
        return store.delete(keys::GUEST_CART);
    }
    store.set(keys::GUEST_CART, &serde_json::to_string(items)?)
}

/// Whether the guest merge already ran for `user_id` on this installation.
///
/// # Errors
///
/// Returns `PersistenceError` if the store cannot be read.
pub fn has_merged(store: &dyn DurableStore, user_id: UserId) -> Result<bool, PersistenceError> {
    Ok(store.get(&keys::merge_record(user_id))?.is_some())
}

/// Record that the guest merge ran for `user_id`.
///
/// # Errors
///
/// Returns `PersistenceError` if the store cannot be written.
pub fn mark_merged(store: &dyn DurableStore, user_id: UserId) -> Result<(), PersistenceError> {
    store.set(&keys::merge_record(user_id), "true")
}

/// Delete every merge-completion record. Returns how many were removed.
///
/// # Errors
///
/// Returns `PersistenceError` if the store cannot be read or written.
pub fn clear_merge_records(store: &dyn DurableStore) -> Result<usize, PersistenceError> {
    let records = store.keys_with_prefix(keys::MERGE_PREFIX)?;
    for key in &records {
        store.delete(key)?;
    }
    Ok(records.len())
}

// =============================================================================
// MemoryStore
// =============================================================================

/// In-memory store. Durable only for the life of the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl DurableStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), PersistenceError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, PersistenceError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

// =============================================================================
// FileStore
// =============================================================================

/// A store persisted as a single JSON object on disk.
///
/// Every write rewrites the whole file through a temporary sibling and a
/// rename, so a crash mid-write leaves the previous contents intact.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`.
    ///
    /// A missing file is an empty store; parent directories are created on the
    /// first write.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError` if the file exists but cannot be read or
    /// parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => BTreeMap::new(),
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(serde_json::to_string_pretty(entries)?.as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl DurableStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries)
    }

    fn delete(&self, key: &str) -> Result<(), PersistenceError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.remove(key).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, PersistenceError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}
