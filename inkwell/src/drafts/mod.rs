//! Local draft store.
//!
//! Keyed, versioned JSON records over a [`StorageBackend`], each carrying a
//! [`SyncStatus`]. Records start out `pending` and only change status when a
//! caller says so; nothing here talks to a server.
//!
//! Reads degrade quietly (logged, then `None` / `false` / skipped), while
//! [`DraftStore::set_item`] returns its error to the caller.

mod backend;

use std::sync::Mutex;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared_types::{
    draft_key, LocalStorageItem, StorageAvailability, SyncStatus, DRAFT_KEY_PREFIX,
};
use ulid::Generator;

pub use backend::{MemoryBackend, SqliteBackend, StorageBackend, StorageError};

/// Budget assumed for local storage when estimating free space.
pub const STORAGE_BUDGET_BYTES: u64 = 5 * 1024 * 1024;

const PROBE_KEY: &str = "__inkwell_storage_probe__";
const DEFAULT_NAMESPACE: &str = "inkwell:";

pub type Meta = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, thiserror::Error)]
pub enum DraftStoreError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("failed to encode record for {key}: {message}")]
    Encode { key: String, message: String },
}

pub struct DraftStore {
    backend: Box<dyn StorageBackend>,
    namespace: String,
    versions: Mutex<Generator>,
}

impl std::fmt::Debug for DraftStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DraftStore")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl DraftStore {
    pub fn new(backend: impl StorageBackend + 'static) -> Self {
        Self::with_namespace(backend, DEFAULT_NAMESPACE)
    }

    /// Store whose keys are prefixed with `namespace` in the backend.
    pub fn with_namespace(
        backend: impl StorageBackend + 'static,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            backend: Box::new(backend),
            namespace: namespace.into(),
            versions: Mutex::new(Generator::new()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Write a fresh record for `key` with status `pending`, replacing any
    /// previous record.
    pub fn set_item<T: Serialize>(
        &self,
        key: &str,
        data: T,
        meta: Option<Meta>,
    ) -> Result<LocalStorageItem<T>, DraftStoreError> {
        let item = LocalStorageItem {
            key: key.to_string(),
            data,
            timestamp: Utc::now(),
            sync_status: SyncStatus::Pending,
            version: self.next_version(),
            meta,
        };
        self.write(&item).map_err(|err| {
            tracing::error!(key, error = %err, "Failed to write local storage item");
            err
        })?;
        Ok(item)
    }

    pub fn get_item<T: DeserializeOwned>(&self, key: &str) -> Option<LocalStorageItem<T>> {
        let raw = match self.backend.get(&self.storage_key(key)) {
            Ok(raw) => raw?,
            Err(err) => {
                tracing::warn!(key, error = %err, "Failed to read local storage item");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(item) => Some(item),
            Err(err) => {
                tracing::warn!(key, error = %err, "Failed to parse local storage item");
                None
            }
        }
    }

    /// Replace the data of an existing record. The sync status is kept unless
    /// `sync_status` overrides it. Returns `false` if the key is missing or the
    /// write fails.
    pub fn update_item<T: Serialize>(
        &self,
        key: &str,
        data: T,
        sync_status: Option<SyncStatus>,
    ) -> bool {
        let Some(existing) = self.get_item::<serde_json::Value>(key) else {
            return false;
        };
        let item = LocalStorageItem {
            key: key.to_string(),
            data,
            timestamp: Utc::now(),
            sync_status: sync_status.unwrap_or(existing.sync_status),
            version: self.next_version(),
            meta: existing.meta,
        };
        self.write_quietly(&item)
    }

    pub fn update_sync_status(&self, key: &str, status: SyncStatus) -> bool {
        let Some(mut item) = self.get_item::<serde_json::Value>(key) else {
            return false;
        };
        item.sync_status = status;
        item.timestamp = Utc::now();
        self.write_quietly(&item)
    }

    pub fn remove_item(&self, key: &str) -> bool {
        match self.backend.remove(&self.storage_key(key)) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(key, error = %err, "Failed to remove local storage item");
                false
            }
        }
    }

    /// Records still waiting to be synced.
    pub fn get_pending_items<T: DeserializeOwned>(&self) -> Vec<LocalStorageItem<T>> {
        self.items_with_status(SyncStatus::Pending)
    }

    pub fn get_conflict_items<T: DeserializeOwned>(&self) -> Vec<LocalStorageItem<T>> {
        self.items_with_status(SyncStatus::Conflict)
    }

    /// Every record whose key starts with the draft prefix.
    pub fn get_all_drafts<T: DeserializeOwned>(&self) -> Vec<LocalStorageItem<T>> {
        self.scan(|key| key.starts_with(DRAFT_KEY_PREFIX))
    }

    pub fn save_draft<T: Serialize>(
        &self,
        draft_id: &str,
        data: T,
    ) -> Result<LocalStorageItem<T>, DraftStoreError> {
        self.set_item(&draft_key(draft_id), data, None)
    }

    pub fn get_draft<T: DeserializeOwned>(&self, draft_id: &str) -> Option<LocalStorageItem<T>> {
        self.get_item(&draft_key(draft_id))
    }

    /// Remove every key in this store's namespace. Returns how many were removed.
    pub fn clear(&self) -> usize {
        self.logical_keys()
            .into_iter()
            .filter(|key| self.remove_item(key))
            .count()
    }

    /// Probe writability and estimate free space against
    /// [`STORAGE_BUDGET_BYTES`] by summing the size of every stored value.
    pub fn check_storage_availability(&self) -> StorageAvailability {
        let writable = self
            .backend
            .set(PROBE_KEY, PROBE_KEY)
            .and_then(|()| self.backend.remove(PROBE_KEY));
        if let Err(err) = &writable {
            tracing::warn!(error = %err, "Local storage is not writable");
        }

        let used_bytes = self.used_bytes().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "Failed to measure local storage usage");
            0
        });

        StorageAvailability {
            available: writable.is_ok(),
            used_bytes,
            remaining_bytes: STORAGE_BUDGET_BYTES.saturating_sub(used_bytes),
            total_bytes: STORAGE_BUDGET_BYTES,
        }
    }

    fn used_bytes(&self) -> Result<u64, StorageError> {
        let mut total = 0u64;
        for key in self.backend.keys()? {
            if let Some(value) = self.backend.get(&key)? {
                total += value.len() as u64;
            }
        }
        Ok(total)
    }

    fn items_with_status<T: DeserializeOwned>(&self, status: SyncStatus) -> Vec<LocalStorageItem<T>> {
        self.scan(|_| true)
            .into_iter()
            .filter(|item: &LocalStorageItem<T>| item.sync_status == status)
            .collect()
    }

    /// Parse every record in the namespace whose logical key passes `filter`.
    /// Records that do not parse as `T` are skipped.
    fn scan<T: DeserializeOwned>(&self, filter: impl Fn(&str) -> bool) -> Vec<LocalStorageItem<T>> {
        self.logical_keys()
            .into_iter()
            .filter(|key| filter(key))
            .filter_map(|key| self.get_item(&key))
            .collect()
    }

    fn logical_keys(&self) -> Vec<String> {
        match self.backend.keys() {
            Ok(keys) => keys
                .into_iter()
                .filter_map(|key| key.strip_prefix(&self.namespace).map(ToString::to_string))
                .collect(),
            Err(err) => {
                tracing::warn!(error = %err, "Failed to enumerate local storage keys");
                Vec::new()
            }
        }
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{key}", self.namespace)
    }

    fn next_version(&self) -> String {
        let generated = match self.versions.lock() {
            Ok(mut generator) => generator.generate().ok(),
            Err(_) => None,
        };
        generated.unwrap_or_else(ulid::Ulid::new).to_string()
    }

    fn write<T: Serialize>(&self, item: &LocalStorageItem<T>) -> Result<(), DraftStoreError> {
        let raw = serde_json::to_string(item).map_err(|e| DraftStoreError::Encode {
            key: item.key.clone(),
            message: e.to_string(),
        })?;
        self.backend.set(&self.storage_key(&item.key), &raw)?;
        Ok(())
    }

    fn write_quietly<T: Serialize>(&self, item: &LocalStorageItem<T>) -> bool {
        match self.write(item) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(key = %item.key, error = %err, "Failed to update local storage item");
                false
            }
        }
    }
}
