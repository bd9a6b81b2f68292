//! Secure storage collaborator interface.
//!
//! Platform integrations implement [`SecureStorage`] over the device
//! keychain or equivalent. The client never sees platform APIs directly;
//! it only relies on each operation being atomic per key.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::StorageError;

/// Atomic per-key byte storage, implemented by the embedding platform.
///
/// Implementations must be safe to call from multiple threads; writes to a
/// single key must be atomic (readers see the old or the new value, never
/// a mix).
pub trait SecureStorage: Send + Sync {
    /// Stores `value` under `key`, replacing any previous value.
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Reads the value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Deletes `key`. Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Lists all keys starting with `prefix`.
    fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// In-memory [`SecureStorage`] for tests and hosts without a keychain.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecureStorage for MemoryStorage {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StorageError::Backend("storage mutex poisoned".to_string()))?;
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| StorageError::Backend("storage mutex poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StorageError::Backend("storage mutex poisoned".to_string()))?;
        entries.remove(key);
        Ok(())
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| StorageError::Backend("storage mutex poisoned".to_string()))?;
        Ok(entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
