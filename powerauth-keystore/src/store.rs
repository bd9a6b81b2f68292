//! Per-instance sealed keystore.
//!
//! Every configured client instance owns one namespace in the secure
//! storage backend. Entries come in three protection classes:
//!
//! - **sealed**: AEAD under the namespace vault key. For the activation
//!   record, the possession factor key, tokens.
//! - **guarded**: AEAD under a caller-supplied unlock key that is never
//!   persisted (biometry-derived key material). Wrong keys fail closed.
//! - **concealed**: keystream wrap under a caller-supplied unlock key
//!   (the knowledge factor key). Wrong keys produce plausible garbage so
//!   the entry cannot be used as a local password oracle.
//!
//! Unsealed bytes only ever exist inside the closure passed to the
//! `with_*` accessors and are zeroized on every exit path.

use std::sync::Arc;

use powerauth_crypto::{
    conceal, decrypt, encrypt, generate_random_key, reveal, ConcealedData, DerivedKey,
    EncryptedData,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use zeroize::Zeroizing;

use crate::error::{KeyStoreError, KeyStoreResult};
use crate::storage::SecureStorage;

/// Storage key of the namespace vault key.
const VAULT_KEY_ENTRY: &str = "vault-key";

/// Sealed storage for one client instance.
pub struct KeyStore {
    storage: Arc<dyn SecureStorage>,
    namespace: String,
}

impl KeyStore {
    /// Opens the keystore namespace for `instance_id`.
    ///
    /// Opening performs no I/O; the namespace materializes on
    /// [`initialize`](Self::initialize).
    #[must_use]
    pub fn new(storage: Arc<dyn SecureStorage>, instance_id: &str) -> Self {
        Self {
            storage,
            namespace: format!("powerauth/{instance_id}/"),
        }
    }

    /// Creates the namespace vault key if it does not exist yet.
    /// Idempotent.
    pub fn initialize(&self) -> KeyStoreResult<()> {
        if self.storage.get(&self.entry_key(VAULT_KEY_ENTRY))?.is_some() {
            return Ok(());
        }
        let vault_key = generate_random_key();
        self.storage
            .put(&self.entry_key(VAULT_KEY_ENTRY), vault_key.as_bytes())?;
        Ok(())
    }

    /// True once [`initialize`](Self::initialize) has run for this
    /// namespace.
    pub fn is_initialized(&self) -> KeyStoreResult<bool> {
        Ok(self.storage.get(&self.entry_key(VAULT_KEY_ENTRY))?.is_some())
    }

    // ── Sealed entries ───────────────────────────────────────────

    /// Stores `value` sealed under the vault key.
    pub fn put_sealed(&self, entry: &str, value: &[u8]) -> KeyStoreResult<()> {
        let vault_key = self.vault_key()?;
        let sealed = encrypt(&vault_key, value)?;
        self.put_raw(entry, &sealed)
    }

    /// Reads a sealed entry, or `None` if it does not exist.
    pub fn get_sealed(&self, entry: &str) -> KeyStoreResult<Option<Vec<u8>>> {
        let Some(sealed) = self.get_raw::<EncryptedData>(entry)? else {
            return Ok(None);
        };
        let vault_key = self.vault_key()?;
        Ok(Some(decrypt(&vault_key, &sealed)?))
    }

    /// Stores a serializable value sealed under the vault key.
    pub fn put_json<T: Serialize>(&self, entry: &str, value: &T) -> KeyStoreResult<()> {
        let bytes = Zeroizing::new(serde_json::to_vec(value)?);
        self.put_sealed(entry, &bytes)
    }

    /// Reads and deserializes a sealed value, or `None` if absent.
    pub fn get_json<T: DeserializeOwned>(&self, entry: &str) -> KeyStoreResult<Option<T>> {
        let Some(bytes) = self.get_sealed(entry)? else {
            return Ok(None);
        };
        let bytes = Zeroizing::new(bytes);
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    // ── Guarded entries ──────────────────────────────────────────

    /// Stores `value` sealed under a caller-supplied unlock key.
    pub fn put_guarded(
        &self,
        entry: &str,
        unlock: &DerivedKey,
        value: &[u8],
    ) -> KeyStoreResult<()> {
        let sealed = encrypt(unlock, value)?;
        self.put_raw(entry, &sealed)
    }

    /// Unseals a guarded entry for the duration of `f`.
    ///
    /// Fails with [`KeyStoreError::EntryNotFound`] if absent and with a
    /// crypto error if `unlock` is wrong.
    pub fn with_guarded<T>(
        &self,
        entry: &str,
        unlock: &DerivedKey,
        f: impl FnOnce(&[u8]) -> T,
    ) -> KeyStoreResult<T> {
        let sealed = self
            .get_raw::<EncryptedData>(entry)?
            .ok_or_else(|| KeyStoreError::EntryNotFound(entry.to_string()))?;
        let plaintext = Zeroizing::new(decrypt(unlock, &sealed)?);
        Ok(f(&plaintext))
    }

    // ── Concealed entries ────────────────────────────────────────

    /// Stores `value` masked under a caller-supplied unlock key with no
    /// integrity protection.
    pub fn put_concealed(
        &self,
        entry: &str,
        unlock: &DerivedKey,
        value: &[u8],
    ) -> KeyStoreResult<()> {
        let concealed = conceal(unlock, value);
        self.put_raw(entry, &concealed)
    }

    /// Unmasks a concealed entry for the duration of `f`.
    ///
    /// A wrong `unlock` key is indistinguishable from the right one here;
    /// callers must route the result through a server-verified operation.
    pub fn with_concealed<T>(
        &self,
        entry: &str,
        unlock: &DerivedKey,
        f: impl FnOnce(&[u8]) -> T,
    ) -> KeyStoreResult<T> {
        let concealed = self
            .get_raw::<ConcealedData>(entry)?
            .ok_or_else(|| KeyStoreError::EntryNotFound(entry.to_string()))?;
        let plaintext = Zeroizing::new(reveal(unlock, &concealed));
        Ok(f(&plaintext))
    }

    // ── Namespace management ─────────────────────────────────────

    /// True if `entry` exists in any protection class.
    pub fn contains(&self, entry: &str) -> KeyStoreResult<bool> {
        Ok(self.storage.get(&self.entry_key(entry))?.is_some())
    }

    /// Deletes `entry`. Deleting a missing entry is not an error.
    pub fn delete(&self, entry: &str) -> KeyStoreResult<()> {
        self.storage.delete(&self.entry_key(entry))?;
        Ok(())
    }

    /// Deletes every entry in the namespace, the vault key included.
    /// The keystore is uninitialized afterwards.
    pub fn wipe(&self) -> KeyStoreResult<()> {
        for key in self.storage.keys(&self.namespace)? {
            self.storage.delete(&key)?;
        }
        Ok(())
    }

    // ── Internals ────────────────────────────────────────────────

    fn entry_key(&self, entry: &str) -> String {
        format!("{}{}", self.namespace, entry)
    }

    fn vault_key(&self) -> KeyStoreResult<DerivedKey> {
        let bytes = self
            .storage
            .get(&self.entry_key(VAULT_KEY_ENTRY))?
            .ok_or(KeyStoreError::NotInitialized)?;
        let key = DerivedKey::from_slice(&bytes)?;
        Ok(key)
    }

    fn put_raw<T: Serialize>(&self, entry: &str, value: &T) -> KeyStoreResult<()> {
        let bytes = serde_json::to_vec(value)?;
        self.storage.put(&self.entry_key(entry), &bytes)?;
        Ok(())
    }

    fn get_raw<T: DeserializeOwned>(&self, entry: &str) -> KeyStoreResult<Option<T>> {
        let Some(bytes) = self.storage.get(&self.entry_key(entry))? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}
