//! Error types for the keystore layer.

use thiserror::Error;

/// Result type for keystore operations.
pub type KeyStoreResult<T> = Result<T, KeyStoreError>;

/// Errors raised by a [`crate::SecureStorage`] backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backing store failed (keychain unavailable, I/O error, ...).
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Errors that can occur in keystore operations.
#[derive(Debug, Error)]
pub enum KeyStoreError {
    /// The storage backend failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The namespace has no vault key yet.
    #[error("keystore not initialized")]
    NotInitialized,

    /// A required entry does not exist.
    #[error("entry not found: {0}")]
    EntryNotFound(String),

    /// Sealing or unsealing failed.
    #[error(transparent)]
    Crypto(#[from] powerauth_crypto::CryptoError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
