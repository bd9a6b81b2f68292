//! Error types for the cryptographic layer.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur in cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Decryption failed (wrong key or tampered data).
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Key agreement with the peer public key failed.
    #[error("key exchange failed: {0}")]
    KeyExchange(String),

    /// A server signature did not verify against the master public key.
    #[error("signature verification failed: {0}")]
    InvalidSignature(String),

    /// Activation code is malformed or fails its checksum.
    #[error("invalid activation code: {0}")]
    InvalidActivationCode(String),

    /// Invalid key length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
