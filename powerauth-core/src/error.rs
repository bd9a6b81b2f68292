use powerauth_crypto::CryptoError;
use powerauth_keystore::KeyStoreError;
use powerauth_types::ActivationState;
use thiserror::Error;

use crate::biometry::BiometryError;

/// Result alias for PowerAuth operations.
pub type PowerAuthResult<T> = Result<T, PowerAuthError>;

/// Errors surfaced by the activation engine.
///
/// The set is closed: every failure from a collaborator (transport,
/// keystore, biometric prompt) is classified into one of these variants
/// before it reaches the caller, so integrators can match exhaustively.
#[derive(Debug, Error)]
pub enum PowerAuthError {
    /// The request never reached the server or the response was lost.
    #[error("network request failed: {0}")]
    Network(String),

    /// The server rejected a signed request.
    #[error("signature was not accepted by the server: {0}")]
    Signature(String),

    /// The operation is not allowed in the current activation state.
    #[error("operation not allowed in activation state {current}")]
    InvalidActivationState { current: ActivationState },

    /// Activation data received from the server failed validation.
    #[error("invalid activation data: {0}")]
    InvalidActivationData(String),

    /// No activation is present on this instance.
    #[error("no activation is present")]
    MissingActivation,

    /// An activation ceremony has been started but not committed.
    #[error("activation is pending commit")]
    ActivationPending,

    /// The activation code has an invalid shape or checksum.
    #[error("invalid activation code: {0}")]
    InvalidActivationCode(String),

    /// The named token does not exist or its data is unusable.
    #[error("invalid or unknown token: {0}")]
    InvalidToken(String),

    /// Encryption, decryption or key handling failed locally.
    #[error("cryptographic operation failed: {0}")]
    Encryption(String),

    /// A caller-supplied parameter is missing or malformed.
    #[error("wrong parameter: {0}")]
    WrongParameter(String),

    /// A protocol upgrade step failed and will be retried later.
    #[error("protocol upgrade failed: {0}")]
    ProtocolUpgrade(String),

    /// Signing is blocked until the pending protocol upgrade finishes.
    #[error("a protocol upgrade is pending")]
    PendingProtocolUpgrade,

    /// The user dismissed the biometric prompt.
    #[error("biometric authentication was cancelled")]
    BiometryCancel,

    /// The device has no biometric hardware.
    #[error("biometric authentication is not supported on this device")]
    BiometryNotSupported,

    /// Biometric hardware exists but cannot be used right now.
    #[error("biometric authentication is not available")]
    BiometryNotAvailable,

    /// The presented biometric trait did not match.
    #[error("biometric authentication did not recognize the user")]
    BiometryNotRecognized,

    /// The operation was cancelled before it completed.
    #[error("operation was cancelled")]
    OperationCancelled,
}

impl From<KeyStoreError> for PowerAuthError {
    fn from(err: KeyStoreError) -> Self {
        match err {
            KeyStoreError::NotInitialized | KeyStoreError::EntryNotFound(_) => {
                Self::MissingActivation
            }
            other => Self::Encryption(other.to_string()),
        }
    }
}

impl From<CryptoError> for PowerAuthError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::InvalidActivationCode(msg) => Self::InvalidActivationCode(msg),
            CryptoError::InvalidSignature(msg) => Self::InvalidActivationData(msg),
            other => Self::Encryption(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for PowerAuthError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidActivationData(err.to_string())
    }
}

impl From<BiometryError> for PowerAuthError {
    fn from(err: BiometryError) -> Self {
        match err {
            BiometryError::Cancelled => Self::BiometryCancel,
            BiometryError::NotSupported => Self::BiometryNotSupported,
            BiometryError::NotAvailable => Self::BiometryNotAvailable,
            BiometryError::NotRecognized => Self::BiometryNotRecognized,
        }
    }
}
