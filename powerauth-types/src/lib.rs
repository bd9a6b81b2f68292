//! Core type definitions for the PowerAuth client.
//!
//! This crate defines the fundamental, platform-agnostic types shared by the
//! rest of the workspace:
//! - Activation lifecycle states and their wire codes
//! - Activation status snapshots as reported by the server
//! - Protocol versions and signature factors
//! - Instance and activation identifiers
//!
//! Everything stateful (the activation record, the signature engine, the
//! keystore) lives in its own crate; only plain data belongs here.

mod factor;
mod ids;
mod state;
mod status;
mod version;

pub use factor::SignatureFactor;
pub use ids::{ActivationId, InstanceId};
pub use state::ActivationState;
pub use status::ActivationStatus;
pub use version::ProtocolVersion;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unknown activation state code: {0}")]
    UnknownStateCode(u8),

    #[error("unknown protocol version: {0}")]
    UnknownVersion(String),

    #[error("identifier must not be empty")]
    EmptyIdentifier,
}
