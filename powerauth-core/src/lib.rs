//! PowerAuth client core: activation lifecycle and request signing.
//!
//! Binds a device installation to a backend through an activation
//! ceremony, then authorizes individual requests with multi-factor
//! symmetric signatures over a replay-protected counter.
//!
//! # Components
//!
//! - **Registry**: one [`PowerAuth`] per process, handing out isolated
//!   engines per configured instance
//! - **Engine**: the activation state machine, from creation through
//!   commit, status reconciliation, signing, upgrade and removal
//! - **Signature**: canonical request data and the per-factor
//!   HMAC-with-truncation scheme
//! - **Collaborators**: [`Transport`], [`BiometricPrompt`] and the
//!   keystore's `SecureStorage`, implemented by the embedding platform
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use powerauth_core::biometry::mock::MockBiometry;
//! use powerauth_core::transport::mock::MockServer;
//! use powerauth_core::{PowerAuth, PowerAuthConfig};
//! use powerauth_keystore::MemoryStorage;
//! use powerauth_types::InstanceId;
//!
//! let server = Arc::new(MockServer::new());
//! let config = PowerAuthConfig::new(
//!     InstanceId::new("wallet-app").unwrap(),
//!     "application-key",
//!     "application-secret",
//!     server.master_public_key(),
//!     "https://api.example.com/pa",
//! )
//! .unwrap();
//!
//! let registry = PowerAuth::new(
//!     Arc::new(MemoryStorage::new()),
//!     server,
//!     Arc::new(MockBiometry::new()),
//! );
//! ```

pub mod biometry;
mod config;
mod credentials;
mod engine;
mod error;
pub mod protocol;
mod record;
mod registry;
mod signature;
mod token;
pub mod transport;
mod upgrade;

pub use biometry::{BiometricPrompt, BiometryError, PromptContext};
pub use config::PowerAuthConfig;
pub use credentials::Authentication;
pub use engine::ActivationEngine;
pub use error::{PowerAuthError, PowerAuthResult};
pub use record::{ActivationRecord, ReplayCounter, LOOK_AHEAD_WINDOW};
pub use registry::PowerAuth;
pub use signature::{
    canonical_data, compute_signature, signature_type_label, SignatureHeader,
    SIGNATURE_HEADER_NAME,
};
pub use token::{compute_token_digest, PowerAuthToken, TokenHeader, TOKEN_HEADER_NAME};
pub use transport::{RejectionCode, Transport, TransportError};
pub use upgrade::UpgradeSession;
