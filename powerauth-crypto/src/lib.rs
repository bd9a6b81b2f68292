//! Cryptographic primitives for the PowerAuth client.
//!
//! This crate owns every primitive the activation lifecycle and signature
//! engine build on:
//! - Zeroizing key material and Argon2id password unlock keys
//! - Authenticated sealing (ChaCha20-Poly1305) and the deliberately
//!   unauthenticated keystream wrap for the knowledge factor
//! - HKDF-SHA256 factor key derivation and HMAC-SHA256
//! - Activation code parsing, checksum validation and generation
//! - X25519 key agreement and Ed25519 server response verification
//! - Envelope encryption of the activation payload
//!
//! No state lives here; the activation record, keystore and engine are
//! separate crates layered on top.

mod cipher;
mod code;
mod envelope;
mod error;
mod exchange;
mod kdf;
mod key;

pub use cipher::{
    conceal, decrypt, encrypt, reveal, ConcealedData, EncryptedData, NONCE_SIZE, TAG_SIZE,
};
pub use code::{ActivationCode, CODE_BYTES};
pub use envelope::{
    generate_recipient_pair, open, seal, Envelope, ENVELOPE_NONCE_SIZE,
};
pub use error::{CryptoError, CryptoResult};
pub use exchange::{
    KeyAgreementPair, MasterServerPublicKey, ResponseSigner, MASTER_PUBLIC_KEY_SIZE,
};
pub use kdf::{advance_counter_data, derive_factor_key, derive_subkey, hmac_sha256};
pub use key::{derive_key, generate_random_key, DerivedKey, KdfParams, Salt, KEY_SIZE, SALT_SIZE};
