//! Activation key exchange and server response verification.
//!
//! The master server public key distributed with the application is 64
//! bytes in base64: an Ed25519 verifying key (first 32 bytes) used to check
//! server-signed responses, followed by the server's static X25519 key
//! (last 32 bytes) the activation payload is encrypted to.
//!
//! During the ceremony both sides contribute a fresh X25519 key pair; the
//! activation master secret is HKDF-derived from their shared secret.

use base64::{engine::general_purpose::STANDARD, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::{CryptoError, CryptoResult};
use crate::kdf::derive_subkey;
use crate::key::DerivedKey;

/// Size of the combined master server public key in bytes.
pub const MASTER_PUBLIC_KEY_SIZE: usize = 64;

/// The application-embedded master server public key.
#[derive(Clone)]
pub struct MasterServerPublicKey {
    verifying: VerifyingKey,
    encryption: [u8; 32],
}

impl MasterServerPublicKey {
    /// Parses the base64 form distributed in application configuration.
    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::KeyExchange(format!("invalid key base64: {e}")))?;
        if bytes.len() != MASTER_PUBLIC_KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: MASTER_PUBLIC_KEY_SIZE,
                actual: bytes.len(),
            });
        }

        let mut verifying_bytes = [0u8; 32];
        verifying_bytes.copy_from_slice(&bytes[..32]);
        let mut encryption = [0u8; 32];
        encryption.copy_from_slice(&bytes[32..]);

        Self::from_parts(verifying_bytes, encryption)
    }

    /// Builds the key from its two halves.
    pub fn from_parts(verifying: [u8; 32], encryption: [u8; 32]) -> CryptoResult<Self> {
        let verifying = VerifyingKey::from_bytes(&verifying)
            .map_err(|_| CryptoError::KeyExchange("invalid verifying key".to_string()))?;
        Ok(Self {
            verifying,
            encryption,
        })
    }

    /// Renders the combined base64 form.
    #[must_use]
    pub fn to_base64(&self) -> String {
        let mut bytes = Vec::with_capacity(MASTER_PUBLIC_KEY_SIZE);
        bytes.extend_from_slice(self.verifying.as_bytes());
        bytes.extend_from_slice(&self.encryption);
        STANDARD.encode(&bytes)
    }

    /// Verifies a base64 Ed25519 signature over `message`.
    pub fn verify(&self, message: &[u8], signature_b64: &str) -> CryptoResult<()> {
        let sig_bytes = STANDARD
            .decode(signature_b64)
            .map_err(|e| CryptoError::InvalidSignature(format!("invalid base64: {e}")))?;
        let signature = Signature::from_slice(&sig_bytes)
            .map_err(|_| CryptoError::InvalidSignature("invalid signature length".to_string()))?;

        self.verifying
            .verify(message, &signature)
            .map_err(|_| CryptoError::InvalidSignature("server signature mismatch".to_string()))
    }

    /// X25519 key the activation payload envelope is sealed to.
    #[must_use]
    pub fn encryption_key(&self) -> &[u8; 32] {
        &self.encryption
    }
}

impl std::fmt::Debug for MasterServerPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterServerPublicKey")
            .field("verifying", &STANDARD.encode(self.verifying.as_bytes()))
            .finish_non_exhaustive()
    }
}

/// One side's ephemeral contribution to the activation key agreement.
pub struct KeyAgreementPair {
    secret: StaticSecret,
}

impl KeyAgreementPair {
    /// Generates a fresh key pair.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            secret: StaticSecret::random_from_rng(OsRng),
        }
    }

    /// Restores a pair from stored secret bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self {
            secret: StaticSecret::from(bytes),
        }
    }

    /// Public key to send to the peer.
    #[must_use]
    pub fn public_bytes(&self) -> [u8; 32] {
        PublicKey::from(&self.secret).to_bytes()
    }

    /// Completes the agreement and derives the activation master secret.
    ///
    /// Rejects non-contributory (low-order) peer keys.
    pub fn master_secret(&self, peer_public: &[u8; 32]) -> CryptoResult<DerivedKey> {
        let peer = PublicKey::from(*peer_public);
        let shared = self.secret.diffie_hellman(&peer);
        if !shared.was_contributory() {
            return Err(CryptoError::KeyExchange(
                "non-contributory peer public key".to_string(),
            ));
        }
        derive_subkey(
            &DerivedKey::from_bytes(shared.to_bytes()),
            &[],
            "master-secret",
        )
    }
}

impl std::fmt::Debug for KeyAgreementPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyAgreementPair")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Server-side Ed25519 signer. Production servers hold this key; the
/// client crate uses it only in tests and the in-memory mock server.
pub struct ResponseSigner {
    key: SigningKey,
}

impl ResponseSigner {
    /// Generates a fresh signing key.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Builds a deterministic signer from a fixed seed.
    #[must_use]
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(&seed),
        }
    }

    /// The matching verifying key bytes.
    #[must_use]
    pub fn verifying_key_bytes(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }

    /// Signs `message`, returning the base64 signature.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> String {
        STANDARD.encode(self.key.sign(message).to_bytes())
    }
}

impl std::fmt::Debug for ResponseSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseSigner")
            .field("key", &"[REDACTED]")
            .finish()
    }
}
