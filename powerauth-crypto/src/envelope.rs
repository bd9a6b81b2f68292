//! Envelope encryption for the activation payload.
//!
//! The payload travels sealed to the server's static X25519 key under a
//! fresh ephemeral sender key, so only the server can read it and no two
//! activations share cryptographic material on the wire.

use crypto_box::{
    aead::{Aead, AeadCore, OsRng},
    PublicKey, SalsaBox, SecretKey,
};
use serde::{Deserialize, Serialize};

use crate::error::{CryptoError, CryptoResult};

/// Nonce size of the envelope construction.
pub const ENVELOPE_NONCE_SIZE: usize = 24;

/// A sealed payload together with the sender's ephemeral public key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    /// Ephemeral public key generated for this envelope only.
    pub ephemeral_public: [u8; 32],
    /// Nonce used for sealing.
    pub nonce: [u8; ENVELOPE_NONCE_SIZE],
    /// Sealed payload bytes.
    pub ciphertext: Vec<u8>,
}

/// Seals `plaintext` to the recipient's X25519 public key.
pub fn seal(recipient_public: &[u8; 32], plaintext: &[u8]) -> CryptoResult<Envelope> {
    let ephemeral = SecretKey::generate(&mut OsRng);
    let ephemeral_public = *ephemeral.public_key().as_bytes();

    let recipient = PublicKey::from(*recipient_public);
    let sealer = SalsaBox::new(&recipient, &ephemeral);
    let nonce = SalsaBox::generate_nonce(&mut OsRng);

    let ciphertext = sealer
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::Encryption("envelope sealing failed".to_string()))?;

    Ok(Envelope {
        ephemeral_public,
        nonce: nonce.into(),
        ciphertext,
    })
}

/// Opens an envelope with the recipient's secret key.
///
/// Only servers (and the in-memory test server) hold this key.
pub fn open(recipient_secret: &[u8; 32], envelope: &Envelope) -> CryptoResult<Vec<u8>> {
    let secret = SecretKey::from(*recipient_secret);
    let sender = PublicKey::from(envelope.ephemeral_public);
    let opener = SalsaBox::new(&sender, &secret);
    let nonce: crypto_box::aead::Nonce<SalsaBox> = envelope.nonce.into();

    opener
        .decrypt(&nonce, envelope.ciphertext.as_ref())
        .map_err(|_| CryptoError::Decryption("envelope opening failed".to_string()))
}

/// Generates a recipient key pair, returned as `(secret, public)` bytes.
/// Used by tests and the in-memory server to stand in for the backend.
#[must_use]
pub fn generate_recipient_pair() -> ([u8; 32], [u8; 32]) {
    let secret = SecretKey::generate(&mut OsRng);
    let public = *secret.public_key().as_bytes();
    (secret.to_bytes(), public)
}
