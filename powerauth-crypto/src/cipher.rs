//! Symmetric sealing for keystore entries and key wraps.
//!
//! Two modes with very different guarantees:
//!
//! - [`encrypt`] / [`decrypt`]: ChaCha20-Poly1305 AEAD. Tampering and wrong
//!   keys are detected. Used for everything whose unlock key is trusted
//!   (vault keys, possession entries, tokens, the activation record).
//! - [`conceal`] / [`reveal`]: raw ChaCha20 keystream, no authentication.
//!   Revealing with a wrong key yields well-formed garbage instead of an
//!   error. Used only for the knowledge factor key, where the server's
//!   signature verdict must stay the sole password oracle.

use crate::error::{CryptoError, CryptoResult};
use crate::key::DerivedKey;
use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Size of nonce in bytes (96 bits, shared by both modes).
pub const NONCE_SIZE: usize = 12;

/// Size of the Poly1305 authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Authenticated ciphertext with the metadata needed for decryption.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EncryptedData {
    /// The nonce used for encryption (unique per encryption).
    pub nonce: [u8; NONCE_SIZE],
    /// The encrypted ciphertext (includes auth tag).
    pub ciphertext: Vec<u8>,
}

/// Unauthenticated masked bytes produced by [`conceal`].
///
/// Carries no tag on purpose: there is nothing local to verify against.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConcealedData {
    /// The nonce used for the keystream (unique per conceal).
    pub nonce: [u8; NONCE_SIZE],
    /// Plaintext XORed with the keystream. Same length as the input.
    pub masked: Vec<u8>,
}

/// Encrypts plaintext using ChaCha20-Poly1305.
pub fn encrypt(key: &DerivedKey, plaintext: &[u8]) -> CryptoResult<EncryptedData> {
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    Ok(EncryptedData {
        nonce: nonce_bytes,
        ciphertext,
    })
}

/// Decrypts ChaCha20-Poly1305 ciphertext.
///
/// Fails on a wrong key or any modification of the ciphertext.
pub fn decrypt(key: &DerivedKey, encrypted: &EncryptedData) -> CryptoResult<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
    let nonce = Nonce::from_slice(&encrypted.nonce);

    cipher
        .decrypt(nonce, encrypted.ciphertext.as_ref())
        .map_err(|_| {
            CryptoError::Decryption("decryption failed (wrong key or tampered data)".to_string())
        })
}

/// Masks plaintext with a ChaCha20 keystream under a fresh nonce.
pub fn conceal(key: &DerivedKey, plaintext: &[u8]) -> ConcealedData {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let mut masked = plaintext.to_vec();
    let mut cipher = ChaCha20::new(key.as_bytes().into(), (&nonce).into());
    cipher.apply_keystream(&mut masked);

    ConcealedData { nonce, masked }
}

/// Unmasks [`ConcealedData`]. Never fails: a wrong key produces wrong
/// bytes, which the caller must only ever feed into a server-verified
/// operation.
pub fn reveal(key: &DerivedKey, concealed: &ConcealedData) -> Vec<u8> {
    let mut plaintext = concealed.masked.clone();
    let mut cipher = ChaCha20::new(key.as_bytes().into(), (&concealed.nonce).into());
    cipher.apply_keystream(&mut plaintext);
    plaintext
}
