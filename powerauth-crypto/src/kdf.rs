//! HKDF-SHA256 key derivation and the HMAC primitives built on it.
//!
//! Factor signing keys are expanded from the activation master secret with
//! the activation identifier as salt and one info string per factor, so no
//! two activations and no two factors ever share a key.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use powerauth_types::SignatureFactor;
use sha2::{Digest, Sha256};

use crate::error::{CryptoError, CryptoResult};
use crate::key::{DerivedKey, KEY_SIZE};

type HmacSha256 = Hmac<Sha256>;

/// Domain prefix for all key derivation info strings.
const DERIVATION_DOMAIN: &[u8] = b"PowerAuth/";

/// Derives a subkey from `key` with HKDF-SHA256 and domain separation.
pub fn derive_subkey(key: &DerivedKey, salt: &[u8], purpose: &str) -> CryptoResult<DerivedKey> {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), key.as_bytes());

    let mut info = Vec::with_capacity(DERIVATION_DOMAIN.len() + purpose.len());
    info.extend_from_slice(DERIVATION_DOMAIN);
    info.extend_from_slice(purpose.as_bytes());

    let mut output = [0u8; KEY_SIZE];
    hkdf.expand(&info, &mut output)
        .map_err(|e| CryptoError::KeyDerivation(format!("hkdf expansion failed: {e}")))?;

    Ok(DerivedKey::from_bytes(output))
}

/// Derives one factor signing key from the activation master secret.
pub fn derive_factor_key(
    master_secret: &DerivedKey,
    activation_id: &str,
    factor: SignatureFactor,
) -> CryptoResult<DerivedKey> {
    let purpose = format!("factor/{}", factor.as_str());
    derive_subkey(master_secret, activation_id.as_bytes(), &purpose)
}

/// HMAC-SHA256 of `data` under `key`.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> CryptoResult<[u8; 32]> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// Advances hash-based counter data by one step.
///
/// The next value is the first 16 bytes of SHA-256 of the current value;
/// the step is one-way, so a consumed value can never be re-derived.
#[must_use]
pub fn advance_counter_data(ctr_data: &[u8; 16]) -> [u8; 16] {
    let digest = Sha256::digest(ctr_data);
    let mut next = [0u8; 16];
    next.copy_from_slice(&digest[..16]);
    next
}
