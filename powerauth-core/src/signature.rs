//! Multi-factor request signatures.
//!
//! A signature covers the canonical request data
//! `{METHOD}&{base64(uri_id)}&{base64(body)}&{base64(replay_element)}&{app_secret}`.
//! Each selected factor contributes an independent component: the factor
//! key is first specialized with the replay element, the specialized key
//! authenticates the canonical data, and the resulting MAC is truncated
//! to eight decimal digits. Components join with `-` in factor order.
//!
//! The replay element comes from the activation's counter and is consumed
//! by the caller after the signature is computed, so no element ever
//! signs two requests.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use powerauth_crypto::{hmac_sha256, DerivedKey};
use powerauth_types::SignatureFactor;

use crate::error::PowerAuthResult;

/// HTTP header name carrying a computed signature.
pub const SIGNATURE_HEADER_NAME: &str = "X-PowerAuth-Authorization";

/// Decimal digits kept from each factor's truncated MAC.
const COMPONENT_DIGITS: u32 = 8;

/// A computed signature and the request metadata a verifier needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub activation_id: String,
    pub application_key: String,
    /// Base64 of the replay element the signature was computed over.
    pub nonce: String,
    /// Underscore-joined factor names, e.g. `possession_knowledge`.
    pub signature_type: String,
    /// Dash-joined eight-digit components, one per factor.
    pub signature: String,
    /// Protocol version the signature was computed under.
    pub version: String,
}

impl SignatureHeader {
    /// Renders the header in the HTTP authorization format.
    #[must_use]
    pub fn header_value(&self) -> String {
        format!(
            "PowerAuth pa_activation_id=\"{}\", pa_application_key=\"{}\", \
             pa_nonce=\"{}\", pa_signature_type=\"{}\", pa_signature=\"{}\", \
             pa_version=\"{}\"",
            self.activation_id,
            self.application_key,
            self.nonce,
            self.signature_type,
            self.signature,
            self.version,
        )
    }
}

/// Builds the canonical data string a signature covers.
#[must_use]
pub fn canonical_data(
    method: &str,
    uri_id: &str,
    body: &[u8],
    replay_element: &[u8],
    application_secret: &str,
) -> String {
    format!(
        "{}&{}&{}&{}&{}",
        method,
        STANDARD.encode(uri_id.as_bytes()),
        STANDARD.encode(body),
        STANDARD.encode(replay_element),
        application_secret,
    )
}

/// Computes the dash-joined signature for the given factor keys.
///
/// Keys must already be in canonical factor order. The same key list,
/// replay element and canonical data always produce the same signature,
/// which is exactly what a verifying server recomputes.
pub fn compute_signature(
    factor_keys: &[(SignatureFactor, DerivedKey)],
    replay_element: &[u8],
    canonical: &str,
) -> PowerAuthResult<String> {
    let mut components = Vec::with_capacity(factor_keys.len());
    for (_, key) in factor_keys {
        let specialized = hmac_sha256(key.as_bytes(), replay_element)?;
        let mac = hmac_sha256(&specialized, canonical.as_bytes())?;
        components.push(truncate_component(&mac));
    }
    Ok(components.join("-"))
}

/// Underscore-joined label for a factor set, e.g. `possession_biometry`.
#[must_use]
pub fn signature_type_label(factors: &[SignatureFactor]) -> String {
    factors
        .iter()
        .map(|factor| factor.as_str())
        .collect::<Vec<_>>()
        .join("_")
}

/// Dynamic truncation of a MAC to eight decimal digits.
///
/// The low nibble of the final byte selects a four-byte window, the sign
/// bit is cleared and the value reduced modulo 10^8, zero padded.
fn truncate_component(mac: &[u8; 32]) -> String {
    let offset = (mac[31] & 0x0f) as usize;
    let window = u32::from_be_bytes([
        mac[offset],
        mac[offset + 1],
        mac[offset + 2],
        mac[offset + 3],
    ]);
    let value = (window & 0x7fff_ffff) % 10_u32.pow(COMPONENT_DIGITS);
    format!("{value:08}")
}
