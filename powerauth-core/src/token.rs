//! Named access tokens.
//!
//! A token authorizes low-friction repeated calls, typically push
//! registration or polling endpoints. Its secret is issued by the server
//! once, over a signed request, and afterwards token headers are computed
//! locally from a fresh nonce and timestamp without touching the replay
//! counter, so tokens survive offline periods and never desynchronize.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use powerauth_crypto::hmac_sha256;
use serde::{Deserialize, Serialize};

use crate::error::PowerAuthResult;

/// HTTP header name carrying a token digest.
pub const TOKEN_HEADER_NAME: &str = "X-PowerAuth-Token";

/// A named token held by this activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerAuthToken {
    pub name: String,
    pub token_id: String,
}

/// Keystore form of a token: identifier plus the base64 secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TokenEntry {
    pub token_id: String,
    pub secret: String,
}

/// One-shot authorization header computed from a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenHeader {
    pub token_id: String,
    /// Base64 of the 16 random bytes the digest covers.
    pub nonce: String,
    /// Unix timestamp in seconds the digest covers.
    pub timestamp: u64,
    /// Base64 HMAC over `{nonce}&{timestamp}` under the token secret.
    pub digest: String,
    pub version: String,
}

impl TokenHeader {
    /// Renders the header in the HTTP authorization format.
    #[must_use]
    pub fn header_value(&self) -> String {
        format!(
            "PowerAuth token_id=\"{}\", token_digest=\"{}\", nonce=\"{}\", \
             timestamp=\"{}\", version=\"{}\"",
            self.token_id, self.digest, self.nonce, self.timestamp, self.version,
        )
    }
}

/// Computes the digest a token header carries. Servers recompute this
/// from their copy of the token secret.
pub fn compute_token_digest(
    secret: &[u8],
    nonce_b64: &str,
    timestamp: u64,
) -> PowerAuthResult<String> {
    let message = format!("{nonce_b64}&{timestamp}");
    let mac = hmac_sha256(secret, message.as_bytes())?;
    Ok(STANDARD.encode(mac))
}
