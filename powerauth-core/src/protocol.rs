//! Wire messages exchanged with the enrollment server.
//!
//! Every response arrives as a [`SignedResponse`]: the payload is carried
//! as the exact JSON text the server signed, and callers verify the
//! signature over those bytes before parsing. Verifying first means a
//! forged response is rejected before any of its content is interpreted.

use std::collections::BTreeMap;

use powerauth_crypto::{Envelope, MasterServerPublicKey};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{PowerAuthError, PowerAuthResult};
use crate::signature::SignatureHeader;

pub const URI_ACTIVATION_CREATE: &str = "/pa/activation/create";
pub const URI_ACTIVATION_COMMIT: &str = "/pa/activation/commit";
pub const URI_ACTIVATION_STATUS: &str = "/pa/activation/status";
pub const URI_ACTIVATION_REMOVE: &str = "/pa/activation/remove";
pub const URI_SIGNATURE_VALIDATE: &str = "/pa/signature/validate";
pub const URI_UPGRADE_START: &str = "/pa/upgrade/start";
pub const URI_UPGRADE_COMMIT: &str = "/pa/upgrade/commit";
pub const URI_TOKEN_CREATE: &str = "/pa/token/create";
pub const URI_TOKEN_REMOVE: &str = "/pa/token/remove";

/// A server response whose payload is signed with the master server key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedResponse {
    /// Exact JSON text of the response payload.
    pub payload: String,
    /// Base64 signature over the payload bytes.
    pub signature: String,
}

impl SignedResponse {
    /// Verifies the payload signature, then parses the payload.
    pub fn open<T: DeserializeOwned>(&self, key: &MasterServerPublicKey) -> PowerAuthResult<T> {
        key.verify(self.payload.as_bytes(), &self.signature)
            .map_err(|_| {
                PowerAuthError::InvalidActivationData(
                    "server response signature does not verify".into(),
                )
            })?;
        Ok(serde_json::from_str(&self.payload)?)
    }
}

/// How the client proves it may activate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivationIdentity {
    /// Out-of-band activation code handed to the user.
    Code { code: String },
    /// Custom credential attributes verified by the server operator.
    Attributes { attributes: BTreeMap<String, String> },
}

/// Inner activation request, transmitted only inside the sealed envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationCreatePayload {
    pub identity: ActivationIdentity,
    pub device_public_key: [u8; 32],
    pub device_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationCreateRequest {
    pub application_key: String,
    pub envelope: Envelope,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationCreateResponsePayload {
    pub activation_id: String,
    pub server_public_key: [u8; 32],
    /// Protocol version the server activated this identity with.
    pub protocol_version: String,
    /// Hash chain seed, present for version 3 activations.
    pub ctr_data: Option<[u8; 16]>,
    pub max_fail_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitConfirmRequest {
    pub activation_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitResponsePayload {
    pub state_code: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRequest {
    pub activation_id: String,
    /// Fresh random value echoed in the response to prevent replays.
    pub challenge: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponsePayload {
    pub challenge: String,
    pub state_code: u8,
    pub fail_count: u32,
    pub max_fail_count: u32,
    /// Number of replay elements the server has consumed so far.
    pub ctr_checkpoint: u64,
    /// Highest protocol version the server offers for this activation.
    pub supported_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeStartRequest {
    pub activation_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeStartResponsePayload {
    /// Hash chain seed for the upgraded activation.
    pub ctr_data: [u8; 16],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeCommitRequest {
    pub activation_id: String,
}

/// Payload of responses that carry no data beyond success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckPayload {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenCreateRequest {
    pub token_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenCreateResponsePayload {
    pub token_id: String,
    /// Base64 of the 32-byte token secret.
    pub token_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRemoveRequest {
    pub token_id: String,
}

/// A request authenticated with a computed signature header.
///
/// The body bytes are exactly what the signature covers. They are kept
/// as raw bytes so the transport and the verifying server see the same
/// serialization the client signed.
#[derive(Debug, Clone)]
pub struct AuthenticatedCall {
    pub method: String,
    pub uri_id: String,
    pub body: Vec<u8>,
    pub header: SignatureHeader,
}
