//! Server communication boundary.
//!
//! The engine talks to the enrollment server only through the
//! [`Transport`] trait, one method per endpoint. Implementations carry
//! requests over whatever channel the platform provides; the in-memory
//! [`mock::MockServer`] implements the full server side of the protocol
//! for tests, including real signature verification.

use async_trait::async_trait;
use thiserror::Error;

use crate::protocol::{
    ActivationCreateRequest, AuthenticatedCall, CommitConfirmRequest, SignedResponse,
    StatusRequest, UpgradeStartRequest,
};

/// Reason the server attached to a rejected request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionCode {
    /// The activation does not exist on the server.
    UnknownActivation,
    /// Activation payload, code or envelope failed validation.
    InvalidActivationData,
    /// The computed signature did not verify.
    InvalidSignature,
    /// The referenced token does not exist.
    InvalidToken,
    /// The upgrade step is not valid for the activation's state.
    UpgradeNotAllowed,
    /// The upgrade was already committed by an earlier request.
    UpgradeCommitted,
}

/// Failures at the transport boundary.
///
/// `Network` means the outcome is unknown: the request may or may not
/// have been processed. `Rejected` means the server processed the
/// request and refused it for the given reason.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("network failure: {0}")]
    Network(String),
    #[error("server rejected the request: {message}")]
    Rejected {
        code: RejectionCode,
        message: String,
    },
}

impl TransportError {
    pub(crate) fn rejected(code: RejectionCode, message: impl Into<String>) -> Self {
        Self::Rejected {
            code,
            message: message.into(),
        }
    }
}

/// Client view of the enrollment server endpoints.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_activation_create(
        &self,
        request: ActivationCreateRequest,
    ) -> Result<SignedResponse, TransportError>;

    async fn send_commit_confirm(
        &self,
        request: CommitConfirmRequest,
    ) -> Result<SignedResponse, TransportError>;

    async fn send_status_query(
        &self,
        request: StatusRequest,
    ) -> Result<SignedResponse, TransportError>;

    async fn send_upgrade_start(
        &self,
        request: UpgradeStartRequest,
    ) -> Result<SignedResponse, TransportError>;

    async fn send_activation_remove(
        &self,
        call: AuthenticatedCall,
    ) -> Result<SignedResponse, TransportError>;

    async fn send_validation_request(
        &self,
        call: AuthenticatedCall,
    ) -> Result<SignedResponse, TransportError>;

    async fn send_upgrade_commit(
        &self,
        call: AuthenticatedCall,
    ) -> Result<SignedResponse, TransportError>;

    async fn send_token_create(
        &self,
        call: AuthenticatedCall,
    ) -> Result<SignedResponse, TransportError>;

    async fn send_token_remove(
        &self,
        call: AuthenticatedCall,
    ) -> Result<SignedResponse, TransportError>;
}

/// In-memory server implementing the protocol end to end.
pub mod mock {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use powerauth_crypto::{
        derive_factor_key, open, ActivationCode, DerivedKey, KeyAgreementPair,
        MasterServerPublicKey, ResponseSigner,
    };
    use powerauth_types::{ProtocolVersion, SignatureFactor};
    use rand::RngCore;
    use serde::Serialize;
    use uuid::Uuid;

    use super::*;
    use crate::protocol::{
        ActivationCreatePayload, ActivationCreateResponsePayload, ActivationIdentity, AckPayload,
        CommitResponsePayload, StatusResponsePayload, TokenCreateResponsePayload,
        TokenRemoveRequest, UpgradeStartResponsePayload,
    };
    use crate::record::{ReplayCounter, LOOK_AHEAD_WINDOW};
    use crate::signature::{canonical_data, compute_signature};

    /// Application key the mock server accepts.
    pub const APPLICATION_KEY: &str = "test-application-key";
    /// Application secret matching [`APPLICATION_KEY`].
    pub const APPLICATION_SECRET: &str = "test-application-secret";

    /// Maximum failed attempts the mock server allows before blocking.
    pub const DEFAULT_MAX_FAIL_COUNT: u32 = 5;

    struct ServerActivation {
        state_code: u8,
        fail_count: u32,
        max_fail_count: u32,
        master_secret: DerivedKey,
        counter: ReplayCounter,
        /// Index of the next element expected in the current chain.
        position: u64,
        pending_upgrade: Option<[u8; 16]>,
        tokens: HashMap<String, String>,
    }

    #[derive(Default)]
    struct Behavior {
        fail_next: u32,
        reject_next_create: bool,
        auto_commit_disabled: bool,
    }

    struct ServerState {
        activations: HashMap<String, ServerActivation>,
        behavior: Behavior,
        activation_version: ProtocolVersion,
        supported_version: ProtocolVersion,
        calls: Vec<String>,
    }

    /// The server half of the protocol, held entirely in memory.
    ///
    /// It owns a real signing key and envelope decryption key, verifies
    /// every computed signature with the same algorithm as production
    /// servers, and walks the look-ahead window over the replay counter.
    pub struct MockServer {
        signer: ResponseSigner,
        encryption_secret: [u8; 32],
        encryption_public: [u8; 32],
        state: Mutex<ServerState>,
    }

    impl MockServer {
        pub fn new() -> Self {
            let (encryption_secret, encryption_public) =
                powerauth_crypto::generate_recipient_pair();
            Self {
                signer: ResponseSigner::generate(),
                encryption_secret,
                encryption_public,
                state: Mutex::new(ServerState {
                    activations: HashMap::new(),
                    behavior: Behavior::default(),
                    activation_version: ProtocolVersion::V3,
                    supported_version: ProtocolVersion::V3,
                    calls: Vec::new(),
                }),
            }
        }

        /// Combined master public key for client configuration.
        pub fn master_public_key(&self) -> String {
            MasterServerPublicKey::from_parts(
                self.signer.verifying_key_bytes(),
                self.encryption_public,
            )
            .unwrap()
            .to_base64()
        }

        /// Fails the next `count` requests with a network error.
        pub fn fail_next_requests(&self, count: u32) {
            self.state.lock().unwrap().behavior.fail_next = count;
        }

        /// Rejects the next activation attempt as invalid.
        pub fn reject_next_create(&self) {
            self.state.lock().unwrap().behavior.reject_next_create = true;
        }

        /// When disabled, commits park in the pending-commit state until
        /// [`MockServer::approve_activation`] is called.
        pub fn set_auto_commit(&self, enabled: bool) {
            self.state.lock().unwrap().behavior.auto_commit_disabled = !enabled;
        }

        /// Protocol version handed to newly created activations.
        pub fn set_activation_version(&self, version: ProtocolVersion) {
            self.state.lock().unwrap().activation_version = version;
        }

        /// Highest version advertised in status responses.
        pub fn set_supported_version(&self, version: ProtocolVersion) {
            self.state.lock().unwrap().supported_version = version;
        }

        /// Completes a server-side commit for a parked activation.
        pub fn approve_activation(&self, activation_id: &str) {
            let mut state = self.state.lock().unwrap();
            if let Some(activation) = state.activations.get_mut(activation_id) {
                if activation.state_code == 2 {
                    activation.state_code = 3;
                }
            }
        }

        /// Blocks the activation, as an operator console would.
        pub fn block_activation(&self, activation_id: &str) {
            self.set_state_code(activation_id, 4);
        }

        /// Unblocks a blocked activation.
        pub fn unblock_activation(&self, activation_id: &str) {
            self.set_state_code(activation_id, 3);
        }

        /// Removes the activation server-side, keeping a tombstone.
        pub fn remove_activation(&self, activation_id: &str) {
            self.set_state_code(activation_id, 5);
        }

        /// Consumes `count` replay elements as another device would.
        pub fn simulate_foreign_signatures(&self, activation_id: &str, count: u64) {
            let mut state = self.state.lock().unwrap();
            if let Some(activation) = state.activations.get_mut(activation_id) {
                for _ in 0..count {
                    activation.counter = activation.counter.advanced();
                    activation.position += 1;
                }
            }
        }

        /// Current wire state code of an activation.
        pub fn state_code(&self, activation_id: &str) -> Option<u8> {
            let state = self.state.lock().unwrap();
            state.activations.get(activation_id).map(|a| a.state_code)
        }

        /// Server-side fail counter of an activation.
        pub fn fail_count(&self, activation_id: &str) -> Option<u32> {
            let state = self.state.lock().unwrap();
            state.activations.get(activation_id).map(|a| a.fail_count)
        }

        /// Next expected chain position of an activation.
        pub fn position(&self, activation_id: &str) -> Option<u64> {
            let state = self.state.lock().unwrap();
            state.activations.get(activation_id).map(|a| a.position)
        }

        /// Number of tokens the activation holds.
        pub fn token_count(&self, activation_id: &str) -> Option<usize> {
            let state = self.state.lock().unwrap();
            state.activations.get(activation_id).map(|a| a.tokens.len())
        }

        /// Base64 secret issued for a token.
        pub fn token_secret(&self, activation_id: &str, token_id: &str) -> Option<String> {
            let state = self.state.lock().unwrap();
            state
                .activations
                .get(activation_id)
                .and_then(|a| a.tokens.get(token_id).cloned())
        }

        /// Drops a token server-side, as an operator console would.
        pub fn revoke_token(&self, activation_id: &str, token_id: &str) {
            let mut state = self.state.lock().unwrap();
            if let Some(activation) = state.activations.get_mut(activation_id) {
                activation.tokens.remove(token_id);
            }
        }

        /// Endpoint names in the order they were hit.
        pub fn calls(&self) -> Vec<String> {
            self.state.lock().unwrap().calls.clone()
        }

        fn set_state_code(&self, activation_id: &str, code: u8) {
            let mut state = self.state.lock().unwrap();
            if let Some(activation) = state.activations.get_mut(activation_id) {
                activation.state_code = code;
            }
        }

        fn begin(&self, endpoint: &str) -> Result<(), TransportError> {
            let mut state = self.state.lock().unwrap();
            state.calls.push(endpoint.to_string());
            if state.behavior.fail_next > 0 {
                state.behavior.fail_next -= 1;
                return Err(TransportError::Network("scripted network failure".into()));
            }
            Ok(())
        }

        fn signed<T: Serialize>(&self, payload: &T) -> SignedResponse {
            let payload = serde_json::to_string(payload).unwrap();
            let signature = self.signer.sign(payload.as_bytes());
            SignedResponse { payload, signature }
        }

        /// Verifies a computed signature, walking the look-ahead window.
        ///
        /// On success the activation's counter and position move just past
        /// the matched element, and a multi-factor signature clears the
        /// fail counter. On failure the fail counter grows and reaching
        /// the limit blocks the activation.
        fn verify_signature(
            activation: &mut ServerActivation,
            activation_id: &str,
            call: &AuthenticatedCall,
            expected: ReplayCounter,
            base_position: u64,
        ) -> Result<(), TransportError> {
            let factors = parse_factors(&call.header.signature_type)?;
            let element = STANDARD.decode(&call.header.nonce).map_err(|_| {
                TransportError::rejected(RejectionCode::InvalidSignature, "malformed nonce")
            })?;

            let mut candidate = expected;
            for step in 0..=LOOK_AHEAD_WINDOW {
                if candidate.element() == element {
                    let keys = factor_keys(&activation.master_secret, activation_id, &factors);
                    let canonical = canonical_data(
                        &call.method,
                        &call.uri_id,
                        &call.body,
                        &element,
                        APPLICATION_SECRET,
                    );
                    let computed = compute_signature(&keys, &element, &canonical).unwrap();
                    if computed == call.header.signature {
                        activation.counter = candidate.advanced();
                        activation.position = base_position + step + 1;
                        if factors.len() > 1 {
                            activation.fail_count = 0;
                        }
                        return Ok(());
                    }
                    break;
                }
                candidate = candidate.advanced();
            }

            activation.fail_count = (activation.fail_count + 1).min(activation.max_fail_count);
            if activation.fail_count >= activation.max_fail_count {
                activation.state_code = 4;
            }
            Err(TransportError::rejected(
                RejectionCode::InvalidSignature,
                "signature verification failed",
            ))
        }

        fn verify_active_call(
            state: &mut ServerState,
            call: &AuthenticatedCall,
        ) -> Result<(), TransportError> {
            if call.header.application_key != APPLICATION_KEY {
                return Err(TransportError::rejected(
                    RejectionCode::InvalidSignature,
                    "unknown application key",
                ));
            }
            let activation_id = call.header.activation_id.clone();
            let activation = state.activations.get_mut(&activation_id).ok_or_else(|| {
                TransportError::rejected(RejectionCode::UnknownActivation, "unknown activation")
            })?;
            if activation.state_code != 3 {
                return Err(TransportError::rejected(
                    RejectionCode::UnknownActivation,
                    "activation is not active",
                ));
            }
            let expected = activation.counter.clone();
            let base_position = activation.position;
            Self::verify_signature(activation, &activation_id, call, expected, base_position)
        }
    }

    impl Default for MockServer {
        fn default() -> Self {
            Self::new()
        }
    }

    fn parse_factors(label: &str) -> Result<Vec<SignatureFactor>, TransportError> {
        label
            .split('_')
            .map(|name| match name {
                "possession" => Ok(SignatureFactor::Possession),
                "knowledge" => Ok(SignatureFactor::Knowledge),
                "biometry" => Ok(SignatureFactor::Biometry),
                other => Err(TransportError::rejected(
                    RejectionCode::InvalidSignature,
                    format!("unknown factor {other}"),
                )),
            })
            .collect()
    }

    fn factor_keys(
        master_secret: &DerivedKey,
        activation_id: &str,
        factors: &[SignatureFactor],
    ) -> Vec<(SignatureFactor, DerivedKey)> {
        factors
            .iter()
            .map(|factor| {
                let key = derive_factor_key(master_secret, activation_id, *factor).unwrap();
                (*factor, key)
            })
            .collect()
    }

    #[async_trait]
    impl Transport for MockServer {
        async fn send_activation_create(
            &self,
            request: ActivationCreateRequest,
        ) -> Result<SignedResponse, TransportError> {
            self.begin("activation/create")?;
            let mut state = self.state.lock().unwrap();

            if state.behavior.reject_next_create {
                state.behavior.reject_next_create = false;
                return Err(TransportError::rejected(
                    RejectionCode::InvalidActivationData,
                    "activation was rejected",
                ));
            }
            if request.application_key != APPLICATION_KEY {
                return Err(TransportError::rejected(
                    RejectionCode::InvalidActivationData,
                    "unknown application key",
                ));
            }

            let plaintext = open(&self.encryption_secret, &request.envelope).map_err(|_| {
                TransportError::rejected(
                    RejectionCode::InvalidActivationData,
                    "activation envelope cannot be opened",
                )
            })?;
            let payload: ActivationCreatePayload =
                serde_json::from_slice(&plaintext).map_err(|_| {
                    TransportError::rejected(
                        RejectionCode::InvalidActivationData,
                        "malformed activation payload",
                    )
                })?;

            match &payload.identity {
                ActivationIdentity::Code { code } => {
                    ActivationCode::parse(code).map_err(|_| {
                        TransportError::rejected(
                            RejectionCode::InvalidActivationData,
                            "invalid activation code",
                        )
                    })?;
                }
                ActivationIdentity::Attributes { attributes } => {
                    if attributes.is_empty() {
                        return Err(TransportError::rejected(
                            RejectionCode::InvalidActivationData,
                            "empty identity attributes",
                        ));
                    }
                }
            }

            let server_pair = KeyAgreementPair::generate();
            let master_secret = server_pair
                .master_secret(&payload.device_public_key)
                .map_err(|_| {
                    TransportError::rejected(
                        RejectionCode::InvalidActivationData,
                        "invalid device public key",
                    )
                })?;

            let activation_id = Uuid::new_v4().to_string();
            let version = state.activation_version;
            let (counter, ctr_data) = match version {
                ProtocolVersion::V2 => (ReplayCounter::Numeric(0), None),
                ProtocolVersion::V3 => {
                    let mut seed = [0u8; 16];
                    rand::thread_rng().fill_bytes(&mut seed);
                    (ReplayCounter::HashChain { ctr_data: seed }, Some(seed))
                }
            };

            state.activations.insert(
                activation_id.clone(),
                ServerActivation {
                    state_code: 1,
                    fail_count: 0,
                    max_fail_count: DEFAULT_MAX_FAIL_COUNT,
                    master_secret,
                    counter,
                    position: 0,
                    pending_upgrade: None,
                    tokens: HashMap::new(),
                },
            );

            Ok(self.signed(&ActivationCreateResponsePayload {
                activation_id,
                server_public_key: server_pair.public_bytes(),
                protocol_version: version.as_str().to_string(),
                ctr_data,
                max_fail_count: DEFAULT_MAX_FAIL_COUNT,
            }))
        }

        async fn send_commit_confirm(
            &self,
            request: CommitConfirmRequest,
        ) -> Result<SignedResponse, TransportError> {
            self.begin("activation/commit")?;
            let mut state = self.state.lock().unwrap();
            let parked = state.behavior.auto_commit_disabled;
            let activation = state
                .activations
                .get_mut(&request.activation_id)
                .ok_or_else(|| {
                    TransportError::rejected(
                        RejectionCode::UnknownActivation,
                        "unknown activation",
                    )
                })?;

            match activation.state_code {
                1 => activation.state_code = if parked { 2 } else { 3 },
                2 | 3 => {}
                _ => {
                    return Err(TransportError::rejected(
                        RejectionCode::UnknownActivation,
                        "activation cannot be committed",
                    ))
                }
            }

            let state_code = activation.state_code;
            Ok(self.signed(&CommitResponsePayload { state_code }))
        }

        async fn send_status_query(
            &self,
            request: StatusRequest,
        ) -> Result<SignedResponse, TransportError> {
            self.begin("activation/status")?;
            let state = self.state.lock().unwrap();
            let activation = state
                .activations
                .get(&request.activation_id)
                .ok_or_else(|| {
                    TransportError::rejected(
                        RejectionCode::UnknownActivation,
                        "unknown activation",
                    )
                })?;

            Ok(self.signed(&StatusResponsePayload {
                challenge: request.challenge,
                state_code: activation.state_code,
                fail_count: activation.fail_count,
                max_fail_count: activation.max_fail_count,
                ctr_checkpoint: activation.position,
                supported_version: state.supported_version.as_str().to_string(),
            }))
        }

        async fn send_upgrade_start(
            &self,
            request: UpgradeStartRequest,
        ) -> Result<SignedResponse, TransportError> {
            self.begin("upgrade/start")?;
            let mut state = self.state.lock().unwrap();
            let activation = state
                .activations
                .get_mut(&request.activation_id)
                .ok_or_else(|| {
                    TransportError::rejected(
                        RejectionCode::UnknownActivation,
                        "unknown activation",
                    )
                })?;

            if activation.state_code != 3 {
                return Err(TransportError::rejected(
                    RejectionCode::UpgradeNotAllowed,
                    "activation is not active",
                ));
            }
            if activation.counter.protocol_version() == ProtocolVersion::V3 {
                return Err(TransportError::rejected(
                    RejectionCode::UpgradeNotAllowed,
                    "activation already uses the latest protocol",
                ));
            }

            // Retrying start returns the same seed so the client never
            // holds a seed the server has forgotten.
            let ctr_data = match activation.pending_upgrade {
                Some(seed) => seed,
                None => {
                    let mut seed = [0u8; 16];
                    rand::thread_rng().fill_bytes(&mut seed);
                    activation.pending_upgrade = Some(seed);
                    seed
                }
            };

            Ok(self.signed(&UpgradeStartResponsePayload { ctr_data }))
        }

        async fn send_activation_remove(
            &self,
            call: AuthenticatedCall,
        ) -> Result<SignedResponse, TransportError> {
            self.begin("activation/remove")?;
            let mut state = self.state.lock().unwrap();
            Self::verify_active_call(&mut state, &call)?;

            let activation = state
                .activations
                .get_mut(&call.header.activation_id)
                .ok_or_else(|| {
                    TransportError::rejected(
                        RejectionCode::UnknownActivation,
                        "unknown activation",
                    )
                })?;
            activation.state_code = 5;
            activation.tokens.clear();
            Ok(self.signed(&AckPayload { ok: true }))
        }

        async fn send_validation_request(
            &self,
            call: AuthenticatedCall,
        ) -> Result<SignedResponse, TransportError> {
            self.begin("signature/validate")?;
            let mut state = self.state.lock().unwrap();
            Self::verify_active_call(&mut state, &call)?;
            Ok(self.signed(&AckPayload { ok: true }))
        }

        async fn send_upgrade_commit(
            &self,
            call: AuthenticatedCall,
        ) -> Result<SignedResponse, TransportError> {
            self.begin("upgrade/commit")?;
            let mut state = self.state.lock().unwrap();
            let activation_id = call.header.activation_id.clone();
            let activation = state.activations.get_mut(&activation_id).ok_or_else(|| {
                TransportError::rejected(RejectionCode::UnknownActivation, "unknown activation")
            })?;

            if activation.state_code != 3 {
                return Err(TransportError::rejected(
                    RejectionCode::UpgradeNotAllowed,
                    "activation is not active",
                ));
            }

            let Some(pending) = activation.pending_upgrade else {
                // A lost commit response leaves the client retrying an
                // upgrade this server has already finished.
                if activation.counter.protocol_version() == ProtocolVersion::V3 {
                    return Err(TransportError::rejected(
                        RejectionCode::UpgradeCommitted,
                        "upgrade was already committed",
                    ));
                }
                return Err(TransportError::rejected(
                    RejectionCode::UpgradeNotAllowed,
                    "no upgrade was started",
                ));
            };

            // The commit is signed with the first element of the new
            // chain, so verification walks from position zero.
            Self::verify_signature(
                activation,
                &activation_id,
                &call,
                ReplayCounter::HashChain { ctr_data: pending },
                0,
            )?;
            activation.pending_upgrade = None;
            Ok(self.signed(&AckPayload { ok: true }))
        }

        async fn send_token_create(
            &self,
            call: AuthenticatedCall,
        ) -> Result<SignedResponse, TransportError> {
            self.begin("token/create")?;
            let mut state = self.state.lock().unwrap();
            Self::verify_active_call(&mut state, &call)?;

            let mut secret = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut secret);
            let token_id = Uuid::new_v4().to_string();
            let token_secret = STANDARD.encode(secret);

            let activation = state
                .activations
                .get_mut(&call.header.activation_id)
                .ok_or_else(|| {
                    TransportError::rejected(
                        RejectionCode::UnknownActivation,
                        "unknown activation",
                    )
                })?;
            activation
                .tokens
                .insert(token_id.clone(), token_secret.clone());

            Ok(self.signed(&TokenCreateResponsePayload {
                token_id,
                token_secret,
            }))
        }

        async fn send_token_remove(
            &self,
            call: AuthenticatedCall,
        ) -> Result<SignedResponse, TransportError> {
            self.begin("token/remove")?;
            let mut state = self.state.lock().unwrap();
            Self::verify_active_call(&mut state, &call)?;

            let request: TokenRemoveRequest =
                serde_json::from_slice(&call.body).map_err(|_| {
                    TransportError::rejected(
                        RejectionCode::InvalidToken,
                        "malformed token removal request",
                    )
                })?;

            let activation = state
                .activations
                .get_mut(&call.header.activation_id)
                .ok_or_else(|| {
                    TransportError::rejected(
                        RejectionCode::UnknownActivation,
                        "unknown activation",
                    )
                })?;
            if activation.tokens.remove(&request.token_id).is_none() {
                return Err(TransportError::rejected(
                    RejectionCode::InvalidToken,
                    "unknown token",
                ));
            }
            Ok(self.signed(&AckPayload { ok: true }))
        }
    }
}
