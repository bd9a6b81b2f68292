//! Activation lifecycle engine.
//!
//! One engine owns one activation instance: its persisted record, its
//! factor keys and its server communication. Every operation serializes
//! on a per-instance lock held across the whole round-trip, so the
//! replay counter and the persisted record can never race.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use powerauth_crypto::{
    derive_factor_key, derive_key, seal, ActivationCode, DerivedKey, KdfParams,
    KeyAgreementPair, MasterServerPublicKey, Salt,
};
use powerauth_keystore::{KeyStore, SecureStorage};
use powerauth_types::{
    ActivationId, ActivationState, ActivationStatus, InstanceId, ProtocolVersion, SignatureFactor,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::biometry::{BiometricPrompt, PromptContext};
use crate::config::PowerAuthConfig;
use crate::credentials::Authentication;
use crate::error::{PowerAuthError, PowerAuthResult};
use crate::protocol::{
    ActivationCreatePayload, ActivationCreateRequest, ActivationCreateResponsePayload,
    ActivationIdentity, AckPayload, AuthenticatedCall, CommitConfirmRequest,
    CommitResponsePayload, RemoveRequest, SignedResponse, StatusRequest, StatusResponsePayload,
    TokenCreateRequest, TokenCreateResponsePayload, TokenRemoveRequest, UpgradeCommitRequest,
    UpgradeStartRequest, UpgradeStartResponsePayload, ValidationRequest, URI_ACTIVATION_REMOVE,
    URI_SIGNATURE_VALIDATE, URI_TOKEN_CREATE, URI_TOKEN_REMOVE, URI_UPGRADE_COMMIT,
};
use crate::record::{ActivationRecord, ReplayCounter};
use crate::signature::{canonical_data, compute_signature, signature_type_label, SignatureHeader};
use crate::token::{compute_token_digest, PowerAuthToken, TokenEntry, TokenHeader};
use crate::transport::{RejectionCode, Transport, TransportError};
use crate::upgrade::UpgradeSession;

const RECORD_ENTRY: &str = "record";
const MASTER_SECRET_ENTRY: &str = "key/master";
const POSSESSION_KEY_ENTRY: &str = "key/possession";
const KNOWLEDGE_KEY_ENTRY: &str = "key/knowledge";
const KNOWLEDGE_META_ENTRY: &str = "key/knowledge-meta";
const BIOMETRY_KEY_ENTRY: &str = "key/biometry";
const TOKEN_ENTRY_PREFIX: &str = "token/";

/// Salt and cost parameters the password unlock key was derived with.
/// Stored next to the wrapped knowledge key so passwords keep working
/// after the configured defaults change.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct KnowledgeMeta {
    salt: Salt,
    params: KdfParams,
}

/// Server endpoints reachable only with a computed signature.
#[derive(Debug, Clone, Copy)]
enum SignedEndpoint {
    Remove,
    Validate,
    TokenCreate,
    TokenRemove,
}

/// The activation engine for a single configured instance.
pub struct ActivationEngine {
    config: PowerAuthConfig,
    /// Parsed form of the configured master server public key.
    master_key: MasterServerPublicKey,
    keystore: KeyStore,
    transport: Arc<dyn Transport>,
    biometry: Arc<dyn BiometricPrompt>,
    /// In-memory copy of the persisted record, `None` without activation.
    record: Mutex<Option<ActivationRecord>>,
    /// Flips to true when the instance is deconfigured.
    cancel: watch::Sender<bool>,
}

impl ActivationEngine {
    // ── Construction ─────────────────────────────────────────────────

    /// Opens the engine, loading any persisted activation record.
    pub(crate) fn open(
        config: PowerAuthConfig,
        storage: Arc<dyn SecureStorage>,
        transport: Arc<dyn Transport>,
        biometry: Arc<dyn BiometricPrompt>,
    ) -> PowerAuthResult<Self> {
        let master_key = MasterServerPublicKey::from_base64(&config.master_server_public_key)
            .map_err(|e| {
                PowerAuthError::WrongParameter(format!("master server public key: {e}"))
            })?;
        let keystore = KeyStore::new(storage, config.instance_id.as_str());

        let record = if keystore.is_initialized()? {
            keystore.get_json::<ActivationRecord>(RECORD_ENTRY)?
        } else {
            None
        };
        if let Some(record) = &record {
            debug!(
                "restored activation {} in state {}",
                record.activation_id, record.state
            );
        }

        let (cancel, _) = watch::channel(false);
        Ok(Self {
            config,
            master_key,
            keystore,
            transport,
            biometry,
            record: Mutex::new(record),
            cancel,
        })
    }

    /// Identifier of the instance this engine serves.
    pub fn instance_id(&self) -> &InstanceId {
        &self.config.instance_id
    }

    /// Cancels in-flight operations and refuses new ones.
    pub(crate) fn shutdown(&self) {
        self.cancel.send_replace(true);
    }

    // ── Activation queries ───────────────────────────────────────────

    /// True when a new activation may be created: either no record
    /// exists, or only a terminal one without usable secrets remains.
    pub async fn can_start_activation(&self) -> bool {
        let guard = self.record.lock().await;
        match guard.as_ref() {
            None => true,
            Some(record) => record.state.is_terminal(),
        }
    }

    /// True while the ceremony is underway: created, or committed
    /// locally but not yet active on the server.
    pub async fn has_pending_activation(&self) -> bool {
        let guard = self.record.lock().await;
        matches!(
            guard.as_ref(),
            Some(record) if record.state.is_pending()
        )
    }

    /// True when the activation is active and able to sign requests.
    pub async fn has_valid_activation(&self) -> bool {
        let guard = self.record.lock().await;
        matches!(
            guard.as_ref(),
            Some(record) if record.state.allows_signing()
        )
    }

    /// Identifier of the current activation, if any.
    pub async fn activation_id(&self) -> Option<ActivationId> {
        let guard = self.record.lock().await;
        guard.as_ref().map(|record| record.activation_id.clone())
    }

    /// True when a biometry factor key is stored on this device.
    pub async fn has_biometry_factor(&self) -> bool {
        self.keystore.contains(BIOMETRY_KEY_ENTRY).unwrap_or(false)
    }

    // ── Activation ceremony ──────────────────────────────────────────

    /// Starts an activation from an out-of-band activation code.
    ///
    /// The code is validated locally before anything is sent; a typo
    /// fails fast with `InvalidActivationCode`. On success the record
    /// is persisted in the `Created` state, waiting for
    /// [`commit_activation`](Self::commit_activation).
    pub async fn create_activation(
        &self,
        code: &str,
        device_name: &str,
    ) -> PowerAuthResult<ActivationId> {
        let code = ActivationCode::parse(code)?;
        self.start_activation(
            ActivationIdentity::Code {
                code: code.canonical(),
            },
            device_name,
        )
        .await
    }

    /// Starts an activation from custom identity attributes, for
    /// deployments where the server verifies credentials directly.
    pub async fn create_activation_with_attributes(
        &self,
        attributes: BTreeMap<String, String>,
        device_name: &str,
    ) -> PowerAuthResult<ActivationId> {
        if attributes.is_empty() {
            return Err(PowerAuthError::WrongParameter(
                "identity attributes must not be empty".into(),
            ));
        }
        self.start_activation(ActivationIdentity::Attributes { attributes }, device_name)
            .await
    }

    async fn start_activation(
        &self,
        identity: ActivationIdentity,
        device_name: &str,
    ) -> PowerAuthResult<ActivationId> {
        self.ensure_live()?;
        let mut guard = self.record.lock().await;
        if let Some(record) = guard.as_ref() {
            // Terminal records hold no usable secrets and do not block
            // a fresh exchange.
            if !record.state.is_terminal() {
                return Err(PowerAuthError::InvalidActivationState {
                    current: record.state,
                });
            }
        }

        let device_pair = KeyAgreementPair::generate();
        let payload = ActivationCreatePayload {
            identity,
            device_public_key: device_pair.public_bytes(),
            device_name: device_name.to_string(),
        };
        let payload_bytes = Zeroizing::new(serde_json::to_vec(&payload)?);
        let envelope = seal(self.master_key.encryption_key(), &payload_bytes)?;
        let request = ActivationCreateRequest {
            application_key: self.config.application_key.clone(),
            envelope,
        };

        let response = self
            .with_cancellation(self.transport.send_activation_create(request))
            .await?
            .map_err(classify_transport)?;
        let payload: ActivationCreateResponsePayload = response.open(&self.master_key)?;

        let activation_id = ActivationId::new(payload.activation_id)
            .map_err(|_| PowerAuthError::InvalidActivationData("empty activation id".into()))?;
        let version: ProtocolVersion = payload.protocol_version.parse().map_err(|_| {
            PowerAuthError::InvalidActivationData("unknown protocol version".into())
        })?;
        let counter = match version {
            ProtocolVersion::V2 => ReplayCounter::Numeric(0),
            ProtocolVersion::V3 => {
                let ctr_data = payload.ctr_data.ok_or_else(|| {
                    PowerAuthError::InvalidActivationData(
                        "version 3 activation without counter data".into(),
                    )
                })?;
                ReplayCounter::HashChain { ctr_data }
            }
        };
        let master_secret = device_pair.master_secret(&payload.server_public_key)?;
        let record = ActivationRecord::new(activation_id.clone(), counter, payload.max_fail_count);

        // A replaced terminal record is dropped only once the server has
        // accepted the new activation.
        if guard.take().is_some() {
            self.wipe_local();
        }
        let stored = self.store_new_activation(&master_secret, &record);
        if let Err(err) = stored {
            self.wipe_local();
            return Err(err);
        }

        info!("activation {activation_id} created, waiting for commit");
        *guard = Some(record);
        Ok(activation_id)
    }

    fn store_new_activation(
        &self,
        master_secret: &DerivedKey,
        record: &ActivationRecord,
    ) -> PowerAuthResult<()> {
        self.keystore.initialize()?;
        self.keystore
            .put_sealed(MASTER_SECRET_ENTRY, master_secret.as_bytes())?;
        self.keystore.put_json(RECORD_ENTRY, record)?;
        Ok(())
    }

    /// Commits the pending activation: derives and persists the factor
    /// keys, then confirms the activation with the server.
    ///
    /// Passing a prompt context enrolls the biometry factor; the prompt
    /// is shown before anything is sent, so cancelling it leaves the
    /// activation untouched and the commit can be retried.
    pub async fn commit_activation(
        &self,
        password: &str,
        biometry: Option<PromptContext>,
    ) -> PowerAuthResult<()> {
        self.ensure_live()?;
        if password.is_empty() {
            return Err(PowerAuthError::WrongParameter(
                "password must not be empty".into(),
            ));
        }

        let mut guard = self.record.lock().await;
        let record = guard.as_mut().ok_or(PowerAuthError::MissingActivation)?;
        if record.state != ActivationState::Created {
            return Err(PowerAuthError::InvalidActivationState {
                current: record.state,
            });
        }

        let biometry_key = match &biometry {
            Some(prompt) => Some(self.biometry.authenticate(prompt).await?),
            None => None,
        };

        let request = CommitConfirmRequest {
            activation_id: record.activation_id.as_str().to_string(),
        };
        let response = self
            .with_cancellation(self.transport.send_commit_confirm(request))
            .await?
            .map_err(classify_transport)?;
        let payload: CommitResponsePayload = response.open(&self.master_key)?;
        let reported = ActivationState::from_wire_code(payload.state_code).map_err(|_| {
            PowerAuthError::InvalidActivationData("unknown activation state code".into())
        })?;
        if !matches!(
            reported,
            ActivationState::PendingCommit | ActivationState::Active
        ) {
            return Err(PowerAuthError::InvalidActivationData(format!(
                "commit confirmed into unexpected state {reported}"
            )));
        }

        let activation_id = record.activation_id.as_str().to_string();
        if let Err(err) = self.store_factor_keys(&activation_id, password, biometry_key.as_ref()) {
            self.discard_factor_keys();
            return Err(err);
        }

        record.apply_server_state(reported)?;
        self.persist_record(record)?;
        info!("activation {activation_id} committed, state {reported}");
        Ok(())
    }

    /// Derives the factor keys from the master secret and stores each
    /// under its protection class. Any failure rolls back all of them.
    fn store_factor_keys(
        &self,
        activation_id: &str,
        password: &str,
        biometry_key: Option<&DerivedKey>,
    ) -> PowerAuthResult<()> {
        let master_secret = self.master_secret()?;

        let possession =
            derive_factor_key(&master_secret, activation_id, SignatureFactor::Possession)?;
        self.keystore
            .put_sealed(POSSESSION_KEY_ENTRY, possession.as_bytes())?;

        let knowledge =
            derive_factor_key(&master_secret, activation_id, SignatureFactor::Knowledge)?;
        let salt = Salt::random();
        let unlock = derive_key(password, &salt, &self.config.kdf)?;
        self.keystore
            .put_concealed(KNOWLEDGE_KEY_ENTRY, &unlock, knowledge.as_bytes())?;
        self.keystore.put_json(
            KNOWLEDGE_META_ENTRY,
            &KnowledgeMeta {
                salt,
                params: self.config.kdf.clone(),
            },
        )?;

        if let Some(device_key) = biometry_key {
            let biometry =
                derive_factor_key(&master_secret, activation_id, SignatureFactor::Biometry)?;
            self.keystore
                .put_guarded(BIOMETRY_KEY_ENTRY, device_key, biometry.as_bytes())?;
        }
        Ok(())
    }

    fn discard_factor_keys(&self) {
        for entry in [
            POSSESSION_KEY_ENTRY,
            KNOWLEDGE_KEY_ENTRY,
            KNOWLEDGE_META_ENTRY,
            BIOMETRY_KEY_ENTRY,
        ] {
            if let Err(err) = self.keystore.delete(entry) {
                warn!("failed to roll back {entry}: {err}");
            }
        }
    }

    // ── Status & reconciliation ──────────────────────────────────────

    /// Queries the server and reconciles the local record with it.
    ///
    /// This is the only place server-driven state transitions are
    /// applied. A reported `Removed` wipes local data; an
    /// irreconcilable counter gap marks the activation `Deadlock`. An
    /// available protocol upgrade is driven from here as well, after
    /// the reconciled state is persisted.
    pub async fn fetch_activation_status(&self) -> PowerAuthResult<ActivationStatus> {
        self.ensure_live()?;
        let mut guard = self.record.lock().await;
        let record = guard.as_mut().ok_or(PowerAuthError::MissingActivation)?;
        if record.state == ActivationState::Deadlock {
            return Ok(record.status());
        }

        let mut challenge_bytes = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut challenge_bytes);
        let challenge = STANDARD.encode(challenge_bytes);

        let request = StatusRequest {
            activation_id: record.activation_id.as_str().to_string(),
            challenge: challenge.clone(),
        };
        let response = self
            .with_cancellation(self.transport.send_status_query(request))
            .await?
            .map_err(classify_transport)?;
        let payload: StatusResponsePayload = response.open(&self.master_key)?;
        if payload.challenge != challenge {
            return Err(PowerAuthError::InvalidActivationData(
                "status challenge mismatch".into(),
            ));
        }
        let reported = ActivationState::from_wire_code(payload.state_code).map_err(|_| {
            PowerAuthError::InvalidActivationData("unknown activation state code".into())
        })?;
        let server_version: ProtocolVersion = payload.supported_version.parse().map_err(|_| {
            PowerAuthError::InvalidActivationData("unknown protocol version".into())
        })?;

        if reported != record.state {
            info!("server moved activation {} -> {}", record.state, reported);
        }
        record.apply_server_state(reported)?;
        record.sync_attempts(payload.fail_count, payload.max_fail_count);

        if record.state == ActivationState::Removed {
            let status = record.status();
            self.wipe_local();
            *guard = None;
            info!("activation removed by the server, local data wiped");
            return Ok(status);
        }

        // While an upgrade session is pending the two sides may be on
        // different counter chains, so the gap check waits until the
        // session resolves.
        if record.upgrade.is_none() && record.counter_desynchronized(payload.ctr_checkpoint) {
            warn!(
                "counter desynchronized (local {}, server {}), activation is unrecoverable",
                record.signature_count, payload.ctr_checkpoint
            );
            record.mark_deadlocked();
            self.persist_record(record)?;
            return Ok(record.status());
        }

        self.persist_record(record)?;

        if record.state == ActivationState::Active
            && (record.upgrade.is_some() || record.protocol_version() < server_version)
        {
            self.drive_upgrade(record, server_version).await?;
        }

        Ok(record.status())
    }

    // ── Request signing ──────────────────────────────────────────────

    /// Computes a signature header for an outgoing request.
    ///
    /// The replay element is consumed and the record persisted before
    /// the header is returned, so a crash after this call can lose at
    /// most the header, never reuse an element.
    pub async fn sign_request(
        &self,
        authentication: &Authentication,
        method: &str,
        uri_id: &str,
        body: &[u8],
    ) -> PowerAuthResult<SignatureHeader> {
        self.ensure_live()?;
        let mut guard = self.record.lock().await;
        let record = guard.as_mut().ok_or(PowerAuthError::MissingActivation)?;
        self.sign_with_record(record, authentication, method, uri_id, body)
            .await
    }

    async fn sign_with_record(
        &self,
        record: &mut ActivationRecord,
        authentication: &Authentication,
        method: &str,
        uri_id: &str,
        body: &[u8],
    ) -> PowerAuthResult<SignatureHeader> {
        match record.state {
            ActivationState::Active => {}
            ActivationState::Created | ActivationState::PendingCommit => {
                return Err(PowerAuthError::ActivationPending)
            }
            current => return Err(PowerAuthError::InvalidActivationState { current }),
        }
        if record.upgrade.is_some() {
            return Err(PowerAuthError::PendingProtocolUpgrade);
        }

        let factors = authentication.factors()?;
        let keys = self.factor_keys_for(&factors, authentication).await?;

        let element = record.counter.element();
        let canonical = canonical_data(
            method,
            uri_id,
            body,
            &element,
            &self.config.application_secret,
        );
        let signature = compute_signature(&keys, &element, &canonical)?;
        let header = SignatureHeader {
            activation_id: record.activation_id.as_str().to_string(),
            application_key: self.config.application_key.clone(),
            nonce: STANDARD.encode(&element),
            signature_type: signature_type_label(&factors),
            signature,
            version: record.protocol_version().as_str().to_string(),
        };

        // The advance is kept even if persisting fails: an element that
        // may have left this function must never sign again.
        record.advance_counter();
        self.persist_record(record)?;
        debug!(
            "signed {method} {uri_id} with {} (element {})",
            header.signature_type, record.signature_count
        );
        Ok(header)
    }

    /// Gathers the key for each requested factor from its protection
    /// class. The knowledge key unwraps under any password; whether the
    /// password was right is only ever decided by the server.
    async fn factor_keys_for(
        &self,
        factors: &[SignatureFactor],
        authentication: &Authentication,
    ) -> PowerAuthResult<Vec<(SignatureFactor, DerivedKey)>> {
        let mut keys = Vec::with_capacity(factors.len());
        for factor in factors {
            let key = match factor {
                SignatureFactor::Possession => self.possession_key()?,
                SignatureFactor::Knowledge => {
                    let password = authentication.password().ok_or_else(|| {
                        PowerAuthError::WrongParameter("password is required".into())
                    })?;
                    self.knowledge_key(password)?
                }
                SignatureFactor::Biometry => {
                    let prompt = authentication.biometry_prompt().ok_or_else(|| {
                        PowerAuthError::WrongParameter("biometric prompt is required".into())
                    })?;
                    self.biometry_key(prompt).await?
                }
            };
            keys.push((*factor, key));
        }
        Ok(keys)
    }

    fn possession_key(&self) -> PowerAuthResult<DerivedKey> {
        let bytes = self
            .keystore
            .get_sealed(POSSESSION_KEY_ENTRY)?
            .ok_or_else(|| {
                PowerAuthError::Encryption("possession factor key is missing".into())
            })?;
        let bytes = Zeroizing::new(bytes);
        Ok(DerivedKey::from_slice(&bytes)?)
    }

    fn knowledge_key(&self, password: &str) -> PowerAuthResult<DerivedKey> {
        let meta: KnowledgeMeta = self
            .keystore
            .get_json(KNOWLEDGE_META_ENTRY)?
            .ok_or_else(|| {
                PowerAuthError::Encryption("knowledge factor key is missing".into())
            })?;
        let unlock = derive_key(password, &meta.salt, &meta.params)?;
        let key = self
            .keystore
            .with_concealed(KNOWLEDGE_KEY_ENTRY, &unlock, DerivedKey::from_slice)??;
        Ok(key)
    }

    async fn biometry_key(&self, prompt: &PromptContext) -> PowerAuthResult<DerivedKey> {
        if !self.keystore.contains(BIOMETRY_KEY_ENTRY)? {
            return Err(PowerAuthError::BiometryNotAvailable);
        }
        let device_key = self.biometry.authenticate(prompt).await?;
        let key = self
            .keystore
            .with_guarded(BIOMETRY_KEY_ENTRY, &device_key, DerivedKey::from_slice)??;
        Ok(key)
    }

    // ── Authenticated server calls ───────────────────────────────────

    /// Signs a request body and sends it, mirroring the server's verdict
    /// into the local fail counter.
    async fn authenticated_round_trip(
        &self,
        record: &mut ActivationRecord,
        endpoint: SignedEndpoint,
        uri_id: &str,
        body: Vec<u8>,
        authentication: &Authentication,
    ) -> PowerAuthResult<SignedResponse> {
        let multi_factor = authentication.factors()?.len() > 1;
        let header = self
            .sign_with_record(record, authentication, "POST", uri_id, &body)
            .await?;
        let call = AuthenticatedCall {
            method: "POST".to_string(),
            uri_id: uri_id.to_string(),
            body,
            header,
        };

        let result = self
            .with_cancellation(self.send_signed(endpoint, call))
            .await?;
        match result {
            Ok(response) => {
                if multi_factor && record.fail_count > 0 {
                    record.reset_failed_attempts();
                    self.persist_record(record)?;
                }
                Ok(response)
            }
            Err(TransportError::Rejected {
                code: RejectionCode::InvalidSignature,
                message,
            }) => {
                record.register_failed_attempt();
                self.persist_record(record)?;
                warn!(
                    "server rejected signature ({} of {} attempts used)",
                    record.fail_count, record.max_fail_count
                );
                Err(PowerAuthError::Signature(message))
            }
            Err(other) => Err(classify_transport(other)),
        }
    }

    async fn send_signed(
        &self,
        endpoint: SignedEndpoint,
        call: AuthenticatedCall,
    ) -> Result<SignedResponse, TransportError> {
        match endpoint {
            SignedEndpoint::Remove => self.transport.send_activation_remove(call).await,
            SignedEndpoint::Validate => self.transport.send_validation_request(call).await,
            SignedEndpoint::TokenCreate => self.transport.send_token_create(call).await,
            SignedEndpoint::TokenRemove => self.transport.send_token_remove(call).await,
        }
    }

    // ── Password management ──────────────────────────────────────────

    /// Validates the password against the server with a knowledge-factor
    /// signature. A wrong password consumes one failed attempt.
    pub async fn validate_password(&self, password: &str) -> PowerAuthResult<()> {
        self.ensure_live()?;
        let mut guard = self.record.lock().await;
        let record = guard.as_mut().ok_or(PowerAuthError::MissingActivation)?;

        let authentication = Authentication::possession_with_password(password);
        let body = serde_json::to_vec(&ValidationRequest {})?;
        let response = self
            .authenticated_round_trip(
                record,
                SignedEndpoint::Validate,
                URI_SIGNATURE_VALIDATE,
                body,
                &authentication,
            )
            .await?;
        let _ack: AckPayload = response.open(&self.master_key)?;
        Ok(())
    }

    /// Changes the password after validating the current one online.
    pub async fn change_password(
        &self,
        old_password: &str,
        new_password: &str,
    ) -> PowerAuthResult<()> {
        self.validate_password(old_password).await?;
        self.unsafe_change_password(old_password, new_password).await
    }

    /// Re-wraps the knowledge key under a new password without checking
    /// the old one against the server.
    ///
    /// If `old_password` is wrong the re-wrapped key is garbage and every
    /// later knowledge signature will fail, so this is only safe right
    /// after the old password was verified some other way.
    pub async fn unsafe_change_password(
        &self,
        old_password: &str,
        new_password: &str,
    ) -> PowerAuthResult<()> {
        self.ensure_live()?;
        if old_password.is_empty() || new_password.is_empty() {
            return Err(PowerAuthError::WrongParameter(
                "password must not be empty".into(),
            ));
        }

        let mut guard = self.record.lock().await;
        let record = guard.as_mut().ok_or(PowerAuthError::MissingActivation)?;
        if record.state == ActivationState::Created {
            return Err(PowerAuthError::ActivationPending);
        }

        let meta: KnowledgeMeta = self
            .keystore
            .get_json(KNOWLEDGE_META_ENTRY)?
            .ok_or_else(|| {
                PowerAuthError::Encryption("knowledge factor key is missing".into())
            })?;
        let old_unlock = derive_key(old_password, &meta.salt, &meta.params)?;
        let key_bytes = Zeroizing::new(
            self.keystore
                .with_concealed(KNOWLEDGE_KEY_ENTRY, &old_unlock, |bytes| bytes.to_vec())?,
        );

        let salt = Salt::random();
        let new_unlock = derive_key(new_password, &salt, &self.config.kdf)?;
        self.keystore
            .put_concealed(KNOWLEDGE_KEY_ENTRY, &new_unlock, &key_bytes)?;
        self.keystore.put_json(
            KNOWLEDGE_META_ENTRY,
            &KnowledgeMeta {
                salt,
                params: self.config.kdf.clone(),
            },
        )?;
        info!("knowledge factor re-wrapped under new password");
        Ok(())
    }

    // ── Removal ──────────────────────────────────────────────────────

    /// Removes the activation on the server, then wipes local data.
    ///
    /// The removal request is signed, so it needs a second factor. If
    /// the server no longer knows the activation the local data is
    /// wiped anyway.
    pub async fn remove_activation(
        &self,
        authentication: &Authentication,
    ) -> PowerAuthResult<()> {
        self.ensure_live()?;
        let mut guard = self.record.lock().await;
        let record = guard.as_mut().ok_or(PowerAuthError::MissingActivation)?;

        let body = serde_json::to_vec(&RemoveRequest {})?;
        let result = self
            .authenticated_round_trip(
                record,
                SignedEndpoint::Remove,
                URI_ACTIVATION_REMOVE,
                body,
                authentication,
            )
            .await;
        match result {
            Ok(response) => {
                let _ack: AckPayload = response.open(&self.master_key)?;
            }
            Err(PowerAuthError::MissingActivation) => {
                info!("activation already unknown to the server");
            }
            Err(err) => return Err(err),
        }

        self.wipe_local();
        *guard = None;
        info!("activation removed");
        Ok(())
    }

    /// Discards the activation and every stored key without informing
    /// the server. Safe to call in any state.
    pub async fn remove_activation_local(&self) {
        let mut guard = self.record.lock().await;
        self.wipe_local();
        *guard = None;
        info!("local activation data removed");
    }

    // ── Tokens ───────────────────────────────────────────────────────

    /// Obtains a named token, creating it on the server if this device
    /// does not hold it yet.
    pub async fn request_access_token(
        &self,
        name: &str,
        authentication: &Authentication,
    ) -> PowerAuthResult<PowerAuthToken> {
        self.ensure_live()?;
        if name.is_empty() {
            return Err(PowerAuthError::WrongParameter(
                "token name must not be empty".into(),
            ));
        }

        let mut guard = self.record.lock().await;
        let record = guard.as_mut().ok_or(PowerAuthError::MissingActivation)?;

        let entry_name = token_entry_name(name);
        if let Some(entry) = self.keystore.get_json::<TokenEntry>(&entry_name)? {
            return Ok(PowerAuthToken {
                name: name.to_string(),
                token_id: entry.token_id,
            });
        }

        let body = serde_json::to_vec(&TokenCreateRequest {
            token_name: name.to_string(),
        })?;
        let response = self
            .authenticated_round_trip(
                record,
                SignedEndpoint::TokenCreate,
                URI_TOKEN_CREATE,
                body,
                authentication,
            )
            .await?;
        let payload: TokenCreateResponsePayload = response.open(&self.master_key)?;

        let secret = STANDARD.decode(&payload.token_secret).map_err(|_| {
            PowerAuthError::InvalidActivationData("token secret is not valid base64".into())
        })?;
        if secret.len() != 32 {
            return Err(PowerAuthError::InvalidActivationData(
                "token secret has the wrong length".into(),
            ));
        }

        self.keystore.put_json(
            &entry_name,
            &TokenEntry {
                token_id: payload.token_id.clone(),
                secret: payload.token_secret,
            },
        )?;
        info!("token {name} created");
        Ok(PowerAuthToken {
            name: name.to_string(),
            token_id: payload.token_id,
        })
    }

    /// Computes an authorization header from a stored token. Purely
    /// local: no network and no replay counter involved.
    pub async fn token_header(&self, name: &str) -> PowerAuthResult<TokenHeader> {
        self.ensure_live()?;
        let guard = self.record.lock().await;
        let record = guard.as_ref().ok_or(PowerAuthError::MissingActivation)?;

        let entry: TokenEntry = self
            .keystore
            .get_json(&token_entry_name(name))?
            .ok_or_else(|| PowerAuthError::InvalidToken(name.to_string()))?;
        let secret = Zeroizing::new(STANDARD.decode(&entry.secret).map_err(|_| {
            PowerAuthError::InvalidToken(format!("{name}: stored secret is corrupted"))
        })?);

        let mut nonce_bytes = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = STANDARD.encode(nonce_bytes);
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let digest = compute_token_digest(&secret, &nonce, timestamp)?;

        Ok(TokenHeader {
            token_id: entry.token_id,
            nonce,
            timestamp,
            digest,
            version: record.protocol_version().as_str().to_string(),
        })
    }

    /// Removes a named token on the server and locally.
    pub async fn remove_access_token(
        &self,
        name: &str,
        authentication: &Authentication,
    ) -> PowerAuthResult<()> {
        self.ensure_live()?;
        let mut guard = self.record.lock().await;
        let record = guard.as_mut().ok_or(PowerAuthError::MissingActivation)?;

        let entry_name = token_entry_name(name);
        let entry: TokenEntry = self
            .keystore
            .get_json(&entry_name)?
            .ok_or_else(|| PowerAuthError::InvalidToken(name.to_string()))?;

        let body = serde_json::to_vec(&TokenRemoveRequest {
            token_id: entry.token_id,
        })?;
        let result = self
            .authenticated_round_trip(
                record,
                SignedEndpoint::TokenRemove,
                URI_TOKEN_REMOVE,
                body,
                authentication,
            )
            .await;
        match result {
            Ok(response) => {
                let _ack: AckPayload = response.open(&self.master_key)?;
            }
            Err(PowerAuthError::InvalidToken(_)) => {
                info!("token {name} already unknown to the server");
            }
            Err(err) => return Err(err),
        }

        self.keystore.delete(&entry_name)?;
        info!("token {name} removed");
        Ok(())
    }

    // ── Protocol upgrade ─────────────────────────────────────────────

    /// Drives the two-phase upgrade to the server's protocol version.
    ///
    /// Phase one fetches and persists the new hash chain seed; phase two
    /// commits it with a possession signature computed under the new
    /// protocol. Each phase persists before the next starts, so a crash
    /// or network failure resumes where it left off on the next status
    /// fetch. A pending session is abandoned if the server stops
    /// offering the target version.
    async fn drive_upgrade(
        &self,
        record: &mut ActivationRecord,
        server_version: ProtocolVersion,
    ) -> PowerAuthResult<()> {
        if let Some(session) = &record.upgrade {
            if server_version < session.target {
                info!(
                    "server withdrew protocol {}, abandoning upgrade",
                    session.target.as_str()
                );
                record.upgrade = None;
                self.persist_record(record)?;
                return Ok(());
            }
        } else {
            let request = UpgradeStartRequest {
                activation_id: record.activation_id.as_str().to_string(),
            };
            let response = self
                .with_cancellation(self.transport.send_upgrade_start(request))
                .await?
                .map_err(|err| PowerAuthError::ProtocolUpgrade(err.to_string()))?;
            let payload: UpgradeStartResponsePayload = response
                .open(&self.master_key)
                .map_err(|err| PowerAuthError::ProtocolUpgrade(err.to_string()))?;

            record.upgrade = Some(UpgradeSession {
                ctr_data: payload.ctr_data,
                target: server_version,
            });
            self.persist_record(record)?;
            info!("protocol upgrade to {} started", server_version.as_str());
        }

        let session = match &record.upgrade {
            Some(session) => session.clone(),
            None => return Ok(()),
        };
        self.commit_upgrade(record, &session).await
    }

    /// Phase two: sign the commit with the first element of the new
    /// chain and swap counters once the server confirms.
    async fn commit_upgrade(
        &self,
        record: &mut ActivationRecord,
        session: &UpgradeSession,
    ) -> PowerAuthResult<()> {
        let pending = ReplayCounter::HashChain {
            ctr_data: session.ctr_data,
        };
        let element = pending.element();
        let body = serde_json::to_vec(&UpgradeCommitRequest {
            activation_id: record.activation_id.as_str().to_string(),
        })?;
        let keys = vec![(SignatureFactor::Possession, self.possession_key()?)];
        let canonical = canonical_data(
            "POST",
            URI_UPGRADE_COMMIT,
            &body,
            &element,
            &self.config.application_secret,
        );
        let signature = compute_signature(&keys, &element, &canonical)?;
        let header = SignatureHeader {
            activation_id: record.activation_id.as_str().to_string(),
            application_key: self.config.application_key.clone(),
            nonce: STANDARD.encode(&element),
            signature_type: signature_type_label(&[SignatureFactor::Possession]),
            signature,
            version: session.target.as_str().to_string(),
        };
        let call = AuthenticatedCall {
            method: "POST".to_string(),
            uri_id: URI_UPGRADE_COMMIT.to_string(),
            body,
            header,
        };

        let result = self
            .with_cancellation(self.transport.send_upgrade_commit(call))
            .await?;
        match result {
            Ok(response) => {
                let _ack: AckPayload = response
                    .open(&self.master_key)
                    .map_err(|err| PowerAuthError::ProtocolUpgrade(err.to_string()))?;
            }
            Err(TransportError::Rejected {
                code: RejectionCode::UpgradeCommitted,
                ..
            }) => {
                // The previous commit went through but its response was
                // lost. The server is already on the new chain.
                info!("upgrade commit was already accepted");
            }
            Err(err) => return Err(PowerAuthError::ProtocolUpgrade(err.to_string())),
        }

        record.counter = pending.advanced();
        record.signature_count = 1;
        record.upgrade = None;
        self.persist_record(record)?;
        info!(
            "protocol upgrade to {} committed",
            session.target.as_str()
        );
        Ok(())
    }

    // ── Internals ────────────────────────────────────────────────────

    fn ensure_live(&self) -> PowerAuthResult<()> {
        if *self.cancel.borrow() {
            return Err(PowerAuthError::OperationCancelled);
        }
        Ok(())
    }

    /// Races a transport future against instance shutdown.
    async fn with_cancellation<T>(
        &self,
        fut: impl std::future::Future<Output = T>,
    ) -> PowerAuthResult<T> {
        let mut cancel = self.cancel.subscribe();
        if *cancel.borrow() {
            return Err(PowerAuthError::OperationCancelled);
        }
        tokio::select! {
            _ = cancel.changed() => Err(PowerAuthError::OperationCancelled),
            result = fut => Ok(result),
        }
    }

    fn master_secret(&self) -> PowerAuthResult<DerivedKey> {
        let bytes = self
            .keystore
            .get_sealed(MASTER_SECRET_ENTRY)?
            .ok_or_else(|| PowerAuthError::Encryption("master secret is missing".into()))?;
        let bytes = Zeroizing::new(bytes);
        Ok(DerivedKey::from_slice(&bytes)?)
    }

    fn persist_record(&self, record: &ActivationRecord) -> PowerAuthResult<()> {
        self.keystore.put_json(RECORD_ENTRY, record)?;
        Ok(())
    }

    fn wipe_local(&self) {
        if let Err(err) = self.keystore.wipe() {
            warn!("keystore wipe failed: {err}");
        }
    }
}

fn token_entry_name(name: &str) -> String {
    format!("{TOKEN_ENTRY_PREFIX}{name}")
}

/// Maps transport failures into the public error set.
fn classify_transport(err: TransportError) -> PowerAuthError {
    match err {
        TransportError::Network(message) => PowerAuthError::Network(message),
        TransportError::Rejected { code, message } => match code {
            RejectionCode::UnknownActivation => PowerAuthError::MissingActivation,
            RejectionCode::InvalidActivationData => {
                PowerAuthError::InvalidActivationData(message)
            }
            RejectionCode::InvalidSignature => PowerAuthError::Signature(message),
            RejectionCode::InvalidToken => PowerAuthError::InvalidToken(message),
            RejectionCode::UpgradeNotAllowed | RejectionCode::UpgradeCommitted => {
                PowerAuthError::ProtocolUpgrade(message)
            }
        },
    }
}
