use powerauth_crypto::advance_counter_data;
use powerauth_types::{ActivationId, ActivationState, ActivationStatus, ProtocolVersion};
use serde::{Deserialize, Serialize};

use crate::error::{PowerAuthError, PowerAuthResult};
use crate::upgrade::UpgradeSession;

/// How far the local counter may run ahead of the server's checkpoint
/// before the activation is considered unrecoverable.
pub const LOOK_AHEAD_WINDOW: u64 = 20;

/// Replay element source for computed signatures.
///
/// Version 2 activations use a numeric counter whose big-endian value is
/// signed directly. Version 3 activations walk a hash chain seeded by the
/// server, so past elements cannot be derived from the current one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplayCounter {
    Numeric(u64),
    HashChain { ctr_data: [u8; 16] },
}

impl ReplayCounter {
    /// Bytes mixed into the canonical signature data for the next request.
    #[must_use]
    pub fn element(&self) -> Vec<u8> {
        match self {
            Self::Numeric(value) => value.to_be_bytes().to_vec(),
            Self::HashChain { ctr_data } => ctr_data.to_vec(),
        }
    }

    /// The counter state after consuming the current element.
    #[must_use]
    pub fn advanced(&self) -> Self {
        match self {
            Self::Numeric(value) => Self::Numeric(value.wrapping_add(1)),
            Self::HashChain { ctr_data } => Self::HashChain {
                ctr_data: advance_counter_data(ctr_data),
            },
        }
    }

    /// Protocol version implied by the counter representation.
    #[must_use]
    pub fn protocol_version(&self) -> ProtocolVersion {
        match self {
            Self::Numeric(_) => ProtocolVersion::V2,
            Self::HashChain { .. } => ProtocolVersion::V3,
        }
    }
}

/// Persisted state of one activation.
///
/// The record is the client half of the server's activation entity. It is
/// rewritten on every counter advance and every reconciliation, and removed
/// entirely when the activation ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationRecord {
    pub activation_id: ActivationId,
    pub state: ActivationState,
    pub fail_count: u32,
    pub max_fail_count: u32,
    pub counter: ReplayCounter,
    /// Elements consumed from the current counter chain. Resets when a
    /// protocol upgrade replaces the chain.
    pub signature_count: u64,
    /// Present while a protocol upgrade is between its two phases.
    pub upgrade: Option<UpgradeSession>,
}

impl ActivationRecord {
    /// Builds a fresh record for a just-created activation.
    #[must_use]
    pub fn new(activation_id: ActivationId, counter: ReplayCounter, max_fail_count: u32) -> Self {
        Self {
            activation_id,
            state: ActivationState::Created,
            fail_count: 0,
            max_fail_count,
            counter,
            signature_count: 0,
            upgrade: None,
        }
    }

    /// Protocol version currently used for signing.
    #[must_use]
    pub fn protocol_version(&self) -> ProtocolVersion {
        self.counter.protocol_version()
    }

    /// Snapshot handed to callers of the status query.
    #[must_use]
    pub fn status(&self) -> ActivationStatus {
        ActivationStatus::new(self.state, self.fail_count, self.max_fail_count)
    }

    /// Applies a server-reported state, enforcing the transition matrix.
    ///
    /// Re-reporting the current state is a no-op. A transition the matrix
    /// forbids leaves the record untouched and fails, since it can only
    /// come from a confused or hostile server.
    pub fn apply_server_state(&mut self, reported: ActivationState) -> PowerAuthResult<()> {
        if !self.state.accepts_server_transition(reported) {
            return Err(PowerAuthError::InvalidActivationData(format!(
                "server reported illegal transition {} -> {reported}",
                self.state
            )));
        }
        self.state = reported;
        Ok(())
    }

    /// Marks the activation unrecoverable. This transition is driven only
    /// by local desynchronization detection, never by the server.
    pub fn mark_deadlocked(&mut self) {
        self.state = ActivationState::Deadlock;
    }

    /// True when the server's verified-element checkpoint can no longer
    /// be reconciled with the local counter.
    ///
    /// The checkpoint counts elements the server has consumed, so it can
    /// trail `signature_count` by requests whose responses were lost. It
    /// can never legitimately exceed it, and a gap wider than the server's
    /// look-ahead window will never verify again.
    #[must_use]
    pub fn counter_desynchronized(&self, server_checkpoint: u64) -> bool {
        if server_checkpoint > self.signature_count {
            return true;
        }
        self.signature_count - server_checkpoint > LOOK_AHEAD_WINDOW
    }

    /// Consumes the current replay element after a signature was computed.
    pub fn advance_counter(&mut self) {
        self.counter = self.counter.advanced();
        self.signature_count += 1;
    }

    /// Mirrors a server-side signature rejection into the local counters.
    pub fn register_failed_attempt(&mut self) {
        self.fail_count = (self.fail_count + 1).min(self.max_fail_count);
        if self.fail_count >= self.max_fail_count {
            self.state = ActivationState::Blocked;
        }
    }

    /// Clears the failed-attempt counter after a verified signature.
    pub fn reset_failed_attempts(&mut self) {
        self.fail_count = 0;
    }

    /// Adopts the authoritative attempt counters from a status response.
    pub fn sync_attempts(&mut self, fail_count: u32, max_fail_count: u32) {
        self.fail_count = fail_count;
        self.max_fail_count = max_fail_count;
    }
}
