//! Activation status snapshot as reconciled against the server.

use serde::{Deserialize, Serialize};

use crate::ActivationState;

/// Point-in-time view of an activation, produced by a status fetch.
///
/// `remaining_attempts` is derived, never stored: the fail counter is
/// authoritative on the server and only mirrored here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationStatus {
    /// Lifecycle state after reconciliation.
    pub state: ActivationState,
    /// Failed authentication attempts counted so far.
    pub fail_count: u32,
    /// Attempt limit after which the server blocks the activation.
    pub max_fail_count: u32,
}

impl ActivationStatus {
    #[must_use]
    pub const fn new(state: ActivationState, fail_count: u32, max_fail_count: u32) -> Self {
        Self {
            state,
            fail_count,
            max_fail_count,
        }
    }

    /// Authentication attempts left before the server blocks the
    /// activation. Zero when already at or past the limit.
    #[must_use]
    pub const fn remaining_attempts(&self) -> u32 {
        self.max_fail_count.saturating_sub(self.fail_count)
    }
}
