//! Activation lifecycle states and the transitions the server may drive.
//!
//! The numeric wire codes are fixed by the protocol and shared with every
//! other PowerAuth client; they must never be renumbered.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Error;

/// State of an activation as tracked locally and reported by the server.
///
/// Serialized as its protocol wire code (`1..=5`, `128`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ActivationState {
    /// Key exchange completed, activation record created on the server,
    /// not yet committed by either side.
    Created,
    /// Committed locally, waiting for the server-side commit.
    PendingCommit,
    /// Fully operational; the only state that permits signing.
    Active,
    /// Temporarily suspended by the server. Can return to `Active`.
    Blocked,
    /// Removed on the server. Terminal.
    Removed,
    /// Local counter irrecoverably desynchronized from the server.
    /// Terminal on this device; only a fresh activation recovers.
    Deadlock,
}

impl ActivationState {
    /// Protocol wire code for this state.
    #[must_use]
    pub const fn wire_code(self) -> u8 {
        match self {
            Self::Created => 1,
            Self::PendingCommit => 2,
            Self::Active => 3,
            Self::Blocked => 4,
            Self::Removed => 5,
            Self::Deadlock => 128,
        }
    }

    /// Parses a protocol wire code.
    pub fn from_wire_code(code: u8) -> Result<Self, Error> {
        match code {
            1 => Ok(Self::Created),
            2 => Ok(Self::PendingCommit),
            3 => Ok(Self::Active),
            4 => Ok(Self::Blocked),
            5 => Ok(Self::Removed),
            128 => Ok(Self::Deadlock),
            other => Err(Error::UnknownStateCode(other)),
        }
    }

    /// True for states from which no transition ever leaves.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Removed | Self::Deadlock)
    }

    /// True while the activation ceremony is underway locally.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::Created | Self::PendingCommit)
    }

    /// True if request signing is permitted in this state.
    #[must_use]
    pub const fn allows_signing(self) -> bool {
        matches!(self, Self::Active)
    }

    /// True if the server is allowed to move an activation from `self`
    /// to `next` during status reconciliation.
    ///
    /// Terminal states accept nothing. `Deadlock` is never served; it is
    /// only ever entered locally on counter desynchronization.
    #[must_use]
    pub const fn accepts_server_transition(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            // Server cannot un-create; reporting the same pending state
            // is a no-op handled by the caller.
            Self::Created => matches!(self, Self::Created),
            Self::PendingCommit => matches!(self, Self::Created | Self::PendingCommit),
            Self::Active => matches!(
                self,
                Self::Created | Self::PendingCommit | Self::Active | Self::Blocked
            ),
            Self::Blocked => matches!(self, Self::Active | Self::Blocked),
            Self::Removed => true,
            Self::Deadlock => false,
        }
    }
}

impl From<ActivationState> for u8 {
    fn from(state: ActivationState) -> Self {
        state.wire_code()
    }
}

impl TryFrom<u8> for ActivationState {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_wire_code(code)
    }
}

impl fmt::Display for ActivationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::PendingCommit => "pending-commit",
            Self::Active => "active",
            Self::Blocked => "blocked",
            Self::Removed => "removed",
            Self::Deadlock => "deadlock",
        };
        write!(f, "{name}")
    }
}
