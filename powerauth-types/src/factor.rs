//! Signature factors and their canonical ordering.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One factor contributing to a multi-factor request signature.
///
/// Factors always appear in the order possession, knowledge, biometry,
/// both in header labels and in the signature components themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureFactor {
    /// Key held by the device installation itself.
    Possession,
    /// Key unlocked by the user's password or PIN.
    Knowledge,
    /// Key unlocked through the platform biometric capability.
    Biometry,
}

impl SignatureFactor {
    /// All factors in canonical order.
    pub const ALL: [Self; 3] = [Self::Possession, Self::Knowledge, Self::Biometry];

    /// Label used in header factor sets and key derivation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Possession => "possession",
            Self::Knowledge => "knowledge",
            Self::Biometry => "biometry",
        }
    }
}

impl fmt::Display for SignatureFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
