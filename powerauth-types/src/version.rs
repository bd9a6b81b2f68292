//! Protocol versions supported by this client.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Version of the signing scheme an activation speaks.
///
/// `V2` signs with a numeric monotonic counter; `V3` signs with
/// hash-based counter data seeded by the server. Ordering follows
/// protocol age, so `V2 < V3`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ProtocolVersion {
    V2,
    V3,
}

impl ProtocolVersion {
    /// Newest version this client can speak. Fresh activations are
    /// always created at this version.
    #[must_use]
    pub const fn latest() -> Self {
        Self::V3
    }

    /// Label carried in signature headers and upgrade negotiation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::V2 => "2.1",
            Self::V3 => "3.0",
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "2.0" | "2.1" => Ok(Self::V2),
            "3.0" => Ok(Self::V3),
            other => Err(Error::UnknownVersion(other.to_string())),
        }
    }
}
