use powerauth_types::ProtocolVersion;
use serde::{Deserialize, Serialize};

/// Persisted state of a protocol upgrade between its two phases.
///
/// Phase one stores the server-issued hash chain seed here; phase two
/// commits it with a possession signature computed under the new
/// protocol. The session survives restarts, and while it exists the
/// engine refuses to sign regular requests, since neither counter can
/// be advanced safely until the server confirms which one is live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeSession {
    /// Seed of the replacement hash chain.
    pub ctr_data: [u8; 16],
    /// Version the activation moves to when the session commits.
    pub target: ProtocolVersion,
}
