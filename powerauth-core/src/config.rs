use powerauth_crypto::KdfParams;
use powerauth_types::InstanceId;

use crate::error::{PowerAuthError, PowerAuthResult};

/// Static configuration for one activation instance.
///
/// One instance maps to one application identity on one server. The
/// credentials come from the server's application management console
/// and never change for the lifetime of the installed application.
#[derive(Debug, Clone)]
pub struct PowerAuthConfig {
    /// Identifier scoping all persisted data for this instance.
    pub instance_id: InstanceId,
    /// Application key, sent with every activation request.
    pub application_key: String,
    /// Application secret, mixed into every computed signature.
    pub application_secret: String,
    /// Base64 of the 64-byte master server public key.
    pub master_server_public_key: String,
    /// Base URL of the enrollment server, used by transport implementations.
    pub base_endpoint_url: String,
    /// Cost parameters for the password-derived unlock key.
    pub kdf: KdfParams,
}

impl PowerAuthConfig {
    /// Builds a configuration, rejecting empty credentials up front.
    pub fn new(
        instance_id: InstanceId,
        application_key: impl Into<String>,
        application_secret: impl Into<String>,
        master_server_public_key: impl Into<String>,
        base_endpoint_url: impl Into<String>,
    ) -> PowerAuthResult<Self> {
        let application_key = application_key.into();
        let application_secret = application_secret.into();
        let master_server_public_key = master_server_public_key.into();
        let base_endpoint_url = base_endpoint_url.into();

        if application_key.is_empty() {
            return Err(PowerAuthError::WrongParameter(
                "application key must not be empty".into(),
            ));
        }
        if application_secret.is_empty() {
            return Err(PowerAuthError::WrongParameter(
                "application secret must not be empty".into(),
            ));
        }
        if master_server_public_key.is_empty() {
            return Err(PowerAuthError::WrongParameter(
                "master server public key must not be empty".into(),
            ));
        }
        if base_endpoint_url.is_empty() {
            return Err(PowerAuthError::WrongParameter(
                "base endpoint URL must not be empty".into(),
            ));
        }

        Ok(Self {
            instance_id,
            application_key,
            application_secret,
            master_server_public_key,
            base_endpoint_url,
            kdf: KdfParams::default(),
        })
    }

    /// Overrides the password KDF cost parameters.
    #[must_use]
    pub fn with_kdf_params(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }
}
