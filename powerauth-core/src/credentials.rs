use std::fmt;

use powerauth_types::SignatureFactor;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::biometry::PromptContext;
use crate::error::{PowerAuthError, PowerAuthResult};

/// Factors the caller presents for one signed request.
///
/// Possession is implicit in every combination. Knowledge and biometry
/// are alternatives for the second factor and cannot be combined, since
/// both protect the same signing slot in the server's key hierarchy.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Authentication {
    password: Option<String>,
    #[zeroize(skip)]
    biometry: Option<PromptContext>,
}

impl Authentication {
    /// Possession factor only.
    #[must_use]
    pub fn possession() -> Self {
        Self {
            password: None,
            biometry: None,
        }
    }

    /// Possession plus the knowledge factor unlocked by `password`.
    #[must_use]
    pub fn possession_with_password(password: impl Into<String>) -> Self {
        Self {
            password: Some(password.into()),
            biometry: None,
        }
    }

    /// Possession plus the biometry factor behind the given prompt.
    #[must_use]
    pub fn possession_with_biometry(prompt: PromptContext) -> Self {
        Self {
            password: None,
            biometry: Some(prompt),
        }
    }

    /// Validated factor list in canonical signing order.
    pub(crate) fn factors(&self) -> PowerAuthResult<Vec<SignatureFactor>> {
        if self.password.is_some() && self.biometry.is_some() {
            return Err(PowerAuthError::WrongParameter(
                "knowledge and biometry factors cannot be combined".into(),
            ));
        }
        if matches!(self.password.as_deref(), Some("")) {
            return Err(PowerAuthError::WrongParameter(
                "password must not be empty".into(),
            ));
        }

        let mut factors = vec![SignatureFactor::Possession];
        if self.password.is_some() {
            factors.push(SignatureFactor::Knowledge);
        }
        if self.biometry.is_some() {
            factors.push(SignatureFactor::Biometry);
        }
        Ok(factors)
    }

    pub(crate) fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub(crate) fn biometry_prompt(&self) -> Option<&PromptContext> {
        self.biometry.as_ref()
    }
}

impl fmt::Debug for Authentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authentication")
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("biometry", &self.biometry)
            .finish()
    }
}
