//! Biometric factor integration.
//!
//! The engine never synthesizes biometric key material itself. A platform
//! integration implements [`BiometricPrompt`] on top of the device's
//! secure hardware, and the key it releases protects the stored biometry
//! factor key. Failing the prompt therefore leaves the factor key sealed.

use async_trait::async_trait;
use powerauth_crypto::DerivedKey;
use thiserror::Error;

/// Text shown by the platform's biometric prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptContext {
    pub title: String,
    pub subtitle: Option<String>,
}

impl PromptContext {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            subtitle: None,
        }
    }

    #[must_use]
    pub fn with_subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.subtitle = Some(subtitle.into());
        self
    }
}

/// Outcomes of a failed biometric prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BiometryError {
    #[error("biometric authentication was cancelled")]
    Cancelled,
    #[error("biometric authentication is not supported on this device")]
    NotSupported,
    #[error("biometric authentication is not available")]
    NotAvailable,
    #[error("biometric trait was not recognized")]
    NotRecognized,
}

/// Platform hook releasing a device-bound key after user verification.
///
/// The returned key must be stable for the lifetime of the biometric
/// enrollment. Re-enrolling fingerprints or faces may rotate it, which
/// invalidates the stored factor key and is surfaced as a decryption
/// failure on the next use.
#[async_trait]
pub trait BiometricPrompt: Send + Sync {
    async fn authenticate(&self, context: &PromptContext) -> Result<DerivedKey, BiometryError>;
}

/// Scriptable in-memory prompt for tests.
pub mod mock {
    use std::sync::Mutex;

    use powerauth_crypto::generate_random_key;

    use super::*;

    /// What the next prompt invocations will do.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum MockOutcome {
        Grant,
        Cancelled,
        NotSupported,
        NotAvailable,
        NotRecognized,
    }

    /// In-memory prompt holding one stable device key.
    pub struct MockBiometry {
        device_key: DerivedKey,
        outcome: Mutex<MockOutcome>,
        prompts: Mutex<Vec<String>>,
    }

    impl MockBiometry {
        /// A prompt that grants every request with a fresh device key.
        pub fn new() -> Self {
            Self {
                device_key: generate_random_key(),
                outcome: Mutex::new(MockOutcome::Grant),
                prompts: Mutex::new(Vec::new()),
            }
        }

        /// Scripts the outcome of subsequent prompts.
        pub fn set_outcome(&self, outcome: MockOutcome) {
            *self.outcome.lock().unwrap() = outcome;
        }

        /// Titles of every prompt shown so far.
        pub fn shown_titles(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    impl Default for MockBiometry {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl BiometricPrompt for MockBiometry {
        async fn authenticate(
            &self,
            context: &PromptContext,
        ) -> Result<DerivedKey, BiometryError> {
            self.prompts.lock().unwrap().push(context.title.clone());
            match *self.outcome.lock().unwrap() {
                MockOutcome::Grant => Ok(self.device_key.clone()),
                MockOutcome::Cancelled => Err(BiometryError::Cancelled),
                MockOutcome::NotSupported => Err(BiometryError::NotSupported),
                MockOutcome::NotAvailable => Err(BiometryError::NotAvailable),
                MockOutcome::NotRecognized => Err(BiometryError::NotRecognized),
            }
        }
    }
}
