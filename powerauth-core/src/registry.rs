//! Multi-instance entry point.
//!
//! One [`PowerAuth`] value owns the platform collaborators and hands out
//! an [`ActivationEngine`] per configured instance. Instances are fully
//! isolated: each gets its own keystore namespace, record and lock.

use std::collections::HashMap;
use std::sync::Arc;

use powerauth_keystore::SecureStorage;
use powerauth_types::InstanceId;
use tokio::sync::RwLock;
use tracing::info;

use crate::biometry::BiometricPrompt;
use crate::config::PowerAuthConfig;
use crate::engine::ActivationEngine;
use crate::error::{PowerAuthError, PowerAuthResult};
use crate::transport::Transport;

/// Registry of configured activation instances.
pub struct PowerAuth {
    storage: Arc<dyn SecureStorage>,
    transport: Arc<dyn Transport>,
    biometry: Arc<dyn BiometricPrompt>,
    engines: RwLock<HashMap<InstanceId, Arc<ActivationEngine>>>,
}

impl PowerAuth {
    /// Creates an empty registry over the platform collaborators.
    pub fn new(
        storage: Arc<dyn SecureStorage>,
        transport: Arc<dyn Transport>,
        biometry: Arc<dyn BiometricPrompt>,
    ) -> Self {
        Self {
            storage,
            transport,
            biometry,
            engines: RwLock::new(HashMap::new()),
        }
    }

    /// Configures an instance and returns its engine, restoring any
    /// persisted activation. Configuring the same instance twice is an
    /// error; deconfigure it first.
    pub async fn configure(
        &self,
        config: PowerAuthConfig,
    ) -> PowerAuthResult<Arc<ActivationEngine>> {
        let mut engines = self.engines.write().await;
        if engines.contains_key(&config.instance_id) {
            return Err(PowerAuthError::WrongParameter(format!(
                "instance {} is already configured",
                config.instance_id
            )));
        }

        let instance_id = config.instance_id.clone();
        let engine = Arc::new(ActivationEngine::open(
            config,
            Arc::clone(&self.storage),
            Arc::clone(&self.transport),
            Arc::clone(&self.biometry),
        )?);
        engines.insert(instance_id.clone(), Arc::clone(&engine));
        info!("instance {instance_id} configured");
        Ok(engine)
    }

    /// Engine of a configured instance, if any.
    pub async fn instance(&self, instance_id: &InstanceId) -> Option<Arc<ActivationEngine>> {
        self.engines.read().await.get(instance_id).cloned()
    }

    /// Tears an instance down. In-flight operations on it resolve to
    /// `OperationCancelled`; persisted data stays untouched.
    pub async fn deconfigure(&self, instance_id: &InstanceId) -> PowerAuthResult<()> {
        let engine = self.engines.write().await.remove(instance_id).ok_or_else(|| {
            PowerAuthError::WrongParameter(format!("instance {instance_id} is not configured"))
        })?;
        engine.shutdown();
        info!("instance {instance_id} deconfigured");
        Ok(())
    }
}
