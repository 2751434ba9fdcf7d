//! Device authentication.
//!
//! Two credential paths: a process-wide static key (anonymous simulators and
//! fleet-provisioning setups) and a per-device hashed key looked up in the
//! relational store. Stored credentials are SHA-256(pepper ‖ key) hex
//! digests — presented keys are hashed and compared, never checked against
//! plaintext. Callers of [`AuthGate::authenticate`] cannot distinguish an
//! unknown device from a bad key.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::error::PipelineError;
use crate::repository::HerdRepository;

/// Device id assigned to sessions authenticated by the static key without
/// declaring their own id.
pub const ANONYMOUS_DEVICE_ID: &str = "simulator";

/// Hash an API key with the system-wide pepper.
///
/// The pepper is never stored next to the hashes, so a leaked device table
/// alone is not enough to verify candidate keys.
pub fn hash_api_key(key: &str, pepper: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(pepper.as_bytes());
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// The identity handed to the hub and REST layer after a successful
/// authentication.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub animal_id: Option<String>,
    pub sensor_types: Vec<String>,
}

pub struct AuthGate {
    repository: Arc<HerdRepository>,
    static_key: Option<String>,
    pepper: String,
}

impl AuthGate {
    pub fn new(
        repository: Arc<HerdRepository>,
        static_key: Option<String>,
        pepper: String,
    ) -> Self {
        Self {
            repository,
            static_key,
            pepper,
        }
    }

    /// Session-path authentication. Failure causes are deliberately
    /// collapsed into a single [`PipelineError::Auth`].
    pub async fn authenticate(
        &self,
        device_id: Option<&str>,
        presented_key: &str,
    ) -> Result<DeviceIdentity, PipelineError> {
        if self.matches_static_key(presented_key) {
            return Ok(DeviceIdentity {
                device_id: device_id.unwrap_or(ANONYMOUS_DEVICE_ID).to_string(),
                animal_id: None,
                sensor_types: Vec::new(),
            });
        }

        let device_id = device_id.ok_or(PipelineError::Auth)?;
        self.verify_device(device_id, presented_key)
            .await
            .map_err(|_| PipelineError::Auth)
    }

    /// REST-path authentication: an unknown device id surfaces as
    /// `NotFound`, a bad key as `Auth`.
    pub async fn authenticate_device(
        &self,
        device_id: &str,
        presented_key: &str,
    ) -> Result<DeviceIdentity, PipelineError> {
        if self.matches_static_key(presented_key) {
            return Ok(DeviceIdentity {
                device_id: device_id.to_string(),
                animal_id: None,
                sensor_types: Vec::new(),
            });
        }

        self.verify_device(device_id, presented_key).await
    }

    fn matches_static_key(&self, presented_key: &str) -> bool {
        matches!(&self.static_key, Some(key) if key == presented_key)
    }

    async fn verify_device(
        &self,
        device_id: &str,
        presented_key: &str,
    ) -> Result<DeviceIdentity, PipelineError> {
        let device = self
            .repository
            .find_device(device_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("device"))?;

        if hash_api_key(presented_key, &self.pepper) != device.api_key_hash {
            return Err(PipelineError::Auth);
        }

        if let Err(err) = self.repository.touch_last_connected(device_id).await {
            // Stamping is best-effort; authentication already succeeded.
            tracing::warn!("Failed to update last_connected_at for {}: {}", device_id, err);
        }

        Ok(DeviceIdentity {
            device_id: device.device_id,
            animal_id: device.animal_id,
            sensor_types: device.sensor_types,
        })
    }
}
