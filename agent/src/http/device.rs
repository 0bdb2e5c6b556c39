//! Device endpoints of the backend API

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use crate::errors::AgentError;
use crate::http::client::HttpClient;
use crate::models::config::DeviceConfig;
use crate::models::credential::{RegistryCredential, RegistryTokenResponse};
use crate::models::report::UpdateCycleResult;

pub const REGISTRY_TOKEN_PATH: &str = "/api/device/registry-token/";
pub const DEVICE_CONFIG_PATH: &str = "/api/device/config/";
pub const VERSION_REPORT_PATH: &str = "/api/device/version/";

/// Backend operations consumed by the orchestrator
#[async_trait]
pub trait BackendApi: Send + Sync {
    /// Obtain a short-lived registry credential for this device
    async fn fetch_registry_credential(&self) -> Result<RegistryCredential, AgentError>;

    /// Fetch the device configuration (gateway URL, device id, update windows)
    async fn fetch_device_config(&self) -> Result<DeviceConfig, AgentError>;

    /// Report the outcome of a cycle for the services it checked.
    ///
    /// `status` is one of `unchanged`, `updated`, `failed`, or `pending`.
    /// `pending` only appears for the agent's own service when a replacement
    /// container has been started; that report carries no device entry, and
    /// the replacement's first report settles both services.
    async fn report_versions(&self, result: &UpdateCycleResult) -> Result<(), AgentError>;
}

#[async_trait]
impl BackendApi for HttpClient {
    async fn fetch_registry_credential(&self) -> Result<RegistryCredential, AgentError> {
        let response: RegistryTokenResponse = self.get(REGISTRY_TOKEN_PATH).await?;
        if response.token.is_empty() {
            return Err(AgentError::AuthError(
                "Backend returned an empty registry token".to_string(),
            ));
        }

        let credential = response.into_credential(Utc::now());
        debug!("Registry credential valid until {}", credential.expires_at);
        Ok(credential)
    }

    async fn fetch_device_config(&self) -> Result<DeviceConfig, AgentError> {
        self.get(DEVICE_CONFIG_PATH).await
    }

    async fn report_versions(&self, result: &UpdateCycleResult) -> Result<(), AgentError> {
        self.post(VERSION_REPORT_PATH, &result.services).await?;
        info!(
            "Reported {} service version(s) for cycle {}",
            result.services.len(),
            result.cycle_id
        );
        Ok(())
    }
}
