//! Container runtime adapter

pub mod compose;
pub mod docker;

use async_trait::async_trait;

use crate::errors::AgentError;
use crate::models::credential::RegistryCredential;
use crate::models::image::ImageRef;

/// Container operations consumed by the orchestrator and the watchdog.
/// Every call completes (or fails with `RuntimeError`) before returning.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Authenticate image pulls against `registry`
    async fn login(&self, registry: &str, credential: &RegistryCredential) -> Result<(), AgentError>;

    /// Pull the image's tag
    async fn pull(&self, image: &ImageRef) -> Result<(), AgentError>;

    /// Recreate the service's container from its (freshly pulled) image
    async fn restart_service(&self, service: &str) -> Result<(), AgentError>;

    /// Registry digest of `image` that the service's running container was
    /// created from
    async fn running_version(&self, service: &str, image: &ImageRef) -> Result<String, AgentError>;

    /// Whether the service has a running container
    async fn is_running(&self, service: &str) -> bool;

    /// Ask an external helper to recreate `service`, which is the agent's
    /// own container. Returns once the helper has started; the caller is
    /// expected to exit shortly after.
    async fn replace_self(&self, service: &str) -> Result<(), AgentError>;
}
