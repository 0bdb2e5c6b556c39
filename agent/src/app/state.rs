//! Application state management

use std::sync::Arc;

use tracing::{info, warn};

use crate::app::context::AgentContext;
use crate::app::options::AppOptions;
use crate::deploy::compose::ComposeRuntime;
use crate::deploy::ContainerRuntime;
use crate::errors::AgentError;
use crate::http::client::HttpClient;
use crate::orchestrator::{CycleGuard, Orchestrator, RuntimeLock};
use crate::registry::client::RegistryClient;
use crate::storage::versions::VersionStore;

/// Main application state
pub struct AppState {
    /// Container runtime shared by the orchestrator and the watchdog
    pub runtime: Arc<dyn ContainerRuntime>,

    /// Version record
    pub store: Arc<VersionStore>,

    /// Update orchestrator
    pub orchestrator: Arc<Orchestrator>,

    /// At most one update cycle at a time
    pub guard: CycleGuard,

    /// Serializes update cycles and watchdog repairs
    pub runtime_lock: RuntimeLock,
}

impl AppState {
    /// Initialize application state
    pub async fn init(context: &AgentContext, options: &AppOptions) -> Result<Self, AgentError> {
        info!("Initializing application state...");

        let http_client = Arc::new(HttpClient::new(&context.backend_url, context.device_token.clone())?);
        let registry = Arc::new(RegistryClient::new()?);

        let compose_runtime = ComposeRuntime::new(&context.compose_file);
        match compose_runtime.check().await {
            Ok(version) => info!("Docker server version: {}", version),
            Err(e) => warn!("Container runtime not ready, cycles will retry: {}", e),
        }
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(compose_runtime);

        let store = Arc::new(VersionStore::open(options.storage.versions_file()).await);
        for (service, version) in store.load().await {
            info!(
                "Recorded {} version: {}",
                service,
                version.as_deref().unwrap_or("unknown")
            );
        }

        let orchestrator = Arc::new(Orchestrator::new(
            http_client,
            registry,
            runtime.clone(),
            store.clone(),
            context.managed_services()?,
            options.orchestrator.clone(),
        ));

        Ok(Self {
            runtime,
            store,
            orchestrator,
            guard: CycleGuard::new(),
            runtime_lock: RuntimeLock::new(),
        })
    }
}
