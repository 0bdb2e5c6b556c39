//! The update cycle

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, NaiveTime};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::deploy::ContainerRuntime;
use crate::errors::AgentError;
use crate::http::device::BackendApi;
use crate::models::config::DeviceConfig;
use crate::models::credential::RegistryCredential;
use crate::models::report::{UpdateCycleResult, UpdateStatus};
use crate::models::service::{short_version, ManagedService, ServiceName};
use crate::registry::client::RegistryApi;
use crate::storage::versions::VersionStore;

/// Orchestrator tuning
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// How long to wait for a restarted container to report the new version
    pub health_timeout: Duration,

    /// Delay between running-version checks while waiting
    pub health_poll_interval: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            health_timeout: Duration::from_secs(60),
            health_poll_interval: Duration::from_secs(2),
        }
    }
}

/// Why a cycle did nothing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Outside every configured update window
    OutsideUpdateWindow,

    /// No usable registry credential
    Credential(String),
}

/// Result of one `run_cycle`
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    /// Every service was checked and the result reported
    Completed(UpdateCycleResult),

    /// Nothing was checked, nothing changed
    Skipped(SkipReason),

    /// The agent's replacement has been started; this process must exit
    HandOff(UpdateCycleResult),
}

impl CycleOutcome {
    pub fn result(&self) -> Option<&UpdateCycleResult> {
        match self {
            CycleOutcome::Completed(result) | CycleOutcome::HandOff(result) => Some(result),
            CycleOutcome::Skipped(_) => None,
        }
    }

    pub fn is_hand_off(&self) -> bool {
        matches!(self, CycleOutcome::HandOff(_))
    }
}

/// Something that runs update cycles. Implemented by [`Orchestrator`];
/// the scheduler only depends on this.
#[async_trait]
pub trait Cycle: Send + Sync + 'static {
    async fn run_cycle(&self) -> CycleOutcome;
}

enum ServiceUpdate {
    Unchanged(String),
    Updated(String),
    HandedOff(String),
}

struct ServiceFailure {
    operation: &'static str,
    observed: Option<String>,
    error: AgentError,
}

impl ServiceFailure {
    fn new(operation: &'static str, observed: Option<&str>, error: AgentError) -> Self {
        Self {
            operation,
            observed: observed.map(str::to_string),
            error,
        }
    }
}

type Clock = Box<dyn Fn() -> NaiveTime + Send + Sync>;

/// The single writer of the version store
pub struct Orchestrator {
    backend: Arc<dyn BackendApi>,
    registry: Arc<dyn RegistryApi>,
    runtime: Arc<dyn ContainerRuntime>,
    store: Arc<VersionStore>,
    services: Vec<ManagedService>,
    options: OrchestratorOptions,
    credential: Mutex<Option<RegistryCredential>>,
    device_config: RwLock<Option<DeviceConfig>>,
    clock: Clock,
}

impl Orchestrator {
    /// `services` are checked in the order given; the agent's own service
    /// must come first.
    pub fn new(
        backend: Arc<dyn BackendApi>,
        registry: Arc<dyn RegistryApi>,
        runtime: Arc<dyn ContainerRuntime>,
        store: Arc<VersionStore>,
        services: Vec<ManagedService>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            backend,
            registry,
            runtime,
            store,
            services,
            options,
            credential: Mutex::new(None),
            device_config: RwLock::new(None),
            clock: Box::new(|| Local::now().time()),
        }
    }

    /// Replace the local wall clock used for update windows
    pub fn with_clock(mut self, clock: impl Fn() -> NaiveTime + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Last device configuration fetched from the backend
    pub async fn device_config(&self) -> Option<DeviceConfig> {
        self.device_config.read().await.clone()
    }

    async fn run_cycle_impl(&self, cycle_id: Uuid) -> CycleOutcome {
        info!("Starting update cycle");

        if !self.update_allowed().await {
            info!("Outside all update windows, skipping update check");
            return CycleOutcome::Skipped(SkipReason::OutsideUpdateWindow);
        }

        let credential = match self.ensure_credential().await {
            Ok(credential) => credential,
            Err(e) => {
                error!(error = %e, "Unable to obtain registry credential, skipping cycle");
                return CycleOutcome::Skipped(SkipReason::Credential(e.to_string()));
            }
        };

        let mut result = UpdateCycleResult::new(cycle_id);
        let mut handed_off = false;

        for definition in &self.services {
            if handed_off {
                // Left to the replacement agent's first cycle, and not reported
                // since nothing was resolved for it
                debug!("Leaving {} to the replacement agent", definition.name);
                break;
            }

            let recorded = self.store.get(definition.name).await;
            let mut service = definition.clone();
            service.current_version = recorded;

            match self.update_service(&service, &credential).await {
                Ok(ServiceUpdate::Unchanged(version)) => {
                    result.record(service.name, Some(version), UpdateStatus::Unchanged);
                }
                Ok(ServiceUpdate::Updated(version)) => {
                    result.record(service.name, Some(version), UpdateStatus::Updated);
                }
                Ok(ServiceUpdate::HandedOff(version)) => {
                    result.record(service.name, Some(version), UpdateStatus::Pending);
                    handed_off = true;
                }
                Err(failure) => {
                    error!(
                        service = %service.name,
                        operation = failure.operation,
                        error = %failure.error,
                        "Service update failed, keeping recorded version"
                    );
                    if failure.error.is_auth() {
                        self.invalidate_credential().await;
                    }
                    let version = failure.observed.or(service.current_version);
                    result.record(service.name, version, UpdateStatus::Failed);
                }
            }
        }

        result.finish();

        if let Err(e) = self.backend.report_versions(&result).await {
            warn!(error = %e, "Failed to report versions, will report again next cycle");
        }

        if handed_off {
            info!("Agent replacement started, handing off");
            CycleOutcome::HandOff(result)
        } else {
            info!("Update cycle complete");
            CycleOutcome::Completed(result)
        }
    }

    /// Refresh the device configuration and evaluate update windows. A failed
    /// refresh falls back to the cached copy; with nothing cached updates are
    /// allowed.
    async fn update_allowed(&self) -> bool {
        match self.backend.fetch_device_config().await {
            Ok(config) => {
                let mut cached = self.device_config.write().await;
                let changed = cached.as_ref().map(|c| c.device_id != config.device_id).unwrap_or(true);
                if changed {
                    info!(
                        device_id = config.device_id.as_deref().unwrap_or("unknown"),
                        gateway_url = config.gateway_url.as_deref().unwrap_or("unknown"),
                        "Device configuration loaded"
                    );
                }
                *cached = Some(config);
            }
            Err(e) => {
                warn!(error = %e, "Could not refresh device configuration, using cached copy");
            }
        }

        let now = (self.clock)();
        self.device_config
            .read()
            .await
            .as_ref()
            .map(|config| config.is_update_allowed(now))
            .unwrap_or(true)
    }

    /// Return a valid credential, fetching a new one when absent or expiring
    async fn ensure_credential(&self) -> Result<RegistryCredential, AgentError> {
        let mut cached = self.credential.lock().await;

        if let Some(credential) = cached.as_ref().filter(|c| !c.is_expired()) {
            self.registry.login(credential).await?;
            return Ok(credential.clone());
        }

        debug!("Fetching registry credential from backend");
        let credential = self.backend.fetch_registry_credential().await?;
        self.registry.login(&credential).await?;

        let registries: BTreeSet<&str> = self
            .services
            .iter()
            .map(|s| s.image.registry.as_str())
            .collect();
        for registry in registries {
            self.runtime.login(registry, &credential).await?;
        }

        info!("Registry credential refreshed, valid until {}", credential.expires_at);
        *cached = Some(credential.clone());
        Ok(credential)
    }

    async fn invalidate_credential(&self) {
        debug!("Dropping cached registry credential");
        *self.credential.lock().await = None;
    }

    async fn update_service(
        &self,
        service: &ManagedService,
        credential: &RegistryCredential,
    ) -> Result<ServiceUpdate, ServiceFailure> {
        let remote = self
            .registry
            .resolve_latest_version(&service.image, credential)
            .await
            .map_err(|e| ServiceFailure::new("resolve", None, e))?;

        if !service.needs_update(&remote) {
            debug!("{} is up to date ({})", service.name, short_version(&remote));
            return Ok(ServiceUpdate::Unchanged(remote));
        }

        info!(
            "{} update available: {} -> {}",
            service.name,
            service.current_version.as_deref().map(short_version).unwrap_or("unknown"),
            short_version(&remote)
        );

        // Already running the remote version (first boot, or a replacement
        // agent confirming itself): record without touching the container
        match self.runtime.running_version(&service.compose_service, &service.image).await {
            Ok(running) if running == remote => {
                info!("{} already runs {}, recording it", service.name, short_version(&remote));
                self.record(service, &remote).await?;
                return Ok(ServiceUpdate::Updated(remote));
            }
            Ok(running) => {
                debug!("{} runs {}", service.name, short_version(&running));
            }
            Err(e) => {
                debug!("Could not read running version of {}: {}", service.name, e);
            }
        }

        self.runtime
            .pull(&service.image)
            .await
            .map_err(|e| ServiceFailure::new("pull", Some(&remote), e))?;

        if service.name == ServiceName::Agent {
            self.runtime
                .replace_self(&service.compose_service)
                .await
                .map_err(|e| ServiceFailure::new("replace_self", Some(&remote), e))?;
            return Ok(ServiceUpdate::HandedOff(remote));
        }

        self.runtime
            .restart_service(&service.compose_service)
            .await
            .map_err(|e| ServiceFailure::new("restart", Some(&remote), e))?;

        self.confirm_running(service, &remote)
            .await
            .map_err(|e| ServiceFailure::new("confirm", Some(&remote), e))?;

        self.record(service, &remote).await?;
        info!("{} updated to {}", service.name, short_version(&remote));
        Ok(ServiceUpdate::Updated(remote))
    }

    async fn record(&self, service: &ManagedService, version: &str) -> Result<(), ServiceFailure> {
        self.store
            .save(service.name, version)
            .await
            .map_err(|e| ServiceFailure::new("record", Some(version), e))
    }

    /// Poll the runtime until the service runs `expected` or the health
    /// timeout passes
    async fn confirm_running(&self, service: &ManagedService, expected: &str) -> Result<(), AgentError> {
        let deadline = Instant::now() + self.options.health_timeout;

        loop {
            let observed = self
                .runtime
                .running_version(&service.compose_service, &service.image)
                .await;
            let last = match observed {
                Ok(running) if running == expected => return Ok(()),
                Ok(running) => format!("running {}", short_version(&running)),
                Err(e) => e.to_string(),
            };

            if Instant::now() >= deadline {
                return Err(AgentError::RuntimeError(format!(
                    "{} not confirmed running {} within {:?}: {}",
                    service.name,
                    short_version(expected),
                    self.options.health_timeout,
                    last
                )));
            }

            tokio::time::sleep(self.options.health_poll_interval).await;
        }
    }
}

#[async_trait]
impl Cycle for Orchestrator {
    async fn run_cycle(&self) -> CycleOutcome {
        let cycle_id = Uuid::new_v4();
        let span = info_span!("cycle", %cycle_id);
        self.run_cycle_impl(cycle_id).instrument(span).await
    }
}
