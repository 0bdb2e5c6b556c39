//! Watchdog worker: recreates watched services whose container is down

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::deploy::ContainerRuntime;
use crate::orchestrator::RuntimeLock;

/// Watchdog worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Check interval
    pub interval: Duration,

    /// Compose services that must be running
    pub services: Vec<String>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            services: vec!["device".to_string()],
        }
    }
}

/// Run the watchdog worker. A check is skipped while an update cycle holds
/// the runtime, since the cycle may be recreating the same containers.
pub async fn run<R>(
    options: &Options,
    runtime: Arc<R>,
    runtime_lock: RuntimeLock,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    R: ContainerRuntime + ?Sized,
{
    if options.services.is_empty() {
        info!("No services to watch, watchdog worker will not start.");
        return;
    }

    info!("Watchdog worker starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Watchdog worker shutting down...");
                return;
            }
            _ = tokio::time::sleep(options.interval) => {}
        }

        let Some(_runtime) = runtime_lock.try_lock() else {
            debug!("Update cycle in progress, skipping health check");
            continue;
        };

        check_services(&options.services, runtime.as_ref()).await;
    }
}

/// Recreate every service in `services` that is not running.
/// Returns the services that were found down.
pub async fn check_services<R>(services: &[String], runtime: &R) -> Vec<String>
where
    R: ContainerRuntime + ?Sized,
{
    let mut down = Vec::new();

    for service in services {
        if runtime.is_running(service).await {
            continue;
        }

        warn!("{} is not running, recreating...", service);
        down.push(service.clone());

        match runtime.restart_service(service).await {
            Ok(()) => info!("{} recreated", service),
            Err(e) => error!(service = %service, error = %e, "Failed to recreate service"),
        }
    }

    down
}
