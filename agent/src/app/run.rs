//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::context::AgentContext;
use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::errors::AgentError;
use crate::workers::{updater, watchdog};

/// Why the agent stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// A shutdown signal was received
    Shutdown,

    /// A replacement agent container is taking over
    HandOff,
}

/// Run the BeachVar agent until a shutdown signal or a self-update hand-off
pub async fn run(
    context: AgentContext,
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<RunExit, AgentError> {
    info!("Initializing BeachVar Agent...");

    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let (hand_off_tx, mut hand_off_rx) = mpsc::channel::<()>(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    let app_state = match AppState::init(&context, &options).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Failed to start agent: {}", e);
            return Err(e);
        }
    };

    init_updater_worker(
        options.updater.clone(),
        app_state.clone(),
        hand_off_tx,
        &mut shutdown_manager,
        shutdown_tx.subscribe(),
    )?;

    if options.enable_watchdog {
        init_watchdog_worker(
            options.watchdog.clone(),
            app_state.clone(),
            &mut shutdown_manager,
            shutdown_tx.subscribe(),
        )?;
    }

    let exit = tokio::select! {
        _ = shutdown_signal => {
            info!("Shutdown signal received, shutting down...");
            RunExit::Shutdown
        }
        Some(()) = hand_off_rx.recv() => {
            info!("Handing off to the replacement agent, shutting down...");
            RunExit::HandOff
        }
    };

    drop(shutdown_tx);
    shutdown_manager.shutdown().await?;
    Ok(exit)
}

// =============================== INITIALIZATION ================================== //

fn init_updater_worker(
    options: updater::Options,
    app_state: Arc<AppState>,
    hand_off_tx: mpsc::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), AgentError> {
    info!("Initializing update worker...");

    let orchestrator = app_state.orchestrator.clone();
    let guard = app_state.guard.clone();
    let runtime_lock = app_state.runtime_lock.clone();

    let handle = tokio::spawn(async move {
        updater::run(
            &options,
            orchestrator,
            guard,
            runtime_lock,
            hand_off_tx,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_updater_worker_handle(handle)
}

fn init_watchdog_worker(
    options: watchdog::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), AgentError> {
    info!("Initializing watchdog worker...");

    let runtime = app_state.runtime.clone();
    let runtime_lock = app_state.runtime_lock.clone();

    let handle = tokio::spawn(async move {
        watchdog::run(
            &options,
            runtime,
            runtime_lock,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_watchdog_worker_handle(handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    updater_worker_handle: Option<JoinHandle<()>>,
    watchdog_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            updater_worker_handle: None,
            watchdog_worker_handle: None,
        }
    }

    pub fn with_updater_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), AgentError> {
        if self.updater_worker_handle.is_some() {
            return Err(AgentError::ShutdownError("updater_handle already set".to_string()));
        }
        self.updater_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_watchdog_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), AgentError> {
        if self.watchdog_worker_handle.is_some() {
            return Err(AgentError::ShutdownError("watchdog_handle already set".to_string()));
        }
        self.watchdog_worker_handle = Some(handle);
        Ok(())
    }

    /// Stop the workers, giving an in-flight cycle up to the grace period to
    /// reach a consistent state. Past that the process exits unconditionally.
    pub async fn shutdown(&mut self) -> Result<(), AgentError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), AgentError> {
        info!("Shutting down BeachVar Agent...");

        // 1. Watchdog worker
        if let Some(handle) = self.watchdog_worker_handle.take() {
            handle.await.map_err(|e| AgentError::ShutdownError(e.to_string()))?;
        }

        // 2. Update worker, waits for the in-flight cycle
        if let Some(handle) = self.updater_worker_handle.take() {
            handle.await.map_err(|e| AgentError::ShutdownError(e.to_string()))?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
