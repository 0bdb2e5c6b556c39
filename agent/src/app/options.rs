//! Application configuration options

use std::time::Duration;

use crate::app::context::AgentContext;
use crate::orchestrator::OrchestratorOptions;
use crate::storage::layout::StorageLayout;
use crate::workers::{updater, watchdog};

/// Main application options
#[derive(Debug, Clone, Default)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage layout paths
    pub storage: StorageLayout,

    /// Orchestrator options
    pub orchestrator: OrchestratorOptions,

    /// Update worker options
    pub updater: updater::Options,

    /// Enable the container watchdog
    pub enable_watchdog: bool,

    /// Watchdog worker options
    pub watchdog: watchdog::Options,
}

impl AppOptions {
    pub fn from_context(context: &AgentContext) -> Self {
        Self {
            lifecycle: LifecycleOptions {
                max_shutdown_delay: context.shutdown_grace,
            },
            storage: StorageLayout::new(&context.state_dir),
            orchestrator: OrchestratorOptions::default(),
            updater: updater::Options {
                interval: context.check_interval,
                ..Default::default()
            },
            enable_watchdog: true,
            watchdog: watchdog::Options {
                interval: context.health_check_interval,
                ..Default::default()
            },
        }
    }
}

/// Lifecycle options for the agent
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown before exiting unconditionally
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}
