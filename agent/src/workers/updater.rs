//! Update worker: drives the orchestrator on a fixed interval

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::orchestrator::{Cycle, CycleGuard, CycleOutcome, RuntimeLock};

/// Update worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Time between ticks
    pub interval: Duration,

    /// Delay before the first tick
    pub initial_delay: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            initial_delay: Duration::from_secs(5),
        }
    }
}

/// Run the update worker.
///
/// Each tick starts a cycle on its own task if the guard is free; a tick
/// that finds a cycle still running is dropped. A started cycle waits for
/// `runtime_lock`, so an ongoing watchdog repair delays it rather than
/// costing the tick. On shutdown the in-flight
/// cycle is awaited so it can reach a consistent state. After a cycle hands
/// off to a replacement agent, `hand_off_tx` is notified and no further
/// cycles start.
pub async fn run<C>(
    options: &Options,
    cycle: Arc<C>,
    guard: CycleGuard,
    runtime_lock: RuntimeLock,
    hand_off_tx: mpsc::Sender<()>,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    C: Cycle,
{
    info!("Update worker starting (interval {:?})...", options.interval);

    tokio::select! {
        _ = &mut shutdown_signal => {
            info!("Update worker shutting down...");
            return;
        }
        _ = tokio::time::sleep(options.initial_delay) => {}
    }

    let mut ticker = tokio::time::interval(options.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let handed_off = Arc::new(AtomicBool::new(false));
    let mut in_flight: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Update worker shutting down...");
                break;
            }
            _ = ticker.tick() => {}
        }

        if handed_off.load(Ordering::Acquire) {
            debug!("Hand-off in progress, not starting new cycles");
            break;
        }

        let Some(permit) = guard.try_acquire() else {
            warn!("Previous update cycle still running, skipping this tick");
            continue;
        };

        let cycle = cycle.clone();
        let runtime_lock = runtime_lock.clone();
        let hand_off_tx = hand_off_tx.clone();
        let handed_off = handed_off.clone();
        in_flight = Some(tokio::spawn(async move {
            let _permit = permit;
            let _runtime = runtime_lock.lock().await;
            let outcome = cycle.run_cycle().await;
            match &outcome {
                CycleOutcome::HandOff(_) => {
                    handed_off.store(true, Ordering::Release);
                    let _ = hand_off_tx.try_send(());
                }
                CycleOutcome::Skipped(reason) => {
                    debug!("Cycle skipped: {:?}", reason);
                }
                CycleOutcome::Completed(_) => {}
            }
        }));
    }

    if let Some(handle) = in_flight.take() {
        if !handle.is_finished() {
            info!("Waiting for the in-flight update cycle to finish...");
        }
        if let Err(e) = handle.await {
            warn!("Update cycle task ended abnormally: {}", e);
        }
    }
}
