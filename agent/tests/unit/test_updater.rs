//! Update scheduler and watchdog tests, on paused tokio time

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use bvagent::deploy::ContainerRuntime;
use bvagent::errors::AgentError;
use bvagent::models::credential::RegistryCredential;
use bvagent::models::image::ImageRef;
use bvagent::models::report::UpdateCycleResult;
use bvagent::orchestrator::{Cycle, CycleGuard, CycleOutcome, RuntimeLock};
use bvagent::workers::{updater, watchdog};

/// A cycle that takes `duration` and tracks how many run at once
struct SlowCycle {
    duration: Duration,
    hand_off: AtomicBool,
    started: AtomicUsize,
    finished: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl SlowCycle {
    fn new(duration: Duration) -> Self {
        Self {
            duration,
            hand_off: AtomicBool::new(false),
            started: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Cycle for SlowCycle {
    async fn run_cycle(&self) -> CycleOutcome {
        self.started.fetch_add(1, Ordering::SeqCst);
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);

        tokio::time::sleep(self.duration).await;

        self.running.fetch_sub(1, Ordering::SeqCst);
        self.finished.fetch_add(1, Ordering::SeqCst);

        let result = UpdateCycleResult::new(uuid::Uuid::new_v4());
        if self.hand_off.load(Ordering::SeqCst) {
            CycleOutcome::HandOff(result)
        } else {
            CycleOutcome::Completed(result)
        }
    }
}

fn updater_options() -> updater::Options {
    updater::Options {
        interval: Duration::from_secs(300),
        initial_delay: Duration::ZERO,
    }
}

fn shutdown_pair() -> (
    oneshot::Sender<()>,
    std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>,
) {
    let (tx, rx) = oneshot::channel::<()>();
    (
        tx,
        Box::pin(async move {
            let _ = rx.await;
        }),
    )
}

#[tokio::test(start_paused = true)]
async fn test_busy_ticks_are_skipped_not_queued() {
    let cycle = Arc::new(SlowCycle::new(Duration::from_secs(700)));
    let guard = CycleGuard::new();
    let (hand_off_tx, _hand_off_rx) = mpsc::channel(1);
    let (shutdown_tx, shutdown) = shutdown_pair();

    let worker = {
        let cycle = cycle.clone();
        let guard = guard.clone();
        tokio::spawn(async move {
            updater::run(&updater_options(), cycle, guard, RuntimeLock::new(), hand_off_tx, shutdown).await;
        })
    };

    // Ticks at 0, 300, 600 and 900: the first cycle holds the guard until 700
    tokio::time::sleep(Duration::from_secs(1000)).await;

    assert_eq!(cycle.started.load(Ordering::SeqCst), 2);
    assert_eq!(cycle.max_running.load(Ordering::SeqCst), 1);
    assert_eq!(guard.turned_away(), 2);

    shutdown_tx.send(()).unwrap();
    worker.await.unwrap();

    // Shutdown waited for the in-flight cycle
    assert_eq!(cycle.finished.load(Ordering::SeqCst), 2);
    assert!(!guard.is_busy());
}

#[tokio::test(start_paused = true)]
async fn test_fast_cycles_run_every_tick() {
    let cycle = Arc::new(SlowCycle::new(Duration::from_secs(10)));
    let guard = CycleGuard::new();
    let (hand_off_tx, _hand_off_rx) = mpsc::channel(1);
    let (shutdown_tx, shutdown) = shutdown_pair();

    let worker = {
        let cycle = cycle.clone();
        tokio::spawn(async move {
            updater::run(&updater_options(), cycle, guard, RuntimeLock::new(), hand_off_tx, shutdown).await;
        })
    };

    tokio::time::sleep(Duration::from_secs(950)).await;
    assert_eq!(cycle.started.load(Ordering::SeqCst), 4);

    shutdown_tx.send(()).unwrap();
    worker.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_hand_off_stops_the_worker() {
    let cycle = Arc::new(SlowCycle::new(Duration::from_secs(5)));
    cycle.hand_off.store(true, Ordering::SeqCst);
    let (hand_off_tx, mut hand_off_rx) = mpsc::channel(1);
    let (_shutdown_tx, shutdown) = shutdown_pair();

    let worker = {
        let cycle = cycle.clone();
        tokio::spawn(async move {
            updater::run(
                &updater_options(),
                cycle,
                CycleGuard::new(),
                RuntimeLock::new(),
                hand_off_tx,
                shutdown,
            )
            .await;
        })
    };

    assert_eq!(hand_off_rx.recv().await, Some(()));
    worker.await.unwrap();
    assert_eq!(cycle.started.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_before_first_tick() {
    let cycle = Arc::new(SlowCycle::new(Duration::from_secs(5)));
    let (hand_off_tx, _hand_off_rx) = mpsc::channel(1);
    let (shutdown_tx, shutdown) = shutdown_pair();
    let options = updater::Options {
        initial_delay: Duration::from_secs(60),
        ..updater_options()
    };

    shutdown_tx.send(()).unwrap();
    updater::run(
        &options,
        cycle.clone(),
        CycleGuard::new(),
        RuntimeLock::new(),
        hand_off_tx,
        shutdown,
    )
    .await;

    assert_eq!(cycle.started.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_repair_delays_cycle_without_losing_tick() {
    let cycle = Arc::new(SlowCycle::new(Duration::from_secs(10)));
    let guard = CycleGuard::new();
    let runtime_lock = RuntimeLock::new();
    let (hand_off_tx, _hand_off_rx) = mpsc::channel(1);
    let (shutdown_tx, shutdown) = shutdown_pair();

    // A repair is running when the first tick fires
    let repair = runtime_lock.try_lock().unwrap();

    let worker = {
        let cycle = cycle.clone();
        let guard = guard.clone();
        let runtime_lock = runtime_lock.clone();
        tokio::spawn(async move {
            updater::run(&updater_options(), cycle, guard, runtime_lock, hand_off_tx, shutdown).await;
        })
    };

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(cycle.started.load(Ordering::SeqCst), 0);
    drop(repair);

    tokio::time::sleep(Duration::from_secs(290)).await;
    assert_eq!(cycle.started.load(Ordering::SeqCst), 1);
    assert_eq!(cycle.finished.load(Ordering::SeqCst), 1);
    assert_eq!(guard.turned_away(), 0);

    shutdown_tx.send(()).unwrap();
    worker.await.unwrap();
}

// ================================= WATCHDOG ===================================== //

#[derive(Default)]
struct FlakyRuntime {
    down: Mutex<HashSet<String>>,
    restarts: Mutex<Vec<String>>,
}

#[async_trait]
impl ContainerRuntime for FlakyRuntime {
    async fn login(&self, _registry: &str, _credential: &RegistryCredential) -> Result<(), AgentError> {
        Ok(())
    }

    async fn pull(&self, _image: &ImageRef) -> Result<(), AgentError> {
        Ok(())
    }

    async fn restart_service(&self, service: &str) -> Result<(), AgentError> {
        self.restarts.lock().unwrap().push(service.to_string());
        self.down.lock().unwrap().remove(service);
        Ok(())
    }

    async fn running_version(&self, _service: &str, _image: &ImageRef) -> Result<String, AgentError> {
        Ok("sha256:d".to_string())
    }

    async fn is_running(&self, service: &str) -> bool {
        !self.down.lock().unwrap().contains(service)
    }

    async fn replace_self(&self, _service: &str) -> Result<(), AgentError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_check_services_recreates_stopped_containers() {
    let runtime = FlakyRuntime::default();
    runtime.down.lock().unwrap().insert("device".to_string());

    let services = vec!["device".to_string(), "agent".to_string()];
    let down = watchdog::check_services(&services, &runtime).await;

    assert_eq!(down, vec!["device".to_string()]);
    assert_eq!(runtime.restarts.lock().unwrap().as_slice(), &["device".to_string()]);
    assert!(watchdog::check_services(&services, &runtime).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_yields_to_update_cycle() {
    let runtime = Arc::new(FlakyRuntime::default());
    runtime.down.lock().unwrap().insert("device".to_string());
    let runtime_lock = RuntimeLock::new();
    let (shutdown_tx, shutdown) = shutdown_pair();

    // An update cycle holds the runtime
    let cycle_hold = runtime_lock.try_lock().unwrap();

    let worker = {
        let runtime = runtime.clone();
        let runtime_lock = runtime_lock.clone();
        tokio::spawn(async move {
            watchdog::run(&watchdog::Options::default(), runtime, runtime_lock, shutdown).await;
        })
    };

    tokio::time::sleep(Duration::from_secs(100)).await;
    assert!(runtime.restarts.lock().unwrap().is_empty());

    drop(cycle_hold);
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(runtime.restarts.lock().unwrap().as_slice(), &["device".to_string()]);

    shutdown_tx.send(()).unwrap();
    worker.await.unwrap();
}
