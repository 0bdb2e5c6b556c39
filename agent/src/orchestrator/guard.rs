//! Concurrency primitives around update cycles.
//!
//! [`CycleGuard`] is held only by update cycles: a tick that finds it taken
//! is dropped. [`RuntimeLock`] serializes everything that recreates
//! containers. A cycle waits for it, the watchdog only tries it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
struct GuardState {
    busy: AtomicBool,
    turned_away: AtomicU64,
}

/// At most one holder at a time. Contenders are turned away, never queued.
#[derive(Debug, Clone, Default)]
pub struct CycleGuard {
    state: Arc<GuardState>,
}

impl CycleGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the guard, or `None` if someone already holds it
    pub fn try_acquire(&self) -> Option<CyclePermit> {
        match self
            .state
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Some(CyclePermit {
                state: self.state.clone(),
            }),
            Err(_) => {
                self.state.turned_away.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn is_busy(&self) -> bool {
        self.state.busy.load(Ordering::Acquire)
    }

    /// Number of acquisition attempts refused so far
    pub fn turned_away(&self) -> u64 {
        self.state.turned_away.load(Ordering::Relaxed)
    }
}

/// Releases the guard on drop
#[derive(Debug)]
pub struct CyclePermit {
    state: Arc<GuardState>,
}

impl Drop for CyclePermit {
    fn drop(&mut self) {
        self.state.busy.store(false, Ordering::Release);
    }
}

/// Exclusive access to the container runtime
#[derive(Debug, Clone, Default)]
pub struct RuntimeLock {
    inner: Arc<Mutex<()>>,
}

impl RuntimeLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the runtime to be free
    pub async fn lock(&self) -> OwnedMutexGuard<()> {
        self.inner.clone().lock_owned().await
    }

    /// Take the runtime if nobody holds it
    pub fn try_lock(&self) -> Option<OwnedMutexGuard<()>> {
        self.inner.clone().try_lock_owned().ok()
    }
}
