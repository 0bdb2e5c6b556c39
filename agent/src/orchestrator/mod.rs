//! Update orchestration: the periodic decision loop and its concurrency guard

pub mod cycle;
pub mod guard;

pub use cycle::{Cycle, CycleOutcome, Orchestrator, OrchestratorOptions, SkipReason};
pub use guard::{CycleGuard, CyclePermit, RuntimeLock};
