//! Application wiring: configuration, state and the run loop

pub mod context;
pub mod diagnostic;
pub mod options;
pub mod run;
pub mod state;
