//! Background workers

pub mod updater;
pub mod watchdog;
