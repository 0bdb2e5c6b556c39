//! BeachVar Agent Library
//!
//! Core modules for the BeachVar edge agent: the update orchestrator, its
//! backend, registry and container runtime adapters, and the workers that
//! schedule them.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod models;
pub mod orchestrator;
pub mod registry;
pub mod storage;
pub mod utils;
pub mod workers;
