//! Domain models shared by the orchestrator and its collaborators

pub mod config;
pub mod credential;
pub mod image;
pub mod report;
pub mod service;
