//! Container registry access

pub mod client;
