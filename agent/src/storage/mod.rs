//! Persisted agent state

pub mod layout;
pub mod versions;
