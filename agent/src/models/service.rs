//! Managed services

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::image::ImageRef;

/// The two workloads under management
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceName {
    /// The agent's own container
    Agent,

    /// The device workload
    Device,
}

impl ServiceName {
    /// Update order: the agent upgrades itself before deciding anything else
    pub const UPDATE_ORDER: [ServiceName; 2] = [ServiceName::Agent, ServiceName::Device];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceName::Agent => "agent",
            ServiceName::Device => "device",
        }
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A workload the orchestrator keeps on the latest image
#[derive(Debug, Clone)]
pub struct ManagedService {
    pub name: ServiceName,

    /// Image to track (always the tag's latest digest)
    pub image: ImageRef,

    /// Compose service name used for restart and inspection
    pub compose_service: String,

    /// Last version confirmed running, `None` when unknown
    pub current_version: Option<String>,
}

impl ManagedService {
    pub fn new(name: ServiceName, image: ImageRef, compose_service: impl Into<String>) -> Self {
        Self {
            name,
            image,
            compose_service: compose_service.into(),
            current_version: None,
        }
    }

    /// Whether `remote` differs from the recorded version
    pub fn needs_update(&self, remote: &str) -> bool {
        self.current_version.as_deref() != Some(remote)
    }
}

/// Short form of a digest for log lines
pub fn short_version(version: &str) -> &str {
    let end = version
        .char_indices()
        .nth(19)
        .map(|(idx, _)| idx)
        .unwrap_or(version.len());
    &version[..end]
}
