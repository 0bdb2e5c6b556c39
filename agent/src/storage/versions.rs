//! Durable record of the last version confirmed running per managed service

use std::collections::BTreeMap;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::models::service::ServiceName;

/// Service name to last recorded version (`None` = unknown)
pub type VersionMap = BTreeMap<ServiceName, Option<String>>;

/// Crash-safe version store.
///
/// The orchestrator is the only writer. Reads return snapshots and may come
/// from any task.
pub struct VersionStore {
    file: File,
    versions: RwLock<VersionMap>,
}

impl VersionStore {
    /// Open the store, loading whatever is on disk. A missing file means
    /// every version is unknown; an unreadable one is treated the same way so
    /// the next cycle re-applies the latest images.
    pub async fn open(file: File) -> Self {
        let versions = match read_versions(&file).await {
            Ok(Some(versions)) => {
                debug!("Loaded versions from {}", file.path().display());
                versions
            }
            Ok(None) => {
                info!(
                    "No version record at {}, starting with unknown versions",
                    file.path().display()
                );
                empty_versions()
            }
            Err(e) => {
                warn!(
                    "Unable to read version record at {}, treating versions as unknown: {}",
                    file.path().display(),
                    e
                );
                empty_versions()
            }
        };

        Self {
            file,
            versions: RwLock::new(versions),
        }
    }

    /// Snapshot of all recorded versions
    pub async fn load(&self) -> VersionMap {
        self.versions.read().await.clone()
    }

    /// Recorded version of one service
    pub async fn get(&self, service: ServiceName) -> Option<String> {
        self.versions.read().await.get(&service).cloned().flatten()
    }

    /// Persist `version` for `service`. The in-memory copy only changes once
    /// the new file has replaced the old one.
    pub async fn save(&self, service: ServiceName, version: &str) -> Result<(), AgentError> {
        let mut versions = self.versions.write().await;

        let mut updated = versions.clone();
        updated.insert(service, Some(version.to_string()));

        let on_disk: BTreeMap<&str, Option<&str>> = updated
            .iter()
            .map(|(name, v)| (name.as_str(), v.as_deref()))
            .collect();

        self.file.write_json_atomic(&on_disk).await.map_err(|e| {
            AgentError::StorageError(format!(
                "Failed to persist version of {} to {}: {}",
                service,
                self.file.path().display(),
                e
            ))
        })?;

        *versions = updated;
        Ok(())
    }
}

fn empty_versions() -> VersionMap {
    ServiceName::UPDATE_ORDER
        .iter()
        .map(|name| (*name, None))
        .collect()
}

async fn read_versions(file: &File) -> Result<Option<VersionMap>, AgentError> {
    if !file.exists().await {
        return Ok(None);
    }

    let raw: BTreeMap<String, Option<String>> = file.read_json().await?;

    let mut versions = empty_versions();
    for name in ServiceName::UPDATE_ORDER {
        if let Some(version) = raw.get(name.as_str()).cloned().flatten() {
            if !version.is_empty() {
                versions.insert(name, Some(version));
            }
        }
    }

    Ok(Some(versions))
}
