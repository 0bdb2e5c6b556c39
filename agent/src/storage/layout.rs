//! Storage layout configuration

use std::path::PathBuf;

use crate::filesys::file::File;

/// Default state directory, backed by a dedicated volume in the compose file
pub const DEFAULT_STATE_DIR: &str = "/etc/beachvar-agent";

/// Storage layout for the agent
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all persisted state
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Last-applied version per managed service
    pub fn versions_file(&self) -> File {
        File::new(self.base_dir.join("versions.json"))
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_DIR)
    }
}
