//! Container image references

use std::fmt;
use std::str::FromStr;

use crate::errors::AgentError;

const DEFAULT_TAG: &str = "latest";

/// A registry image reference, e.g. `ghcr.io/beachvar/beachvar-device:latest`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef {
    /// Registry host (`ghcr.io`)
    pub registry: String,

    /// Repository path inside the registry (`beachvar/beachvar-device`)
    pub repository: String,

    /// Tag to track
    pub tag: String,
}

impl ImageRef {
    /// Parse `host/path[:tag]`. The host segment is mandatory.
    pub fn parse(reference: &str) -> Result<Self, AgentError> {
        let reference = reference.trim();
        if reference.contains('@') {
            return Err(AgentError::ConfigError(format!(
                "Image reference must not pin a digest: {}",
                reference
            )));
        }

        let (registry, rest) = reference.split_once('/').ok_or_else(|| {
            AgentError::ConfigError(format!("Image reference has no registry host: {}", reference))
        })?;

        if registry.is_empty() || !(registry.contains('.') || registry.contains(':')) {
            return Err(AgentError::ConfigError(format!(
                "Invalid registry host in image reference: {}",
                reference
            )));
        }

        // A colon after the last slash separates the tag
        let (repository, tag) = match rest.rsplit_once(':') {
            Some((repo, tag)) if !tag.contains('/') => (repo, tag),
            _ => (rest, DEFAULT_TAG),
        };

        if repository.is_empty() || tag.is_empty() {
            return Err(AgentError::ConfigError(format!(
                "Invalid image reference: {}",
                reference
            )));
        }

        Ok(Self {
            registry: registry.to_string(),
            repository: repository.to_string(),
            tag: tag.to_string(),
        })
    }

    /// `host/path` without the tag
    pub fn name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.repository, self.tag)
    }
}

impl FromStr for ImageRef {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
