//! Docker Compose backed container runtime

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

use crate::deploy::docker::{self, run_docker, COMPOSE_TIMEOUT, INSPECT_TIMEOUT};
use crate::deploy::ContainerRuntime;
use crate::errors::AgentError;
use crate::models::credential::RegistryCredential;
use crate::models::image::ImageRef;

/// Image used for the detached helper that recreates the agent container
pub const DEFAULT_HELPER_IMAGE: &str = "docker:cli";

/// Name of the helper container; at most one exists at a time
pub const HELPER_CONTAINER_NAME: &str = "beachvar-agent-updater";

const DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Runtime adapter driving the services of one compose file
#[derive(Debug, Clone)]
pub struct ComposeRuntime {
    compose_file: PathBuf,
    helper_image: String,
}

impl ComposeRuntime {
    pub fn new(compose_file: impl Into<PathBuf>) -> Self {
        Self {
            compose_file: compose_file.into(),
            helper_image: DEFAULT_HELPER_IMAGE.to_string(),
        }
    }

    fn compose_dir(&self) -> &Path {
        self.compose_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }

    /// Check that the docker daemon answers and the compose file exists
    pub async fn check(&self) -> Result<String, AgentError> {
        if tokio::fs::metadata(&self.compose_file).await.is_err() {
            return Err(AgentError::NotFound(format!(
                "Compose file not found at {}",
                self.compose_file.display()
            )));
        }
        docker::server_version().await
    }

    async fn compose(&self, args: &[&str], timeout: std::time::Duration) -> Result<String, AgentError> {
        let file = self.compose_file.to_string_lossy().to_string();
        let mut full_args = vec!["compose", "-f", file.as_str()];
        full_args.extend_from_slice(args);
        run_docker(&full_args, None, Some(self.compose_dir()), timeout).await
    }

    async fn container_id(&self, service: &str) -> Result<String, AgentError> {
        let output = self.compose(&["ps", "-q", service], INSPECT_TIMEOUT).await?;
        output
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or_else(|| AgentError::RuntimeError(format!("Service {} has no container", service)))
    }

    /// Running flag and image id of a container
    async fn inspect_container(&self, container_id: &str) -> Result<(bool, String), AgentError> {
        let output = run_docker(
            &["inspect", "-f", "{{.State.Running}}|{{.Image}}", container_id],
            None,
            None,
            INSPECT_TIMEOUT,
        )
        .await?;

        let (running, image_id) = output.split_once('|').ok_or_else(|| {
            AgentError::RuntimeError(format!("Unexpected inspect output: {}", output))
        })?;
        Ok((running.trim() == "true", image_id.trim().to_string()))
    }
}

#[async_trait]
impl ContainerRuntime for ComposeRuntime {
    async fn login(&self, registry: &str, credential: &RegistryCredential) -> Result<(), AgentError> {
        docker::login(
            registry,
            &credential.username,
            credential.token.expose_secret(),
        )
        .await
    }

    async fn pull(&self, image: &ImageRef) -> Result<(), AgentError> {
        docker::pull(image).await
    }

    async fn restart_service(&self, service: &str) -> Result<(), AgentError> {
        info!("Recreating service {}", service);
        self.compose(&["up", "-d", "--force-recreate", service], COMPOSE_TIMEOUT)
            .await?;
        info!("Service {} recreated", service);
        Ok(())
    }

    async fn running_version(&self, service: &str, image: &ImageRef) -> Result<String, AgentError> {
        let container_id = self.container_id(service).await?;
        let (running, image_id) = self.inspect_container(&container_id).await?;
        if !running {
            return Err(AgentError::RuntimeError(format!(
                "Container of service {} is not running",
                service
            )));
        }

        let output = run_docker(
            &["image", "inspect", "-f", "{{json .RepoDigests}}", &image_id],
            None,
            None,
            INSPECT_TIMEOUT,
        )
        .await?;

        let repo_digests: Vec<String> = serde_json::from_str(&output)?;
        repo_digests
            .iter()
            .find_map(|entry| parse_repo_digest(entry, image))
            .ok_or_else(|| {
                AgentError::RuntimeError(format!(
                    "Image {} of service {} has no digest for {}",
                    image_id,
                    service,
                    image.name()
                ))
            })
    }

    async fn is_running(&self, service: &str) -> bool {
        let container_id = match self.container_id(service).await {
            Ok(id) => id,
            Err(e) => {
                debug!("Service {} has no container: {}", service, e);
                return false;
            }
        };

        match self.inspect_container(&container_id).await {
            Ok((running, _)) => running,
            Err(e) => {
                debug!("Error inspecting service {}: {}", service, e);
                false
            }
        }
    }

    async fn replace_self(&self, service: &str) -> Result<(), AgentError> {
        // A stale helper from an earlier attempt would block the name
        if let Err(e) = run_docker(
            &["rm", "-f", HELPER_CONTAINER_NAME],
            None,
            None,
            INSPECT_TIMEOUT,
        )
        .await
        {
            debug!("No stale helper container removed: {}", e);
        }

        let compose_dir = self.compose_dir().to_string_lossy().to_string();
        let compose_name = self
            .compose_file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                AgentError::ConfigError(format!(
                    "Invalid compose file path: {}",
                    self.compose_file.display()
                ))
            })?;
        let socket_mount = format!("{0}:{0}", DOCKER_SOCKET);
        let dir_mount = format!("{0}:{0}:ro", compose_dir);

        let container_id = run_docker(
            &[
                "run",
                "-d",
                "--rm",
                "--name",
                HELPER_CONTAINER_NAME,
                "-v",
                &socket_mount,
                "-v",
                &dir_mount,
                "-w",
                &compose_dir,
                &self.helper_image,
                "docker",
                "compose",
                "-f",
                &compose_name,
                "up",
                "-d",
                "--force-recreate",
                service,
            ],
            None,
            None,
            docker::PULL_TIMEOUT,
        )
        .await?;

        let short_id: String = container_id.chars().take(12).collect();
        if short_id.is_empty() {
            warn!("Helper container started without reporting an id");
        }
        info!("Helper container {} started to recreate {}", short_id, service);
        Ok(())
    }
}

/// `ghcr.io/org/app@sha256:abc` -> `sha256:abc`, only for entries of `image`
fn parse_repo_digest(entry: &str, image: &ImageRef) -> Option<String> {
    let (name, digest) = entry.trim().split_once('@')?;
    if name != image.name() || !digest.starts_with("sha256:") {
        return None;
    }
    Some(digest.to_string())
}
