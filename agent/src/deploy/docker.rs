//! Docker CLI invocation

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::AgentError;
use crate::models::image::ImageRef;

pub const PULL_TIMEOUT: Duration = Duration::from_secs(600);
pub const COMPOSE_TIMEOUT: Duration = Duration::from_secs(300);
pub const INSPECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Run `docker <args>` and return its trimmed stdout.
///
/// A non-zero exit, a spawn failure or a timeout all surface as
/// `RuntimeError`; the child is killed if the timeout fires.
pub async fn run_docker(
    args: &[&str],
    stdin: Option<&str>,
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<String, AgentError> {
    debug!("Running: docker {}", args.join(" "));

    let mut command = Command::new("docker");
    command
        .args(args)
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let operation = args.iter().take(2).copied().collect::<Vec<_>>().join(" ");

    let mut child = command.spawn().map_err(|e| {
        AgentError::RuntimeError(format!("Failed to run docker {}: {}", operation, e))
    })?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input.as_bytes()).await?;
        drop(pipe);
    }

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| {
            AgentError::RuntimeError(format!(
                "docker {} timed out after {:?}",
                operation, timeout
            ))
        })??;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(AgentError::RuntimeError(format!(
            "docker {} failed ({}): {}",
            operation, output.status, stderr
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Log in to a registry, passing the secret on stdin
pub async fn login(registry: &str, username: &str, password: &str) -> Result<(), AgentError> {
    run_docker(
        &["login", registry, "-u", username, "--password-stdin"],
        Some(password),
        None,
        INSPECT_TIMEOUT,
    )
    .await
    .map_err(|e| match e {
        AgentError::RuntimeError(msg) if is_auth_failure(&msg) => AgentError::AuthError(msg),
        other => other,
    })?;

    info!("Logged in to {}", registry);
    Ok(())
}

/// Pull an image
pub async fn pull(image: &ImageRef) -> Result<(), AgentError> {
    let reference = image.to_string();
    info!("Pulling {}...", reference);

    run_docker(&["pull", &reference], None, None, PULL_TIMEOUT)
        .await
        .map_err(|e| match e {
            AgentError::RuntimeError(msg) if is_auth_failure(&msg) => AgentError::AuthError(msg),
            other => other,
        })?;

    info!("Successfully pulled {}", reference);
    Ok(())
}

/// Docker server version, used as a liveness check of the daemon
pub async fn server_version() -> Result<String, AgentError> {
    run_docker(
        &["version", "--format", "{{.Server.Version}}"],
        None,
        None,
        INSPECT_TIMEOUT,
    )
    .await
}

fn is_auth_failure(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    stderr.contains("unauthorized") || stderr.contains("denied") || stderr.contains("authentication")
}
