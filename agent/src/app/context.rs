//! Process-wide agent context, built once from the environment

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::errors::AgentError;
use crate::logs::LogLevel;
use crate::models::image::ImageRef;
use crate::models::service::{ManagedService, ServiceName};
use crate::storage::layout::DEFAULT_STATE_DIR;

pub const DEFAULT_BACKEND_URL: &str = "https://api.beachvar.cainelli.xyz";
pub const DEFAULT_COMPOSE_FILE_PATH: &str = "/etc/beachvar/docker-compose.yml";

pub const AGENT_IMAGE: &str = "ghcr.io/beachvar/beachvar-agent";
pub const DEVICE_IMAGE: &str = "ghcr.io/beachvar/beachvar-device";

const DEFAULT_CHECK_INTERVAL_SECS: u64 = 300;
const DEBUG_CHECK_INTERVAL_SECS: u64 = 30;
const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 30;
const DEBUG_HEALTH_CHECK_INTERVAL_SECS: u64 = 5;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;

/// Everything the agent needs to know about its device and environment.
/// Gateway URL and device id come from the backend, not from here.
#[derive(Debug, Clone)]
pub struct AgentContext {
    /// Device authentication secret
    pub device_token: SecretString,

    /// Backend API base URL
    pub backend_url: String,

    /// Time between update cycles
    pub check_interval: Duration,

    /// Time between container health checks
    pub health_check_interval: Duration,

    /// Compose file describing the managed services
    pub compose_file: PathBuf,

    /// Directory holding the version record
    pub state_dir: PathBuf,

    pub log_level: LogLevel,
    pub log_json: bool,
    pub log_dir: Option<PathBuf>,

    /// Grace period for the in-flight cycle on shutdown
    pub shutdown_grace: Duration,

    /// Faster intervals for development
    pub debug: bool,
}

impl AgentContext {
    /// Build the context from process environment variables
    pub fn from_env() -> Result<Self, AgentError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the context from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AgentError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let device_token = var("DEVICE_TOKEN").ok_or_else(|| {
            AgentError::ConfigError("DEVICE_TOKEN is required but not set".to_string())
        })?;

        let backend_url = var("BACKEND_URL").unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string());
        let parsed = Url::parse(&backend_url).map_err(|e| {
            AgentError::ConfigError(format!("BACKEND_URL is not a valid URL ({}): {}", backend_url, e))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AgentError::ConfigError(format!(
                "BACKEND_URL must use http or https: {}",
                backend_url
            )));
        }

        let debug = var("DEBUG")
            .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false);

        let default_check = if debug { DEBUG_CHECK_INTERVAL_SECS } else { DEFAULT_CHECK_INTERVAL_SECS };
        let check_interval_raw = var("CHECK_INTERVAL_SECONDS")
            .map(|v| ("CHECK_INTERVAL_SECONDS", v))
            .or_else(|| var("UPDATE_CHECK_INTERVAL_SECONDS").map(|v| ("UPDATE_CHECK_INTERVAL_SECONDS", v)));
        let check_interval = match check_interval_raw {
            Some((key, value)) => parse_secs(key, &value)?,
            None => default_check,
        };

        let default_health = if debug {
            DEBUG_HEALTH_CHECK_INTERVAL_SECS
        } else {
            DEFAULT_HEALTH_CHECK_INTERVAL_SECS
        };
        let health_check_interval = match var("HEALTH_CHECK_INTERVAL_SECONDS") {
            Some(value) => parse_secs("HEALTH_CHECK_INTERVAL_SECONDS", &value)?,
            None => default_health,
        };

        let shutdown_grace = match var("SHUTDOWN_GRACE_SECONDS") {
            Some(value) => parse_secs("SHUTDOWN_GRACE_SECONDS", &value)?,
            None => DEFAULT_SHUTDOWN_GRACE_SECS,
        };

        let log_level = match var("LOG_LEVEL") {
            Some(value) => value.parse().map_err(AgentError::ConfigError)?,
            None => LogLevel::Info,
        };

        let log_json = var("LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        Ok(Self {
            device_token: SecretString::from(device_token),
            backend_url: backend_url.trim_end_matches('/').to_string(),
            check_interval: Duration::from_secs(check_interval),
            health_check_interval: Duration::from_secs(health_check_interval),
            compose_file: PathBuf::from(
                var("COMPOSE_FILE_PATH").unwrap_or_else(|| DEFAULT_COMPOSE_FILE_PATH.to_string()),
            ),
            state_dir: PathBuf::from(var("STATE_DIR").unwrap_or_else(|| DEFAULT_STATE_DIR.to_string())),
            log_level,
            log_json,
            log_dir: var("LOG_DIR").map(PathBuf::from),
            shutdown_grace: Duration::from_secs(shutdown_grace),
            debug,
        })
    }

    /// The two managed services, in update order
    pub fn managed_services(&self) -> Result<Vec<ManagedService>, AgentError> {
        Ok(vec![
            ManagedService::new(ServiceName::Agent, ImageRef::parse(AGENT_IMAGE)?, "agent"),
            ManagedService::new(ServiceName::Device, ImageRef::parse(DEVICE_IMAGE)?, "device"),
        ])
    }
}

fn parse_secs(key: &str, value: &str) -> Result<u64, AgentError> {
    match value.parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(secs),
        _ => Err(AgentError::ConfigError(format!(
            "{} must be a positive number of seconds, got {:?}",
            key, value
        ))),
    }
}
