//! Docker Registry v2 client used to resolve the latest digest of a tag

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::{header, Client, StatusCode};
use secrecy::ExposeSecret;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::errors::AgentError;
use crate::models::credential::RegistryCredential;
use crate::models::image::ImageRef;
use crate::models::service::short_version;
use crate::utils::sha256_hash;

/// Manifest media types we accept, multi-arch indexes first
const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.index.v1+json, \
    application/vnd.docker.distribution.manifest.list.v2+json, \
    application/vnd.docker.distribution.manifest.v2+json, \
    application/vnd.oci.image.manifest.v1+json";

const CONTENT_DIGEST_HEADER: &str = "Docker-Content-Digest";

/// Registry operations consumed by the orchestrator
#[async_trait]
pub trait RegistryApi: Send + Sync {
    /// Adopt `credential` for subsequent lookups. Repeating it with the same
    /// credential is a no-op.
    async fn login(&self, credential: &RegistryCredential) -> Result<(), AgentError>;

    /// Resolve the digest currently published under the image's tag
    async fn resolve_latest_version(
        &self,
        image: &ImageRef,
        credential: &RegistryCredential,
    ) -> Result<String, AgentError>;
}

#[derive(Debug, Deserialize)]
struct BearerTokenResponse {
    #[serde(default)]
    token: Option<String>,

    #[serde(default)]
    access_token: Option<String>,
}

#[derive(Default)]
struct Session {
    /// Token of the credential the cache below was built with
    credential_token: Option<String>,

    /// Pull-scoped bearer tokens per repository
    bearer_tokens: HashMap<String, String>,
}

/// Registry client speaking the Docker Registry HTTP API v2
pub struct RegistryClient {
    client: Client,
    endpoint_override: Option<String>,
    session: Mutex<Session>,
}

impl RegistryClient {
    /// Create a new registry client
    pub fn new() -> Result<Self, AgentError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("bvagent/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint_override: None,
            session: Mutex::new(Session::default()),
        })
    }

    /// Send every request to `base_url` instead of `https://<registry host>`
    pub fn with_endpoint(mut self, base_url: &str) -> Self {
        self.endpoint_override = Some(base_url.trim_end_matches('/').to_string());
        self
    }

    fn base_url(&self, image: &ImageRef) -> String {
        match &self.endpoint_override {
            Some(url) => url.clone(),
            None => format!("https://{}", image.registry),
        }
    }

    async fn bearer_token(
        &self,
        image: &ImageRef,
        credential: &RegistryCredential,
    ) -> Result<String, AgentError> {
        self.login(credential).await?;

        if let Some(token) = self.session.lock().await.bearer_tokens.get(&image.repository) {
            return Ok(token.clone());
        }

        let url = format!("{}/token", self.base_url(image));
        let basic = BASE64.encode(format!(
            "{}:{}",
            credential.username,
            credential.token.expose_secret()
        ));

        let response = self
            .client
            .get(&url)
            .query(&[("scope", format!("repository:{}:pull", image.repository))])
            .header(header::AUTHORIZATION, format!("Basic {}", basic))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::from_status(
                status,
                &format!("registry token for {}", image.name()),
                &body,
            ));
        }

        let body: BearerTokenResponse = response.json().await?;
        let token = body
            .token
            .or(body.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                AgentError::AuthError(format!("Registry issued no bearer token for {}", image.name()))
            })?;

        debug!("Got bearer token for {}", image.repository);
        self.session
            .lock()
            .await
            .bearer_tokens
            .insert(image.repository.clone(), token.clone());
        Ok(token)
    }

    async fn forget_bearer_token(&self, image: &ImageRef) {
        self.session.lock().await.bearer_tokens.remove(&image.repository);
    }
}

#[async_trait]
impl RegistryApi for RegistryClient {
    async fn login(&self, credential: &RegistryCredential) -> Result<(), AgentError> {
        let mut session = self.session.lock().await;
        let token = credential.token.expose_secret();
        if session.credential_token.as_deref() != Some(token) {
            session.credential_token = Some(token.to_string());
            session.bearer_tokens.clear();
        }
        Ok(())
    }

    async fn resolve_latest_version(
        &self,
        image: &ImageRef,
        credential: &RegistryCredential,
    ) -> Result<String, AgentError> {
        let bearer = self.bearer_token(image, credential).await?;

        let url = format!(
            "{}/v2/{}/manifests/{}",
            self.base_url(image),
            image.repository,
            image.tag
        );
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .header(header::AUTHORIZATION, format!("Bearer {}", bearer))
            .header(header::ACCEPT, MANIFEST_ACCEPT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            if status == StatusCode::UNAUTHORIZED {
                self.forget_bearer_token(image).await;
            }
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::from_status(
                status,
                &format!("manifest of {}", image),
                &body,
            ));
        }

        let header_digest = response
            .headers()
            .get(CONTENT_DIGEST_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let digest = match header_digest {
            Some(digest) => digest,
            None => {
                warn!("Registry sent no content digest for {}, hashing manifest", image);
                let body = response.bytes().await?;
                format!("sha256:{}", sha256_hash(&body))
            }
        };

        debug!("Remote digest for {}: {}", image, short_version(&digest));
        Ok(digest)
    }
}
