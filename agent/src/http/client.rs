//! HTTP client implementation

use std::time::Duration;

use reqwest::{header, Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};

use crate::errors::AgentError;

/// Request timeout for backend calls
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for backend communication, authenticated with the device token
pub struct HttpClient {
    client: Client,
    base_url: String,
    device_token: SecretString,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(base_url: &str, device_token: SecretString) -> Result<Self, AgentError> {
        Self::with_timeout(base_url, device_token, DEFAULT_TIMEOUT)
    }

    /// Create a new HTTP client with a custom request timeout
    pub fn with_timeout(
        base_url: &str,
        device_token: SecretString,
        timeout: Duration,
    ) -> Result<Self, AgentError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("bvagent/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            device_token,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(
            header::AUTHORIZATION,
            format!("Bearer {}", self.device_token.expose_secret()),
        )
    }

    async fn execute(&self, method: &str, url: &str, request: RequestBuilder) -> Result<Response, AgentError> {
        let response = self.authorized(request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("HTTP {} {} failed: {} - {}", method, url, status, body);
            return Err(AgentError::from_status(
                status,
                &format!("{} {}", method, url),
                &body,
            ));
        }

        Ok(response)
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, AgentError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let response = self.execute("GET", &url, self.client.get(&url)).await?;
        let body = response.json().await?;
        Ok(body)
    }

    /// Make a POST request whose response body is ignored
    pub async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<(), AgentError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);

        self.execute("POST", &url, self.client.post(&url).json(body))
            .await?;
        Ok(())
    }
}
