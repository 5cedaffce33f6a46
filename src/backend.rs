//! Shared HTTP client for remote capabilities (OCR, completion, embedding)
//!
//! Handles base URL joining, bearer auth, timeouts, status classification and
//! the transient-failure retry loop so capability clients only describe their
//! request and response shapes.

use crate::config::{api_key_from_env, RetryConfig};
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub struct BackendClient {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    retry: RetryPolicy,
    service: &'static str,
}

impl BackendClient {
    pub fn new(
        service: &'static str,
        base_url: &str,
        api_key: Option<String>,
        retry: &RetryConfig,
    ) -> Result<Self> {
        // Relative joins drop the last path segment unless it ends with '/'
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base_url = Url::parse(&normalized)
            .map_err(|e| Error::Config(format!("Invalid {} URL '{}': {}", service, base_url, e)))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(retry.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url,
            api_key,
            retry: RetryPolicy::from_config(retry),
            service,
        })
    }

    /// Build a client whose key is read from the named environment variable
    pub fn from_env_key(
        service: &'static str,
        base_url: &str,
        api_key_env: &str,
        retry: &RetryConfig,
    ) -> Result<Self> {
        Self::new(service, base_url, api_key_from_env(api_key_env), retry)
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn service(&self) -> &'static str {
        self.service
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| Error::Config(format!("Invalid {} endpoint '{}': {}", self.service, path, e)))
    }

    /// POST `body` as JSON to `path` and decode the JSON reply, retrying
    /// transient failures
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        let url = &url;
        self.retry
            .run(self.service, move || async move {
                self.send_once(url.clone(), body).await
            })
            .await
    }

    async fn send_once<B, T>(&self, url: Url, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!("{} request to {}", self.service, url);
        let mut request = self.client.post(url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::from_transport(self.service, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::from_status(self.service, status, &text));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::from_transport(self.service, e))?;
        serde_json::from_slice(&bytes).map_err(|e| {
            Error::Capability(format!("{} returned an unexpected payload: {}", self.service, e))
        })
    }
}
