//! HTTP transport adapter
//!
//! POSTs the persisted mutation record as JSON to a single endpoint. Any
//! failure (connection, timeout, non-2xx status, unreadable body) is
//! reported as an error and treated by the engine as transient.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::debug;

use verdant_core::config::TransportConfig;
use verdant_core::domain::Mutation;
use verdant_core::ports::ISyncTransport;

/// Transport sending mutations to an HTTP endpoint
#[derive(Debug, Clone)]
pub struct HttpSyncTransport {
    client: Client,
    endpoint: String,
}

impl HttpSyncTransport {
    /// Creates a transport for `endpoint` with a per-request timeout
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// Creates a transport from configuration
    ///
    /// # Errors
    /// Fails if `transport.endpoint` is not set
    pub fn from_config(config: &TransportConfig) -> anyhow::Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .context("transport.endpoint is not configured")?;
        Self::new(endpoint, Duration::from_secs(config.timeout_secs))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ISyncTransport for HttpSyncTransport {
    async fn sync(&self, mutation: &Mutation) -> anyhow::Result<Value> {
        debug!(mutation_id = %mutation.id, endpoint = %self.endpoint, "Sending mutation");

        let response = self
            .client
            .post(&self.endpoint)
            .json(mutation)
            .send()
            .await
            .with_context(|| format!("Request for mutation {} failed", mutation.id))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Remote rejected mutation {} with {}: {}", mutation.id, status, body);
        }

        if status == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }

        let bytes = response.bytes().await.context("Failed to read response body")?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).context("Response body is not JSON")
    }
}
