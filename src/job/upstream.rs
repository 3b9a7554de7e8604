//! Upstream HTTP client
//!
//! Jobs receive their client explicitly, so timeouts can differ per job or
//! per test.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Request, Response};
use tracing::debug;

use crate::types::{CourierError, Result};

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Whole-exchange timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// User-Agent sent upstream
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30000,
            connect_timeout_ms: 10000,
            user_agent: format!("courier/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Issues assembled requests to the upstream service
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Send `request`; transport problems map to [`CourierError::Transport`]
    async fn send(&self, request: Request) -> Result<Response>;
}

/// [`Upstream`] over a `reqwest` client
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: Client,
}

impl HttpUpstream {
    /// Build a client from `config`
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| CourierError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Use a preconfigured client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn send(&self, request: Request) -> Result<Response> {
        debug!(method = %request.method(), url = %request.url(), "Sending upstream request");
        self.client
            .execute(request)
            .await
            .map_err(|e| CourierError::Transport(e.to_string()))
    }
}
