//! Configuration for the courier binary
//!
//! CLI arguments and environment variable handling using clap.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use reqwest::Method;

use crate::job::{ClientConfig, JobSpec, OutputRoute, BODY_KEY};
use crate::types::{CourierError, Result};
use crate::worker::PoolConfig;

/// Courier - fetch one upstream resource and deliver part of the response
#[derive(Parser, Debug, Clone)]
#[command(name = "courier")]
#[command(about = "Authenticated upstream fetch-and-fan-out")]
pub struct Args {
    /// Target URL template; `{repo}`, `{nodedir}` and `{nodename}` are
    /// filled from the resolved node
    #[arg(long, env = "REQUEST_URL")]
    pub url: String,

    /// Base URL for relative targets
    #[arg(long, env = "UPSTREAM_URL")]
    pub base_url: Option<String>,

    /// HTTP method
    #[arg(long, env = "REQUEST_METHOD", default_value = "GET")]
    pub method: String,

    /// Extra request header, NAME=VALUE (repeatable, value may hold placeholders)
    #[arg(long = "header", short = 'H', value_name = "NAME=VALUE")]
    pub headers: Vec<String>,

    /// Cookie to forward, NAME=VALUE (repeatable); disables signed auth
    #[arg(long = "cookie", value_name = "NAME=VALUE")]
    pub cookies: Vec<String>,

    /// Response part to deliver: "body" or a header name
    #[arg(long, env = "OUT_KEY", default_value = BODY_KEY)]
    pub out_key: String,

    /// Destination: "body" streams raw bytes, anything else emits JSON lines
    #[arg(long, env = "OUT_NAME", default_value = BODY_KEY)]
    pub out_name: String,

    /// Application key for signed requests
    #[arg(long, env = "APP_KEY")]
    pub app_key: Option<String>,

    /// Application secret for signed requests
    #[arg(long, env = "APP_SECRET", hide_env_values = true)]
    pub app_secret: Option<String>,

    /// Resolved node as JSON: {"repo":..,"dir":..,"basename":..}
    #[arg(long, env = "NODE_JSON")]
    pub node_json: Option<String>,

    /// Write the delivered body here instead of stdout
    #[arg(long, short = 'o', env = "OUTPUT")]
    pub output: Option<PathBuf>,

    /// Whole-request timeout in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// Connect timeout in milliseconds
    #[arg(long, env = "CONNECT_TIMEOUT_MS", default_value = "10000")]
    pub connect_timeout_ms: u64,

    /// How long to wait for the resolved node, in milliseconds
    #[arg(long, env = "NODE_TIMEOUT_MS", default_value = "30000")]
    pub node_timeout_ms: u64,

    /// Number of worker tasks
    #[arg(long, env = "WORKER_COUNT", default_value = "1")]
    pub worker_count: usize,

    /// Maximum number of jobs waiting for a worker
    #[arg(long, env = "MAX_QUEUE_SIZE", default_value = "16")]
    pub max_queue_size: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.url.trim().is_empty() {
            return Err("REQUEST_URL must not be empty".to_string());
        }

        if self.app_key.is_some() != self.app_secret.is_some() {
            return Err("APP_KEY and APP_SECRET must be set together".to_string());
        }

        if self.worker_count == 0 {
            return Err("WORKER_COUNT must be at least 1".to_string());
        }

        if Method::from_bytes(self.method.as_bytes()).is_err() {
            return Err(format!("Invalid REQUEST_METHOD '{}'", self.method));
        }

        for pair in self.headers.iter().chain(self.cookies.iter()) {
            parse_pair(pair).map_err(|e| e.to_string())?;
        }

        Ok(())
    }

    /// Signing credentials, when both are configured
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.app_key, &self.app_secret) {
            (Some(key), Some(secret)) => Some((key.as_str(), secret.as_str())),
            _ => None,
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            request_timeout_ms: self.request_timeout_ms,
            connect_timeout_ms: self.connect_timeout_ms,
            ..Default::default()
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            worker_count: self.worker_count,
            max_queue_size: self.max_queue_size,
        }
    }

    /// Job description for the configured request
    pub fn job_spec(&self) -> Result<JobSpec> {
        let method = Method::from_bytes(self.method.as_bytes())
            .map_err(|_| CourierError::Config(format!("invalid method '{}'", self.method)))?;

        let mut spec = JobSpec::new(
            self.url.clone(),
            OutputRoute::new(self.out_key.clone(), self.out_name.clone()),
        )
        .with_method(method)
        .with_node_timeout(Duration::from_millis(self.node_timeout_ms));

        if let Some(base_url) = &self.base_url {
            spec = spec.with_base_url(base_url.clone());
        }
        for pair in &self.headers {
            let (name, value) = parse_pair(pair)?;
            spec = spec.with_header(name, value);
        }
        for pair in &self.cookies {
            let (name, value) = parse_pair(pair)?;
            spec = spec.with_cookie(name, value);
        }
        Ok(spec)
    }
}

/// Split `NAME=VALUE` at the first `=`
fn parse_pair(pair: &str) -> Result<(String, String)> {
    match pair.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(CourierError::Config(format!(
            "expected NAME=VALUE, got '{}'",
            pair
        ))),
    }
}
