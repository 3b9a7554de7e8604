//! Logging setup for the courier binary and embedding hosts

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::types::{CourierError, Result};

/// Default filter: `level` for this crate, `info` for dependencies
pub fn default_filter(level: &str) -> String {
    format!("courier={},info", level)
}

/// Install the global subscriber
///
/// `RUST_LOG` wins over `level` when set. With `json` the output is one
/// JSON object per event, otherwise the plain `fmt` format. Events go to
/// stderr so stdout stays free for delivered output.
pub fn init(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level).into());
    let registry = tracing_subscriber::registry().with(filter);

    let result = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| CourierError::Config(format!("logging already initialized: {}", e)))
}
