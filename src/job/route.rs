//! Per-chunk response routing
//!
//! A job hands every upstream header value, then the body, to a
//! [`ChunkHandler`]. [`RouteHandler`] is the standard one: it selects the
//! chunk named by the job's [`OutputRoute`] and finalizes the downstream
//! sink once the body has gone by.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use super::sink::{merge_headers, DownstreamSink, Encoder};
use crate::types::{CourierError, Result};

/// Reserved chunk key for the response body, also the body sink name
pub const BODY_KEY: &str = "body";

/// Finalizer run once the body chunk has been processed
pub type Finalizer = Box<dyn FnOnce() -> Result<()> + Send>;

/// Which response part a job delivers, and where
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRoute {
    /// `"body"` or a response header name
    pub key: String,
    /// `"body"` for the downstream sink, anything else for the encoder
    pub name: String,
}

impl OutputRoute {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
        }
    }

    /// Route the response body to the downstream sink
    pub fn body() -> Self {
        Self::new(BODY_KEY, BODY_KEY)
    }

    /// Header names compare case-insensitively
    pub fn matches(&self, key: &str) -> bool {
        self.key.eq_ignore_ascii_case(key)
    }

    fn to_sink(&self) -> bool {
        self.name == BODY_KEY
    }
}

/// One part of an upstream response
pub enum Chunk<'a> {
    /// A single header value
    Value(Option<Bytes>),
    /// The response body, streamed
    Body(&'a mut reqwest::Response),
}

impl<'a> Chunk<'a> {
    pub fn value(bytes: impl Into<Bytes>) -> Self {
        Self::Value(Some(bytes.into()))
    }

    /// Next piece of the chunk, `None` when exhausted
    pub async fn next_bytes(&mut self) -> Result<Option<Bytes>> {
        match self {
            Self::Value(value) => Ok(value.take()),
            Self::Body(response) => response
                .chunk()
                .await
                .map_err(|e| CourierError::CopyFailure(format!("reading upstream body: {}", e))),
        }
    }

    /// Whole chunk in memory
    pub async fn read_all(mut self) -> Result<Bytes> {
        let mut data = BytesMut::new();
        while let Some(bytes) = self.next_bytes().await? {
            data.extend_from_slice(&bytes);
        }
        Ok(data.freeze())
    }
}

/// Receives the parts of an upstream response in order: header values, then body
#[async_trait]
pub trait ChunkHandler: Send {
    /// `headers` is the full response header map for the body chunk, `None` otherwise
    async fn handle(&mut self, key: &str, chunk: Chunk<'_>, headers: Option<&HeaderMap>)
        -> Result<()>;
}

/// Standard handler built for each request job
pub struct RouteHandler {
    route: OutputRoute,
    sink: Box<dyn DownstreamSink>,
    encoder: Box<dyn Encoder>,
    close: Option<Finalizer>,
}

impl RouteHandler {
    pub fn new(
        route: OutputRoute,
        sink: Box<dyn DownstreamSink>,
        encoder: Box<dyn Encoder>,
        close: Finalizer,
    ) -> Self {
        Self {
            route,
            sink,
            encoder,
            close: Some(close),
        }
    }

    /// Run the close finalizer if it has not run yet
    fn finish(&mut self) {
        if let Some(close) = self.close.take() {
            if let Err(e) = close() {
                warn!("Downstream close failed: {}", e);
            }
        }
    }

    async fn route(
        &mut self,
        key: &str,
        mut chunk: Chunk<'_>,
        headers: Option<&HeaderMap>,
    ) -> Result<()> {
        if !self.route.matches(key) {
            return Ok(());
        }

        debug!("Routing '{}' to '{}'", key, self.route.name);

        if self.route.to_sink() {
            if let Some(headers) = headers {
                merge_headers(self.sink.as_mut(), headers).await;
            }

            debug!("Starting to write body");
            let mut written = 0usize;
            while let Some(bytes) = chunk.next_bytes().await? {
                if let Err(e) = self.sink.write_all(&bytes).await {
                    error!("Could not write body: {}", e);
                    return Err(CourierError::CopyFailure(e.to_string()));
                }
                written += bytes.len();
            }
            debug!("Ended body write ({} bytes)", written);
            return Ok(());
        }

        let data = chunk.read_all().await?;
        let value = String::from_utf8_lossy(&data);
        debug!("Encoding routed value for '{}'", self.route.name);
        self.encoder.encode(&value).map_err(|e| {
            error!("Could not encode '{}': {}", key, e);
            e
        })
    }
}

#[async_trait]
impl ChunkHandler for RouteHandler {
    async fn handle(
        &mut self,
        key: &str,
        chunk: Chunk<'_>,
        headers: Option<&HeaderMap>,
    ) -> Result<()> {
        let result = self.route(key, chunk, headers).await;
        if key == BODY_KEY {
            // The body is always last: finalize the sink whether or not it matched
            self.finish();
        }
        result
    }
}
