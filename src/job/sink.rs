//! Downstream delivery targets
//!
//! Routed body bytes go to a [`DownstreamSink`]; any other routed value is
//! handed to an [`Encoder`] for structured re-emission.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::types::{CourierError, Result};

/// Header-settable, byte-writable destination
#[async_trait]
pub trait DownstreamSink: Send {
    /// Set `name` to `values`, dropping any values already present
    async fn replace_header(&mut self, name: &HeaderName, values: Vec<HeaderValue>);

    /// Write one chunk of body bytes
    async fn write_all(&mut self, chunk: &[u8]) -> std::io::Result<()>;
}

/// Merge `src` into `sink`, one replace per header name
pub async fn merge_headers(sink: &mut dyn DownstreamSink, src: &HeaderMap) {
    for name in src.keys() {
        let values = src.get_all(name).iter().cloned().collect();
        sink.replace_header(name, values).await;
    }
}

#[derive(Debug, Default)]
struct Captured {
    headers: HeaderMap,
    body: BytesMut,
}

/// In-memory sink; clones observe the same content
#[derive(Debug, Clone, Default)]
pub struct BufferedSink {
    inner: Arc<Mutex<Captured>>,
}

impl BufferedSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Headers set so far
    pub async fn headers(&self) -> HeaderMap {
        self.inner.lock().await.headers.clone()
    }

    /// Body bytes written so far
    pub async fn body(&self) -> Bytes {
        Bytes::copy_from_slice(&self.inner.lock().await.body)
    }
}

#[async_trait]
impl DownstreamSink for BufferedSink {
    async fn replace_header(&mut self, name: &HeaderName, values: Vec<HeaderValue>) {
        let mut captured = self.inner.lock().await;
        captured.headers.remove(name);
        for value in values {
            captured.headers.append(name.clone(), value);
        }
    }

    async fn write_all(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        self.inner.lock().await.body.extend_from_slice(chunk);
        Ok(())
    }
}

/// Sink over any async writer (stdout, a file, a socket)
///
/// Headers are kept locally since a raw writer has nowhere to put them.
#[derive(Debug)]
pub struct WriterSink<W> {
    writer: W,
    headers: HeaderMap,
}

impl<W: AsyncWrite + Unpin + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            headers: HeaderMap::new(),
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> DownstreamSink for WriterSink<W> {
    async fn replace_header(&mut self, name: &HeaderName, values: Vec<HeaderValue>) {
        self.headers.remove(name);
        for value in values {
            self.headers.append(name.clone(), value);
        }
    }

    async fn write_all(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(chunk).await?;
        self.writer.flush().await
    }
}

/// Structured re-emission of non-body routed values
pub trait Encoder: Send {
    fn encode(&mut self, value: &str) -> Result<()>;
}

/// Writes each value as a JSON string on its own line
#[derive(Debug)]
pub struct JsonLinesEncoder<W> {
    writer: W,
}

impl<W: Write + Send> JsonLinesEncoder<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> Encoder for JsonLinesEncoder<W> {
    fn encode(&mut self, value: &str) -> Result<()> {
        serde_json::to_writer(&mut self.writer, value)
            .map_err(|e| CourierError::Encode(e.to_string()))?;
        self.writer
            .write_all(b"\n")
            .and_then(|_| self.writer.flush())
            .map_err(|e| CourierError::Encode(e.to_string()))
    }
}
