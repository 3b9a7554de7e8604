//! Typed request context
//!
//! Values are stored as [`ContextValue`] variants. Consumers ask for the
//! capability they need (readable source, writable destination, auth) and
//! get a typed error when the stored value does not have it.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::Mutex;

use super::buffer::{Pipe, PipeWriter};
use crate::signing::AuthParams;
use crate::types::{CourierError, Result};

/// Well-known context keys
pub mod keys {
    /// Resolved node, JSON bytes in a pipe
    pub const NODE: &str = "node";
    /// Auth parameters for signing upstream requests
    pub const AUTH: &str = "auth";
}

/// A pipe shared between the task that stores it and its readers
pub type SharedPipe = Arc<Mutex<Pipe>>;

/// Growable in-memory destination
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `data`
    pub async fn write_all(&self, data: &[u8]) {
        self.inner.lock().await.extend_from_slice(data);
    }

    /// Snapshot of the bytes written so far
    pub async fn contents(&self) -> Bytes {
        Bytes::copy_from_slice(&self.inner.lock().await)
    }
}

/// A value stored in the request context
#[derive(Debug, Clone)]
pub enum ContextValue {
    /// Readable byte source
    Pipe(SharedPipe),
    /// Writable producer end of another pipe
    Writer(PipeWriter),
    /// Writable in-memory buffer
    Buffer(SharedBuffer),
    /// Auth parameters for upstream requests
    Auth(AuthParams),
    /// Plain text, neither readable nor writable
    Text(String),
}

/// Writable side resolved from a [`ContextValue`]
#[derive(Debug)]
pub(crate) enum Destination {
    Writer(PipeWriter),
    Buffer(SharedBuffer),
}

impl Destination {
    pub(crate) async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Writer(writer) => {
                writer.write(data).await?;
            }
            Self::Buffer(buffer) => buffer.write_all(data).await,
        }
        Ok(())
    }
}

impl ContextValue {
    /// Wrap a pipe for storage
    pub fn pipe(pipe: Pipe) -> Self {
        Self::Pipe(Arc::new(Mutex::new(pipe)))
    }

    /// Variant name, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Pipe(_) => "pipe",
            Self::Writer(_) => "writer",
            Self::Buffer(_) => "buffer",
            Self::Auth(_) => "auth",
            Self::Text(_) => "text",
        }
    }

    /// The readable source behind this value
    pub fn readable(&self, key: &str) -> Result<SharedPipe> {
        match self {
            Self::Pipe(pipe) => Ok(Arc::clone(pipe)),
            _ => Err(CourierError::NotReadable(key.to_string())),
        }
    }

    pub(crate) fn writable(&self, key: &str) -> Result<Destination> {
        match self {
            Self::Writer(writer) => Ok(Destination::Writer(writer.clone())),
            Self::Buffer(buffer) => Ok(Destination::Buffer(buffer.clone())),
            _ => Err(CourierError::NotWritable(key.to_string())),
        }
    }
}

/// Concurrent keyed store shared by a request's producers and jobs
#[derive(Debug, Default)]
pub struct ContextStore {
    values: DashMap<String, ContextValue>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, returning the previous value
    pub fn insert(&self, key: impl Into<String>, value: ContextValue) -> Option<ContextValue> {
        self.values.insert(key.into(), value)
    }

    /// Clone of the value stored under `key`
    pub fn get(&self, key: &str) -> Option<ContextValue> {
        self.values.get(key).map(|entry| entry.value().clone())
    }

    /// Remove and return the value under `key`
    pub fn remove(&self, key: &str) -> Option<ContextValue> {
        self.values.remove(key).map(|(_, value)| value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Auth parameters stored under [`keys::AUTH`]
    pub fn auth_params(&self) -> Result<AuthParams> {
        match self.get(keys::AUTH) {
            Some(ContextValue::Auth(params)) => Ok(params),
            Some(other) => Err(CourierError::SigningUnavailable(format!(
                "context value '{}' is a {}, not auth parameters",
                keys::AUTH,
                other.kind()
            ))),
            None => Err(CourierError::SigningUnavailable(
                "no auth parameters in context".into(),
            )),
        }
    }
}
