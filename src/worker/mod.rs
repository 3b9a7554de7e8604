//! Worker module - job dispatch
//!
//! Request jobs are single-use units of work. The [`WorkerPool`] runs them
//! on a fixed set of worker tasks with a bounded queue.

pub mod pool;

pub use pool::{PoolConfig, PoolMetrics, WorkerPool};

use async_trait::async_trait;
use uuid::Uuid;

use crate::types::Result;

/// A unit of work the pool can run once
#[async_trait]
pub trait Job: Send {
    /// Identifier used in logs
    fn id(&self) -> Uuid;

    /// Run the job to completion, consuming it
    async fn run(self: Box<Self>) -> Result<()>;
}
