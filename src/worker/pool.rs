//! In-process worker pool for request jobs
//!
//! - Fixed number of worker tasks sharing one queue
//! - Queue depth bounded by a semaphore
//! - Each submission gets its job's result back over a oneshot channel
//!
//! Jobs carry no pool-level timeout; the upstream client's timeouts bound them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex, Semaphore};
use tracing::{debug, info, warn};

use super::Job;
use crate::types::{CourierError, Result};

/// Job sent to the worker pool
struct PoolRequest {
    job: Box<dyn Job>,
    /// Channel to send the job result back
    response_tx: oneshot::Sender<Result<()>>,
}

/// Configuration for the worker pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker tasks
    pub worker_count: usize,
    /// Maximum queued jobs
    pub max_queue_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            max_queue_size: 1000,
        }
    }
}

/// Job counters
#[derive(Debug, Default)]
pub struct PoolMetrics {
    pub completed: AtomicUsize,
    pub failed: AtomicUsize,
}

impl PoolMetrics {
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }
}

/// In-process pool of job workers
pub struct WorkerPool {
    /// Channel to send jobs to workers
    request_tx: mpsc::Sender<PoolRequest>,
    /// Semaphore to limit queued jobs
    semaphore: Arc<Semaphore>,
    metrics: Arc<PoolMetrics>,
    worker_count: usize,
}

impl WorkerPool {
    /// Create the pool and spawn its workers; must run inside a Tokio runtime
    pub fn new(config: PoolConfig) -> Result<Self> {
        if config.worker_count == 0 {
            return Err(CourierError::Config("worker_count must be at least 1".into()));
        }
        if config.max_queue_size == 0 {
            return Err(CourierError::Config("max_queue_size must be at least 1".into()));
        }

        let (request_tx, request_rx) = mpsc::channel::<PoolRequest>(config.max_queue_size);
        let request_rx = Arc::new(Mutex::new(request_rx));
        let semaphore = Arc::new(Semaphore::new(config.max_queue_size));
        let metrics = Arc::new(PoolMetrics::default());

        for i in 0..config.worker_count {
            let request_rx = Arc::clone(&request_rx);
            let metrics = Arc::clone(&metrics);
            tokio::spawn(async move {
                worker_task(i, request_rx, metrics).await;
            });
        }

        info!("Worker pool started with {} workers", config.worker_count);

        Ok(Self {
            request_tx,
            semaphore,
            metrics,
            worker_count: config.worker_count,
        })
    }

    /// Queue `job` and wait for its result
    pub async fn execute(&self, job: Box<dyn Job>) -> Result<()> {
        let _permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| CourierError::Internal("Pool semaphore closed".into()))?;

        let (response_tx, response_rx) = oneshot::channel();
        self.request_tx
            .send(PoolRequest { job, response_tx })
            .await
            .map_err(|_| CourierError::Internal("Worker pool closed".into()))?;

        response_rx
            .await
            .map_err(|_| CourierError::Internal("Job dropped by worker".into()))?
    }

    /// Free queue slots
    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn metrics(&self) -> &PoolMetrics {
        &self.metrics
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }
}

/// Worker task that runs jobs from the shared queue
async fn worker_task(
    worker_id: usize,
    request_rx: Arc<Mutex<mpsc::Receiver<PoolRequest>>>,
    metrics: Arc<PoolMetrics>,
) {
    debug!("Worker {} starting", worker_id);

    loop {
        let request = {
            let mut rx = request_rx.lock().await;
            match rx.recv().await {
                Some(r) => r,
                None => {
                    debug!("Worker {} shutting down (channel closed)", worker_id);
                    return;
                }
            }
        };

        let job_id = request.job.id();
        debug!("Worker {} running job {}", worker_id, job_id);

        let result = request.job.run().await;
        match &result {
            Ok(()) => {
                metrics.completed.fetch_add(1, Ordering::Relaxed);
                debug!("Worker {} finished job {}", worker_id, job_id);
            }
            Err(e) => {
                metrics.failed.fetch_add(1, Ordering::Relaxed);
                warn!("Worker {} job {} failed: {}", worker_id, job_id, e);
            }
        }

        let _ = request.response_tx.send(result);
    }
}
