//! In-process worker pool backed by tokio tasks

use super::WorkerPool;
use crate::error::WorkerError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tracing::{trace, warn};

/// Pool of `workers` tokio tasks, each running one job at a time
///
/// A job that panics is reported as [`WorkerError::Panicked`] for the worker
/// that ran it; the worker slot is returned to the pool afterwards.
pub struct LocalPool {
    workers: usize,
    inline: bool,
    /// Limits the number of jobs running at once
    semaphore: Arc<Semaphore>,
    /// Ids of idle workers
    idle: Mutex<VecDeque<usize>>,
    dispatched: AtomicUsize,
}

impl LocalPool {
    /// Create a pool with `workers` workers (at least one)
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            workers,
            inline: false,
            semaphore: Arc::new(Semaphore::new(workers)),
            idle: Mutex::new((1..=workers).collect()),
            dispatched: AtomicUsize::new(0),
        }
    }

    /// A single-worker pool whose worker is the calling task itself
    ///
    /// Jobs run in place instead of being spawned.
    pub fn inline() -> Self {
        Self {
            inline: true,
            ..Self::new(1)
        }
    }

    /// Total jobs handed to a worker so far
    pub fn dispatched(&self) -> usize {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Stop accepting jobs; later calls to `execute` fail with `Closed`
    pub fn close(&self) {
        self.semaphore.close();
    }

    fn checkout(&self) -> usize {
        let mut idle = match self.idle.lock() {
            Ok(idle) => idle,
            Err(poisoned) => poisoned.into_inner(),
        };
        // A permit was acquired, so an id is free
        idle.pop_front().unwrap_or(0)
    }

    fn checkin(&self, worker: usize) {
        let mut idle = match self.idle.lock() {
            Ok(idle) => idle,
            Err(poisoned) => poisoned.into_inner(),
        };
        idle.push_back(worker);
    }
}

#[async_trait]
impl WorkerPool for LocalPool {
    fn size(&self) -> usize {
        self.workers
    }

    fn is_local_only(&self) -> bool {
        self.inline
    }

    async fn execute<T>(&self, job: BoxFuture<'static, T>) -> Result<T, WorkerError>
    where
        T: Send + 'static,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| WorkerError::Closed)?;
        let worker = self.checkout();
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        trace!("Dispatching job to worker {}", worker);

        let result = if self.inline {
            Ok(job.await)
        } else {
            tokio::spawn(job).await.map_err(|e| {
                let message = if e.is_panic() {
                    panic_message(e.into_panic())
                } else {
                    "task cancelled".to_string()
                };
                warn!("Worker {} failed: {}", worker, message);
                WorkerError::Panicked { worker, message }
            })
        };

        self.checkin(worker);
        result
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
