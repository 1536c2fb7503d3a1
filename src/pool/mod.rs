//! Worker pool abstraction
//!
//! The engine only needs to know how many workers a pool has, whether the
//! pool is just the calling process, and how to run a job on one of its
//! workers. Anything that can do those three things can back a parallel map.

mod local;

pub use local::LocalPool;

use crate::config::Settings;
use crate::error::WorkerError;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use once_cell::sync::OnceCell;
use std::sync::Arc;
use tracing::debug;

/// A set of execution contexts that can run a job and report its outcome
#[async_trait]
pub trait WorkerPool: Send + Sync + 'static {
    /// Number of workers available for dispatch
    fn size(&self) -> usize;

    /// True when the only worker is the calling process itself
    fn is_local_only(&self) -> bool;

    /// Run `job` on an available worker, waiting for one if all are busy
    ///
    /// Returns the job's output, or the reason the worker could not produce it.
    async fn execute<T>(&self, job: BoxFuture<'static, T>) -> Result<T, WorkerError>
    where
        T: Send + 'static;
}

static DEFAULT_POOL: OnceCell<Arc<LocalPool>> = OnceCell::new();

/// Bind the process-wide default pool
///
/// Fails if the default pool was already created, either by an earlier call
/// or by a first use of [`default_pool`].
pub fn init_default_pool(pool: LocalPool) -> Result<Arc<LocalPool>> {
    let pool = Arc::new(pool);
    DEFAULT_POOL
        .set(Arc::clone(&pool))
        .map_err(|_| anyhow!("default worker pool is already initialized"))?;
    debug!("Bound default worker pool with {} workers", pool.size());
    Ok(pool)
}

/// The process-wide default pool, created from [`Settings::load`] on first use
pub fn default_pool() -> Arc<LocalPool> {
    Arc::clone(DEFAULT_POOL.get_or_init(|| {
        let workers = Settings::load()
            .ok()
            .and_then(|settings| settings.workers)
            .unwrap_or_else(default_worker_count);
        debug!("Creating default worker pool with {} workers", workers);
        Arc::new(LocalPool::new(workers))
    }))
}

/// Worker count used when nothing is configured
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
