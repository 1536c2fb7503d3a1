//! Parallel map engine
//!
//! Applies an async function to every input element using a [`WorkerPool`],
//! returning results in input order.
//!
//! - `batch` - splitting input into dispatch batches
//! - `wrap` - layering retry, error handling and batching onto the function
//! - `generator` - choosing the execution mode and producing ordered outcomes
//! - `collector` - forcing outcomes into a collection
//! - `reprocess` - retrying or replacing failed positions in place
//!
//! # Example
//!
//! ```ignore
//! let pool = Arc::new(LocalPool::new(4));
//! let options = MapOptions::new().with_batch_size(8).on_error(|_| -1);
//! let squares = parallel_map(pool, |x: i64| async move { Ok::<_, anyhow::Error>(x * x) }, 0..100, options).await?;
//! ```

pub mod batch;
pub mod collector;
pub mod generator;
pub mod reprocess;
pub mod wrap;

pub use batch::{batch_split, BatchSplit};
pub use generator::ExecutionPlan;

use crate::config::MapOptions;
use crate::error::{MapError, MapResult, Outcome};
use crate::pool::{default_pool, WorkerPool};
use futures::stream::BoxStream;
use futures::StreamExt;
use reprocess::OnExhausted;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

/// Map `f` over `input` and return every result in input order
///
/// Fails with [`MapError::Aggregate`] if any position could not be computed
/// or recovered; successful results are discarded in that case. With an
/// `on_error` handler every position is filled and element failures never
/// cause an error.
pub async fn parallel_map<P, T, R, F, Fut, I>(
    pool: Arc<P>,
    f: F,
    input: I,
    options: MapOptions<R>,
) -> MapResult<Vec<R>>
where
    P: WorkerPool,
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    I: IntoIterator<Item = T>,
    I::IntoIter: Send + 'static,
{
    let generated = generator::generate(
        pool,
        wrap::task_fn(f),
        input,
        &options,
        OnExhausted::Fail,
    )?;
    let outcomes = collector::collect(generated).await?;
    let values = collector::into_values(outcomes)?;
    info!("Parallel map completed: {} results", values.len());
    Ok(values)
}

/// [`parallel_map`] on the process-wide default pool
pub async fn parallel_map_with_default_pool<T, R, F, Fut, I>(
    f: F,
    input: I,
    options: MapOptions<R>,
) -> MapResult<Vec<R>>
where
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    I: IntoIterator<Item = T>,
    I::IntoIter: Send + 'static,
{
    parallel_map(default_pool(), f, input, options).await
}

/// Like [`parallel_map`], but positions that still fail after retries and
/// without a handler are returned as `Err(FailedItem)` instead of aborting
pub async fn parallel_map_outcomes<P, T, R, F, Fut, I>(
    pool: Arc<P>,
    f: F,
    input: I,
    options: MapOptions<R>,
) -> MapResult<Vec<Outcome<T, R>>>
where
    P: WorkerPool,
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    I: IntoIterator<Item = T>,
    I::IntoIter: Send + 'static,
{
    let generated = generator::generate(
        pool,
        wrap::task_fn(f),
        input,
        &options,
        OnExhausted::Keep,
    )?;
    let outcomes = collector::collect(generated).await?;
    let failed = outcomes.iter().filter(|o| o.is_err()).count();
    info!(
        "Parallel map completed: {} results, {} failed",
        outcomes.len(),
        failed
    );
    Ok(outcomes)
}

/// Lazily map `f` over `input`
///
/// Results arrive in input order as the stream is polled. A failed position
/// yields `Err(MapError::Task)` at that position; a batch lost without error
/// handling yields `Err(MapError::Dispatch)` and ends the stream. Failed batch
/// members are not retried here, since that needs the whole collection; use
/// [`parallel_map`] for that.
pub fn parallel_generate<P, T, R, F, Fut, I>(
    pool: Arc<P>,
    f: F,
    input: I,
    options: MapOptions<R>,
) -> MapResult<BoxStream<'static, MapResult<R>>>
where
    P: WorkerPool,
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    I: IntoIterator<Item = T>,
    I::IntoIter: Send + 'static,
{
    let generated = generator::generate(
        pool,
        wrap::task_fn(f),
        input,
        &options,
        OnExhausted::Fail,
    )?;
    if generated.reprocess.is_some() {
        debug!("Lazy parallel map: failed batch members are reported, not reprocessed");
    }

    let mut failed = false;
    let stream = generated
        .stream
        .take_while(move |item| {
            // Stop after the first fatal error
            let keep = !failed;
            failed |= matches!(item, Err(MapError::Dispatch(_)));
            futures::future::ready(keep)
        })
        .map(|item| {
            item.and_then(|outcome| outcome.map_err(|sentinel| MapError::Task(sentinel.error)))
        })
        .boxed();
    Ok(stream)
}
