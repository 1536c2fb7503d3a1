//! Function layering
//!
//! Each layer takes a callable and returns a new callable of the same or a
//! richer shape. The generator stacks them to build the single function it
//! hands to the ordered executor:
//!
//! - element mode: `remote -> retry -> on_error -> capture`
//! - batch mode: `capture -> batched -> dispatch_batch`

use crate::config::{ErrorHandler, MapConfig};
use crate::error::{FailedItem, MapError, MapResult, Outcome, TaskError};
use crate::pool::WorkerPool;
use crate::retry::{RetryConfig, RetryExecutor, RetryOn};
use futures::future::BoxFuture;
use futures::{stream, FutureExt, StreamExt, TryFutureExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Element function whose failures are typed
pub type TaskFn<T, R> = Arc<dyn Fn(T) -> BoxFuture<'static, Result<R, TaskError>> + Send + Sync>;

/// Element function that never fails; failures become sentinels
pub type OutcomeFn<T, R> = Arc<dyn Fn(T) -> BoxFuture<'static, Outcome<T, R>> + Send + Sync>;

/// Whole-batch function run on a single worker
pub type LocalBatchFn<T, R> =
    Arc<dyn Fn(Vec<T>) -> BoxFuture<'static, Vec<Outcome<T, R>>> + Send + Sync>;

/// Whole-batch function dispatched through the pool
pub type BatchFn<T, R> =
    Arc<dyn Fn(Vec<T>) -> BoxFuture<'static, MapResult<Vec<Outcome<T, R>>>> + Send + Sync>;

/// Adapt a caller's async function
pub fn task_fn<T, R, F, Fut>(f: F) -> TaskFn<T, R>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    T: 'static,
    R: Send + 'static,
{
    Arc::new(move |item| f(item).map_err(TaskError::from).boxed())
}

/// Run each call on a pool worker; a worker failure becomes `TaskError::Dispatch`
pub fn remote<P, T, R>(pool: Arc<P>, f: TaskFn<T, R>) -> TaskFn<T, R>
where
    P: WorkerPool,
    T: Send + 'static,
    R: Send + 'static,
{
    Arc::new(move |item| {
        let pool = Arc::clone(&pool);
        let job = f(item);
        async move {
            match pool.execute(job).await {
                Ok(result) => result,
                Err(worker_err) => Err(TaskError::Dispatch(worker_err)),
            }
        }
        .boxed()
    })
}

/// Retry failures accepted by `retry_on`, up to `retries` more attempts
pub fn with_retry<T, R>(
    f: TaskFn<T, R>,
    retries: u32,
    max_delay: Duration,
    retry_on: RetryOn,
) -> TaskFn<T, R>
where
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
{
    Arc::new(move |item: T| {
        let f = Arc::clone(&f);
        let retry_on = retry_on.clone();
        async move {
            let executor = RetryExecutor::new(RetryConfig::with_retries(retries, max_delay));
            executor
                .execute_with_retry(
                    || f(item.clone()),
                    |err| retry_on.should_retry(err),
                    "parallel map element",
                )
                .await
        }
        .boxed()
    })
}

/// Replace a failure with the handler's value
pub fn with_error_handler<T, R>(f: TaskFn<T, R>, handler: ErrorHandler<R>) -> TaskFn<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    Arc::new(move |item| {
        let handler = Arc::clone(&handler);
        let call = f(item);
        async move {
            match call.await {
                Ok(value) => Ok(value),
                Err(err) => Ok(handler(err)),
            }
        }
        .boxed()
    })
}

/// Keep the input with its error so the failure stays attributable to its position
pub fn capture_failures<T, R>(f: TaskFn<T, R>) -> OutcomeFn<T, R>
where
    T: Clone + Send + 'static,
    R: Send + 'static,
{
    Arc::new(move |item: T| {
        let call = f(item.clone());
        async move { call.await.map_err(|error| FailedItem::new(item, error)) }.boxed()
    })
}

/// Apply an element function to a whole batch with bounded local concurrency
pub fn batched<T, R>(f: OutcomeFn<T, R>, concurrency: usize) -> LocalBatchFn<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    let concurrency = concurrency.max(1);
    Arc::new(move |batch: Vec<T>| {
        let f = Arc::clone(&f);
        stream::iter(batch)
            .map(move |item| f(item))
            .buffered(concurrency)
            .collect::<Vec<_>>()
            .boxed()
    })
}

/// Run each batch as one job on a pool worker
///
/// If the job itself fails, no element is to blame: with `broadcast_failures`
/// every member gets a sentinel carrying the worker error, otherwise the
/// failure is returned as fatal.
pub fn dispatch_batch<P, T, R>(
    pool: Arc<P>,
    f: LocalBatchFn<T, R>,
    broadcast_failures: bool,
) -> BatchFn<T, R>
where
    P: WorkerPool,
    T: Clone + Send + 'static,
    R: Send + 'static,
{
    Arc::new(move |batch: Vec<T>| {
        let pool = Arc::clone(&pool);
        let members = broadcast_failures.then(|| batch.clone());
        let job = f(batch);
        async move {
            match (pool.execute(job).await, members) {
                (Ok(outcomes), _) => Ok(outcomes),
                (Err(worker_err), Some(members)) => {
                    warn!(
                        "Batch of {} elements lost: {}; marking each as failed",
                        members.len(),
                        worker_err
                    );
                    Ok(members
                        .into_iter()
                        .map(|item| {
                            Err(FailedItem::new(item, TaskError::Dispatch(worker_err.clone())))
                        })
                        .collect())
                }
                (Err(worker_err), None) => Err(MapError::Dispatch(worker_err)),
            }
        }
        .boxed()
    })
}

/// Effective element function for unbatched execution
pub fn element_chain<P, T, R>(
    pool: &Arc<P>,
    f: TaskFn<T, R>,
    config: &MapConfig,
    distributed: bool,
    on_error: Option<ErrorHandler<R>>,
    retry_on: &RetryOn,
) -> OutcomeFn<T, R>
where
    P: WorkerPool,
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
{
    let mut f = f;
    if distributed {
        f = remote(Arc::clone(pool), f);
    }
    if config.retry_count > 0 {
        f = with_retry(
            f,
            config.retry_count,
            config.retry_max_delay,
            retry_on.clone(),
        );
    }
    if let Some(handler) = on_error {
        f = with_error_handler(f, handler);
    }
    capture_failures(f)
}

/// Effective batch function; the handler and retries are applied later by
/// the reprocessor, so element failures are only captured here
pub fn batch_chain<P, T, R>(
    pool: &Arc<P>,
    f: TaskFn<T, R>,
    config: &MapConfig,
    handle_errors: bool,
) -> BatchFn<T, R>
where
    P: WorkerPool,
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
{
    let per_element = capture_failures(f);
    let local = batched(per_element, config.batch_concurrency);
    dispatch_batch(Arc::clone(pool), local, handle_errors)
}
