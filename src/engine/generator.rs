//! Execution planning and dispatch
//!
//! Chooses between local and distributed execution and between batched and
//! unbatched dispatch, then produces the ordered, lazy stream of per-position
//! outcomes. Units are started in input order, up to the concurrency limit,
//! and their results are yielded in that same order regardless of which
//! finishes first.

use super::batch::batch_split;
use super::reprocess::{OnExhausted, Reprocessor};
use super::wrap::{batch_chain, element_chain, TaskFn};
use crate::config::MapOptions;
use crate::error::{MapResult, Outcome};
use crate::pool::WorkerPool;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use std::sync::Arc;
use tracing::debug;

/// Multiplier on pool size for the minimum number of batches
const BATCHES_PER_WORKER: usize = 3;

/// Lazy outcomes plus the follow-up step needed to repair failed batch members
pub struct Generated<P, T, R> {
    pub stream: BoxStream<'static, MapResult<Outcome<T, R>>>,
    pub reprocess: Option<Reprocessor<P, T, R>>,
}

/// How a call will be executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub distributed: bool,
    pub batch_size: usize,
    pub concurrency: usize,
}

impl ExecutionPlan {
    /// Decide the execution mode for `pool` and the requested options
    pub fn for_pool<P: WorkerPool, R>(pool: &P, options: &MapOptions<R>) -> Self {
        let workers = pool.size();
        let no_remote_workers = workers == 0 || (workers == 1 && pool.is_local_only());
        let distributed = options.config.distributed && !no_remote_workers;

        // Batching only pays off when it saves remote dispatches
        let batch_size = if distributed {
            options.config.batch_size
        } else {
            1
        };

        let concurrency = options.config.max_concurrency.unwrap_or(workers).max(1);

        Self {
            distributed,
            batch_size,
            concurrency,
        }
    }

    pub fn is_batched(&self) -> bool {
        self.batch_size > 1
    }
}

/// Build the ordered outcome stream for `input`
///
/// Configuration problems are reported here, before anything is dispatched.
pub fn generate<P, T, R, I>(
    pool: Arc<P>,
    f: TaskFn<T, R>,
    input: I,
    options: &MapOptions<R>,
    on_exhausted: OnExhausted,
) -> MapResult<Generated<P, T, R>>
where
    P: WorkerPool,
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
    I: IntoIterator<Item = T>,
    I::IntoIter: Send + 'static,
{
    options.config.validate()?;
    let plan = ExecutionPlan::for_pool(pool.as_ref(), options);
    debug!(
        "Parallel map plan: distributed={}, batch_size={}, concurrency={}",
        plan.distributed, plan.batch_size, plan.concurrency
    );

    if !plan.is_batched() {
        let element_fn = element_chain(
            &pool,
            f,
            &options.config,
            plan.distributed,
            options.on_error.clone(),
            &options.retry_on,
        );
        let stream = stream::iter(input)
            .map(move |item| element_fn(item))
            .buffered(plan.concurrency)
            .map(Ok)
            .boxed();
        return Ok(Generated {
            stream,
            reprocess: None,
        });
    }

    let min_batch_count = BATCHES_PER_WORKER * pool.size().max(1);
    let batches = batch_split(input, min_batch_count, plan.batch_size)?;

    let handle_errors = options.on_error.is_some() || options.config.retry_count > 0;
    let batch_fn = batch_chain(&pool, Arc::clone(&f), &options.config, handle_errors);
    let stream = stream::iter(batches)
        .map(move |batch| batch_fn(batch))
        .buffered(plan.concurrency)
        .flat_map(|dispatched| {
            let flattened: Vec<MapResult<Outcome<T, R>>> = match dispatched {
                Ok(outcomes) => outcomes.into_iter().map(Ok).collect(),
                Err(fatal) => vec![Err(fatal)],
            };
            stream::iter(flattened)
        })
        .boxed();

    let reprocess = Reprocessor::new(pool, f, options, on_exhausted);
    Ok(Generated {
        stream,
        reprocess: Some(reprocess),
    })
}
