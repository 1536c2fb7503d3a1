//! Failed-position reprocessing
//!
//! After a batched run is collected, positions holding a [`FailedItem`] are
//! retried element by element while budget remains and every failure is
//! retryable; otherwise the error handler supplies replacements. Recovered
//! values are written back at their original positions.

use super::collector::collect;
use super::generator::generate;
use super::wrap::TaskFn;
use crate::config::{ErrorHandler, MapConfig, MapOptions};
use crate::error::{AggregateError, FailedItem, MapError, MapResult, Outcome, TaskError};
use crate::pool::WorkerPool;
use crate::retry::RetryOn;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use tracing::{info, warn};

/// What to do with failures that survive retries when there is no handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnExhausted {
    /// Abort the call with an aggregate of all remaining errors
    Fail,
    /// Leave the failures in place for the caller
    Keep,
}

pub struct Reprocessor<P, T, R> {
    pool: Arc<P>,
    f: TaskFn<T, R>,
    config: MapConfig,
    on_error: Option<ErrorHandler<R>>,
    retry_on: RetryOn,
    on_exhausted: OnExhausted,
}

impl<P, T, R> Reprocessor<P, T, R>
where
    P: WorkerPool,
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
{
    pub fn new(
        pool: Arc<P>,
        f: TaskFn<T, R>,
        options: &MapOptions<R>,
        on_exhausted: OnExhausted,
    ) -> Self {
        Self {
            pool,
            f,
            config: options.config.clone(),
            on_error: options.on_error.clone(),
            retry_on: options.retry_on.clone(),
            on_exhausted,
        }
    }

    /// Repair failed positions of `results` in place
    ///
    /// Positions that did not fail are never touched.
    pub fn run<'a>(&'a self, results: &'a mut Vec<Outcome<T, R>>) -> BoxFuture<'a, MapResult<()>> {
        async move {
            let failed = failed_positions(results);
            if failed.is_empty() {
                return Ok(());
            }

            let retries_left = self.config.retry_count;
            let all_retryable = failed
                .iter()
                .all(|(_, failure)| self.retry_on.should_retry(&failure.error));

            if retries_left > 0 && all_retryable {
                info!(
                    "Retrying {} failed element(s), {} retr{} left",
                    failed.len(),
                    retries_left,
                    if retries_left == 1 { "y" } else { "ies" }
                );
                let positions: Vec<usize> = failed.iter().map(|(idx, _)| *idx).collect();
                let items: Vec<T> = failed.into_iter().map(|(_, failure)| failure.item).collect();

                let options = MapOptions {
                    config: MapConfig {
                        batch_size: 1,
                        retry_count: retries_left - 1,
                        ..self.config.clone()
                    },
                    on_error: self.on_error.clone(),
                    retry_on: self.retry_on.clone(),
                };
                let generated = generate(
                    Arc::clone(&self.pool),
                    Arc::clone(&self.f),
                    items,
                    &options,
                    self.on_exhausted,
                )?;
                let retried = collect(generated).await?;
                splice(results, &positions, retried);
            } else if let Some(handler) = &self.on_error {
                info!("Applying error handler to {} failed element(s)", failed.len());
                let positions: Vec<usize> = failed.iter().map(|(idx, _)| *idx).collect();
                let replacements = failed
                    .into_iter()
                    .map(|(_, failure)| Ok(handler(failure.error)))
                    .collect();
                splice(results, &positions, replacements);
            }

            if self.on_exhausted == OnExhausted::Fail {
                let remaining: Vec<(usize, TaskError)> = failed_positions(results)
                    .into_iter()
                    .map(|(idx, failure)| (idx, failure.error))
                    .collect();
                if !remaining.is_empty() {
                    warn!("{} element(s) could not be recovered", remaining.len());
                    return Err(MapError::Aggregate(AggregateError::new(remaining)));
                }
            }
            Ok(())
        }
        .boxed()
    }
}

fn failed_positions<T: Clone, R>(results: &[Outcome<T, R>]) -> Vec<(usize, FailedItem<T>)> {
    results
        .iter()
        .enumerate()
        .filter_map(|(idx, outcome)| outcome.as_ref().err().map(|f| (idx, f.clone())))
        .collect()
}

/// Write `replacements[i]` to `results[positions[i]]`
fn splice<T, R>(
    results: &mut [Outcome<T, R>],
    positions: &[usize],
    replacements: Vec<Outcome<T, R>>,
) {
    for (&idx, replacement) in positions.iter().zip(replacements) {
        if let Some(slot) = results.get_mut(idx) {
            *slot = replacement;
        }
    }
}
