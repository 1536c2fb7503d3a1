//! Result collection

use super::generator::Generated;
use crate::error::{AggregateError, MapError, MapResult, Outcome};
use crate::pool::WorkerPool;
use futures::TryStreamExt;
use tracing::debug;

/// Drive the stream to completion, then repair failed positions if needed
///
/// A fatal stream error stops consumption immediately.
pub async fn collect<P, T, R>(generated: Generated<P, T, R>) -> MapResult<Vec<Outcome<T, R>>>
where
    P: WorkerPool,
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
{
    let Generated { stream, reprocess } = generated;
    let mut results: Vec<Outcome<T, R>> = stream.try_collect().await?;
    debug!("Collected {} results", results.len());

    if let Some(reprocessor) = reprocess {
        reprocessor.run(&mut results).await?;
    }
    Ok(results)
}

/// Unwrap every position, or fail with all remaining failures
pub fn into_values<T, R>(outcomes: Vec<Outcome<T, R>>) -> MapResult<Vec<R>> {
    let mut values = Vec::with_capacity(outcomes.len());
    let mut failures = Vec::new();

    for (idx, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(value) => values.push(value),
            Err(failed) => failures.push((idx, failed.error)),
        }
    }

    if failures.is_empty() {
        Ok(values)
    } else {
        Err(MapError::Aggregate(AggregateError::new(failures)))
    }
}
