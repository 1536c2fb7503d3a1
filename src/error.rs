//! Structured error types for parallel map operations
//!
//! Separates failures that belong to a single input element from failures of
//! the worker that was running it, and provides the aggregate error raised when
//! failed positions could not be recovered.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Main error type returned by the engine entry points
#[derive(Debug, Error)]
pub enum MapError {
    /// Rejected before any work was dispatched
    #[error("Invalid parallel map configuration: {field} = {value}: {reason}")]
    InvalidConfiguration {
        field: String,
        value: String,
        reason: String,
    },

    /// A single element failed and nothing recovered it
    #[error("Task failed: {0}")]
    Task(#[source] TaskError),

    /// A batch could not be executed and errors are not being handled
    #[error("Batch dispatch failed: {0}")]
    Dispatch(#[source] WorkerError),

    /// Failed positions remained after retries with no error handler
    #[error(transparent)]
    Aggregate(AggregateError),
}

impl MapError {
    pub(crate) fn invalid(field: &str, value: impl fmt::Display, reason: &str) -> Self {
        MapError::InvalidConfiguration {
            field: field.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Returns the aggregate failure, if this is one
    pub fn as_aggregate(&self) -> Option<&AggregateError> {
        match self {
            MapError::Aggregate(aggregate) => Some(aggregate),
            _ => None,
        }
    }
}

/// Result alias for engine operations
pub type MapResult<T> = Result<T, MapError>;

/// The error that caused one element to fail
///
/// Cloneable so that a single worker failure can be attributed to every
/// member of the batch that worker was running.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// The mapped function returned an error for this element
    #[error("{0:#}")]
    Element(Arc<anyhow::Error>),

    /// The worker executing this element (or its batch) failed
    #[error("{0}")]
    Dispatch(WorkerError),
}

impl TaskError {
    /// True when the failure came from the worker rather than the function
    pub fn is_dispatch(&self) -> bool {
        matches!(self, TaskError::Dispatch(_))
    }

    /// Borrow the underlying function error, if any
    pub fn element_error(&self) -> Option<&anyhow::Error> {
        match self {
            TaskError::Element(err) => Some(err.as_ref()),
            TaskError::Dispatch(_) => None,
        }
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        TaskError::Element(Arc::new(err))
    }
}

impl From<WorkerError> for TaskError {
    fn from(err: WorkerError) -> Self {
        TaskError::Dispatch(err)
    }
}

/// Failure of a worker to run a job to completion
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkerError {
    #[error("worker {worker} panicked: {message}")]
    Panicked { worker: usize, message: String },

    #[error("worker pool is closed")]
    Closed,

    #[error("worker {worker} was lost: {reason}")]
    Lost { worker: usize, reason: String },
}

/// Sentinel standing in for the result of an element that could not be computed
///
/// Occupies the position the real result would have had, so the result
/// collection stays aligned with the input.
#[derive(Debug, Clone)]
pub struct FailedItem<T> {
    /// The original input element
    pub item: T,
    /// What went wrong
    pub error: TaskError,
}

impl<T> FailedItem<T> {
    pub fn new(item: T, error: TaskError) -> Self {
        Self { item, error }
    }
}

impl<T> fmt::Display for FailedItem<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "element failed: {}", self.error)
    }
}

/// Per-position result: the computed value or the failure sentinel
pub type Outcome<T, R> = Result<R, FailedItem<T>>;

/// Every unrecovered failure of a call, keyed by input position
#[derive(Debug, Clone)]
pub struct AggregateError {
    failures: Vec<(usize, TaskError)>,
}

impl AggregateError {
    pub fn new(failures: Vec<(usize, TaskError)>) -> Self {
        Self { failures }
    }

    /// Failed input positions with their causing errors, in input order
    pub fn failures(&self) -> &[(usize, TaskError)] {
        &self.failures
    }

    /// Causing errors only
    pub fn errors(&self) -> impl Iterator<Item = &TaskError> {
        self.failures.iter().map(|(_, err)| err)
    }

    /// Failed input positions only
    pub fn positions(&self) -> Vec<usize> {
        self.failures.iter().map(|(idx, _)| *idx).collect()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.failures.first() {
            Some((idx, first)) => write!(
                f,
                "{} element(s) failed; first at position {}: {}",
                self.failures.len(),
                idx,
                first
            ),
            None => write!(f, "0 elements failed"),
        }
    }
}

impl std::error::Error for AggregateError {}
