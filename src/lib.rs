//! # Fanout
//!
//! Order-preserving parallel map over a pool of workers, with batching to
//! amortize dispatch cost, retries for transient failures, and per-element
//! error recovery.
//!
//! ## Usage
//!
//! ```ignore
//! use fanout::{parallel_map, LocalPool, MapOptions};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let pool = Arc::new(LocalPool::new(8));
//! let words = vec!["12".to_string(), "x".to_string(), "7".to_string()];
//! let options = MapOptions::new()
//!     .with_batch_size(16)
//!     .with_retry(2, Duration::from_secs(1))
//!     .on_error(|_| None);
//! let parsed = parallel_map(
//!     pool,
//!     |word: String| async move { Ok::<_, anyhow::Error>(Some(word.parse::<u32>()?)) },
//!     words,
//!     options,
//! )
//! .await?;
//! assert_eq!(parsed, vec![Some(12), None, Some(7)]);
//! ```
//!
//! ## Modules
//!
//! - `config` - Per-call options and engine-wide settings
//! - `engine` - Batch planning, function layering, ordered dispatch and error reprocessing
//! - `error` - Error types and the failure sentinel carried through results
//! - `logging` - Tracing subscriber setup
//! - `pool` - Worker pool abstraction and the in-process pool
//! - `retry` - Retry executor, backoff and retry predicates
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod pool;
pub mod retry;

pub use config::{MapConfig, MapOptions, Settings};
pub use engine::{
    batch_split, parallel_generate, parallel_map, parallel_map_outcomes,
    parallel_map_with_default_pool,
};
pub use error::{AggregateError, FailedItem, MapError, MapResult, Outcome, TaskError, WorkerError};
pub use pool::{default_pool, init_default_pool, LocalPool, WorkerPool};
pub use retry::{ErrorMatcher, RetryOn};
