//! Per-call options for the parallel map engine

use super::settings::Settings;
use crate::error::{MapError, MapResult, TaskError};
use crate::retry::RetryOn;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Replacement value for an element that could not be computed
pub type ErrorHandler<R> = Arc<dyn Fn(TaskError) -> R + Send + Sync>;

/// Serializable part of the options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapConfig {
    /// Dispatch to pool workers; `false` runs everything on the calling task
    #[serde(default = "default_distributed")]
    pub distributed: bool,

    /// Maximum number of elements sent to a worker as one unit
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// How many times a failed element may be attempted again
    #[serde(default)]
    pub retry_count: u32,

    /// Cap on the delay before any retry
    #[serde(default, with = "humantime_serde")]
    pub retry_max_delay: Duration,

    /// Elements of one batch run concurrently on its worker, up to this many
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,

    /// Units in flight at once; defaults to the pool size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            distributed: default_distributed(),
            batch_size: default_batch_size(),
            retry_count: 0,
            retry_max_delay: Duration::ZERO,
            batch_concurrency: default_batch_concurrency(),
            max_concurrency: None,
        }
    }
}

impl MapConfig {
    /// Reject values the engine cannot work with
    pub fn validate(&self) -> MapResult<()> {
        if self.batch_size < 1 {
            return Err(MapError::invalid(
                "batch_size",
                self.batch_size,
                "must be at least 1",
            ));
        }
        if self.batch_concurrency < 1 {
            return Err(MapError::invalid(
                "batch_concurrency",
                self.batch_concurrency,
                "must be at least 1",
            ));
        }
        if let Some(0) = self.max_concurrency {
            return Err(MapError::invalid(
                "max_concurrency",
                0,
                "must be at least 1 when set",
            ));
        }
        Ok(())
    }
}

fn default_distributed() -> bool {
    true
}

fn default_batch_size() -> usize {
    1
}

fn default_batch_concurrency() -> usize {
    100
}

/// Options for one parallel map call
pub struct MapOptions<R> {
    pub config: MapConfig,
    /// Produces a value for positions that failed for good
    pub on_error: Option<ErrorHandler<R>>,
    /// Which failures are retried while budget remains
    pub retry_on: RetryOn,
}

impl<R> MapOptions<R> {
    pub fn new() -> Self {
        Self::from_config(MapConfig::default())
    }

    pub fn from_config(config: MapConfig) -> Self {
        Self {
            config,
            on_error: None,
            retry_on: RetryOn::default(),
        }
    }

    /// Start from the engine-wide defaults
    pub fn from_settings(settings: &Settings) -> Self {
        Self::from_config(settings.defaults.clone())
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    /// Allow `count` retries, waiting at most `max_delay` between attempts
    pub fn with_retry(mut self, count: u32, max_delay: Duration) -> Self {
        self.config.retry_count = count;
        self.config.retry_max_delay = max_delay;
        self
    }

    pub fn retry_on(mut self, retry_on: RetryOn) -> Self {
        self.retry_on = retry_on;
        self
    }

    pub fn on_error<H>(mut self, handler: H) -> Self
    where
        H: Fn(TaskError) -> R + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(handler));
        self
    }

    /// Run on the calling task instead of dispatching to workers
    pub fn local_only(mut self) -> Self {
        self.config.distributed = false;
        self
    }

    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.config.max_concurrency = Some(limit);
        self
    }

    pub fn with_batch_concurrency(mut self, limit: usize) -> Self {
        self.config.batch_concurrency = limit;
        self
    }
}

impl<R> Default for MapOptions<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Clone for MapOptions<R> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            on_error: self.on_error.clone(),
            retry_on: self.retry_on.clone(),
        }
    }
}

impl<R> fmt::Debug for MapOptions<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapOptions")
            .field("config", &self.config)
            .field("on_error", &self.on_error.as_ref().map(|_| ".."))
            .field("retry_on", &self.retry_on)
            .finish()
    }
}
