//! Retry execution with exponential backoff
//!
//! Provides the retry executor used by the retry layer of the function chain,
//! the error matchers behind the default retry set, and the `RetryOn`
//! predicate callers use to decide which failures are worth another attempt.

use crate::error::TaskError;
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Retry configuration
///
/// Delays grow as `initial_delay * factor^(attempt - 1)` and never exceed
/// `max_delay`, jitter included.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum attempts, including the first one
    pub attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Growth factor between consecutive delays
    pub factor: f64,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Fraction of the delay randomized around it (0.0 disables jitter)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 1,
            initial_delay: Duration::from_millis(50),
            factor: 5.0,
            max_delay: Duration::ZERO,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    /// Configuration allowing `retries` re-attempts after the first call,
    /// with every delay capped at `max_delay`
    pub fn with_retries(retries: u32, max_delay: Duration) -> Self {
        Self {
            attempts: retries.saturating_add(1),
            max_delay,
            ..Default::default()
        }
    }
}

/// Error patterns to match for retry
#[derive(Debug, Clone)]
pub enum ErrorMatcher {
    /// Network-related errors
    Network,
    /// Timeout errors
    Timeout,
    /// HTTP 5xx errors
    ServerError,
    /// Rate limiting errors
    RateLimit,
    /// Custom regex pattern
    Pattern(String),
}

impl ErrorMatcher {
    /// Check if an error message matches this matcher
    pub fn matches(&self, error_msg: &str) -> bool {
        let error_lower = error_msg.to_lowercase();
        match self {
            ErrorMatcher::Network => {
                error_lower.contains("network")
                    || error_lower.contains("connection")
                    || error_lower.contains("refused")
                    || error_lower.contains("unreachable")
            }
            ErrorMatcher::Timeout => {
                error_lower.contains("timeout") || error_lower.contains("timed out")
            }
            ErrorMatcher::ServerError => {
                error_lower.contains("500")
                    || error_lower.contains("502")
                    || error_lower.contains("503")
                    || error_lower.contains("504")
                    || error_lower.contains("server error")
            }
            ErrorMatcher::RateLimit => {
                error_lower.contains("rate limit")
                    || error_lower.contains("429")
                    || error_lower.contains("too many requests")
            }
            ErrorMatcher::Pattern(pattern) => match regex::Regex::new(pattern) {
                Ok(re) => re.is_match(error_msg),
                Err(_) => false,
            },
        }
    }

    /// Matchers applied when the caller does not choose a retry predicate
    pub fn default_set() -> Vec<ErrorMatcher> {
        vec![
            ErrorMatcher::Network,
            ErrorMatcher::Timeout,
            ErrorMatcher::ServerError,
            ErrorMatcher::RateLimit,
        ]
    }
}

/// Decides whether a failed element may be attempted again
#[derive(Clone)]
pub enum RetryOn {
    /// Retry every failure
    Always,
    /// Never retry
    Never,
    /// Retry worker failures, and element failures whose message matches
    Matching(Vec<ErrorMatcher>),
    /// Caller-supplied predicate
    Custom(Arc<dyn Fn(&TaskError) -> bool + Send + Sync>),
}

impl RetryOn {
    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&TaskError) -> bool + Send + Sync + 'static,
    {
        RetryOn::Custom(Arc::new(predicate))
    }

    pub fn should_retry(&self, error: &TaskError) -> bool {
        match self {
            RetryOn::Always => true,
            RetryOn::Never => false,
            RetryOn::Matching(matchers) => {
                error.is_dispatch() || {
                    let message = error.to_string();
                    matchers.iter().any(|m| m.matches(&message))
                }
            }
            RetryOn::Custom(predicate) => predicate(error),
        }
    }
}

impl Default for RetryOn {
    fn default() -> Self {
        RetryOn::Matching(ErrorMatcher::default_set())
    }
}

impl fmt::Debug for RetryOn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryOn::Always => write!(f, "Always"),
            RetryOn::Never => write!(f, "Never"),
            RetryOn::Matching(matchers) => f.debug_tuple("Matching").field(matchers).finish(),
            RetryOn::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Retry executor
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Execute an operation, retrying failures accepted by `should_retry`
    pub async fn execute_with_retry<F, Fut, T, E, P>(
        &self,
        operation: F,
        should_retry: P,
        context: &str,
    ) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        debug!("{} succeeded after {} attempts", context, attempt);
                    }
                    return Ok(result);
                }
                Err(err) => {
                    if attempt >= self.config.attempts || !should_retry(&err) {
                        debug!("Giving up on {} after {} attempt(s): {}", context, attempt, err);
                        return Err(err);
                    }

                    let delay = self.apply_jitter(self.calculate_delay(attempt));
                    info!(
                        "Retrying {} (attempt {}/{}) after {:?}: {}",
                        context,
                        attempt + 1,
                        self.config.attempts,
                        delay,
                        err
                    );

                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }

    /// Delay before the retry that follows `attempt`
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.config.initial_delay.as_secs_f64() * self.config.factor.powi(exponent);
        self.capped(secs)
    }

    /// Randomize `delay` by up to `jitter_factor`, never exceeding the configured maximum
    pub fn apply_jitter(&self, delay: Duration) -> Duration {
        let range = delay.as_secs_f64() * self.config.jitter_factor;
        if !range.is_finite() || range <= 0.0 {
            return delay;
        }

        let jitter = rand::rng().random_range(-range / 2.0..=range / 2.0);
        self.capped(delay.as_secs_f64() + jitter)
    }

    /// Convert seconds to a delay within `[0, max_delay]`
    fn capped(&self, secs: f64) -> Duration {
        let max = self.config.max_delay;
        if !secs.is_finite() {
            return max;
        }
        Duration::try_from_secs_f64(secs.clamp(0.0, max.as_secs_f64())).unwrap_or(max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkerError;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_error_matcher_network() {
        let matcher = ErrorMatcher::Network;
        assert!(matcher.matches("Connection refused"));
        assert!(matcher.matches("Network unreachable"));
        assert!(!matcher.matches("Syntax error"));
    }

    #[test]
    fn test_error_matcher_rate_limit() {
        let matcher = ErrorMatcher::RateLimit;
        assert!(matcher.matches("Rate limit exceeded"));
        assert!(matcher.matches("Error 429"));
        assert!(!matcher.matches("Server error"));
    }

    #[test]
    fn test_error_matcher_pattern() {
        let matcher = ErrorMatcher::Pattern(r"^flaky-\d+$".to_string());
        assert!(matcher.matches("flaky-12"));
        assert!(!matcher.matches("stable-12"));

        let invalid = ErrorMatcher::Pattern("(".to_string());
        assert!(!invalid.matches("("));
    }

    #[test]
    fn test_default_retry_on_accepts_dispatch_failures() {
        let retry_on = RetryOn::default();
        let lost: TaskError = WorkerError::Lost {
            worker: 1,
            reason: "gone".to_string(),
        }
        .into();
        assert!(retry_on.should_retry(&lost));
        assert!(retry_on.should_retry(&anyhow!("request timed out").into()));
        assert!(!retry_on.should_retry(&anyhow!("division by zero").into()));
    }

    #[test]
    fn test_custom_and_fixed_predicates() {
        let only_even = RetryOn::custom(|e| e.to_string().contains("even"));
        assert!(only_even.should_retry(&anyhow!("even failure").into()));
        assert!(!only_even.should_retry(&anyhow!("odd failure").into()));
        assert!(RetryOn::Always.should_retry(&anyhow!("anything").into()));
        assert!(!RetryOn::Never.should_retry(&anyhow!("anything").into()));
    }

    #[tokio::test]
    async fn test_retry_executor_success() {
        let executor = RetryExecutor::new(RetryConfig::with_retries(2, Duration::ZERO));
        let counter = AtomicU32::new(0);

        let result = executor
            .execute_with_retry(
                || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<_, anyhow::Error>(42) }
                },
                |_| true,
                "test",
            )
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_executor_with_retries() {
        let executor = RetryExecutor::new(RetryConfig::with_retries(2, Duration::from_millis(5)));
        let counter = AtomicU32::new(0);

        let result = executor
            .execute_with_retry(
                || {
                    let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        if count < 3 {
                            Err(anyhow!("Temporary failure"))
                        } else {
                            Ok(count)
                        }
                    }
                },
                |_| true,
                "test",
            )
            .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_retry_executor_max_attempts_exceeded() {
        let executor = RetryExecutor::new(RetryConfig::with_retries(1, Duration::ZERO));
        let counter = AtomicU32::new(0);

        let result = executor
            .execute_with_retry(
                || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Err::<i32, _>(anyhow!("Persistent failure")) }
                },
                |_| true,
                "test",
            )
            .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_stops_when_predicate_rejects() {
        let executor = RetryExecutor::new(RetryConfig::with_retries(5, Duration::ZERO));
        let counter = AtomicU32::new(0);

        let result = executor
            .execute_with_retry(
                || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Err::<i32, _>(anyhow!("Syntax error")) }
                },
                |e: &anyhow::Error| ErrorMatcher::Network.matches(&e.to_string()),
                "test",
            )
            .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_many_retries_do_not_overflow_delay() {
        let executor = RetryExecutor::new(RetryConfig::with_retries(40, Duration::ZERO));
        let counter = AtomicU32::new(0);

        let result = executor
            .execute_with_retry(
                || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Err::<i32, _>(anyhow!("still failing")) }
                },
                |_| true,
                "test",
            )
            .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 41);
    }

    #[test]
    fn test_backoff_capped_by_max_delay() {
        let executor = RetryExecutor::new(RetryConfig {
            initial_delay: Duration::from_secs(1),
            factor: 2.0,
            max_delay: Duration::from_secs(5),
            ..Default::default()
        });

        assert_eq!(executor.calculate_delay(1), Duration::from_secs(1));
        assert_eq!(executor.calculate_delay(2), Duration::from_secs(2));
        assert_eq!(executor.calculate_delay(3), Duration::from_secs(4));
        assert_eq!(executor.calculate_delay(4), Duration::from_secs(5));
    }

    #[test]
    fn test_huge_attempt_numbers_hit_the_cap() {
        let capped = RetryExecutor::new(RetryConfig::with_retries(100, Duration::from_secs(3)));
        for attempt in [31, 64, 1_000, u32::MAX] {
            assert_eq!(capped.calculate_delay(attempt), Duration::from_secs(3));
            assert!(capped.apply_jitter(capped.calculate_delay(attempt)) <= Duration::from_secs(3));
        }

        let immediate = RetryExecutor::new(RetryConfig::with_retries(100, Duration::ZERO));
        assert_eq!(immediate.calculate_delay(u32::MAX), Duration::ZERO);

        let unbounded = RetryExecutor::new(RetryConfig::with_retries(100, Duration::MAX));
        assert_eq!(unbounded.calculate_delay(u32::MAX), Duration::MAX);
    }

    #[test]
    fn test_zero_max_delay_means_immediate_retry() {
        let executor = RetryExecutor::new(RetryConfig::with_retries(3, Duration::ZERO));
        for attempt in 1..=3 {
            let delay = executor.apply_jitter(executor.calculate_delay(attempt));
            assert_eq!(delay, Duration::ZERO);
        }
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let executor = RetryExecutor::new(RetryConfig {
            jitter_factor: 0.5,
            max_delay: Duration::from_secs(20),
            ..Default::default()
        });

        for _ in 0..10 {
            let secs = executor.apply_jitter(Duration::from_secs(10)).as_secs_f64();
            assert!((7.5..=12.5).contains(&secs));
        }
    }
}
