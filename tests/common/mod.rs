//! Common test utilities and helpers

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use fanout::{WorkerError, WorkerPool};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Records how often each element was processed and decides failures
///
/// An element listed in `fail_times` fails on its first `n` invocations and
/// succeeds afterwards. An element listed in `panic_once` panics (taking its
/// worker down) on its first invocation only.
#[derive(Clone, Default)]
pub struct Recorder {
    calls: Arc<Mutex<HashMap<u32, u32>>>,
    fail_times: Arc<HashMap<u32, u32>>,
    panic_once: Arc<Vec<u32>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, item: u32, times: u32) -> Self {
        Arc::make_mut(&mut self.fail_times).insert(item, times);
        self
    }

    pub fn failing_always(self, item: u32) -> Self {
        self.failing(item, u32::MAX)
    }

    pub fn panicking_once(mut self, item: u32) -> Self {
        Arc::make_mut(&mut self.panic_once).push(item);
        self
    }

    pub fn calls(&self, item: u32) -> u32 {
        self.calls
            .lock()
            .unwrap()
            .get(&item)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }

    /// `x * 10`, with the configured failures and a small shuffle of
    /// completion order
    pub fn times_ten(&self) -> impl Fn(u32) -> BoxFuture<'static, Result<u32>> + Send + Sync {
        let recorder = self.clone();
        move |x: u32| {
            let call = {
                let mut calls = recorder.calls.lock().unwrap();
                let entry = calls.entry(x).or_insert(0);
                *entry += 1;
                *entry
            };
            let should_fail = recorder
                .fail_times
                .get(&x)
                .is_some_and(|times| call <= *times);
            let should_panic = call == 1 && recorder.panic_once.contains(&x);

            async move {
                tokio::time::sleep(Duration::from_millis(u64::from((x * 7) % 5))).await;
                if should_panic {
                    panic!("worker lost while processing {}", x);
                }
                if should_fail {
                    Err(anyhow!("element {} failed on call {}", x, call))
                } else {
                    Ok(x * 10)
                }
            }
            .boxed()
        }
    }
}

/// A pool with no workers at all; dispatching to it is a test failure
pub struct EmptyPool;

#[async_trait]
impl WorkerPool for EmptyPool {
    fn size(&self) -> usize {
        0
    }

    fn is_local_only(&self) -> bool {
        false
    }

    async fn execute<T>(&self, _job: BoxFuture<'static, T>) -> Result<T, WorkerError>
    where
        T: Send + 'static,
    {
        panic!("EmptyPool cannot execute jobs");
    }
}

/// Run `f` and assert it completes within `limit`
pub async fn within<F: Future>(limit: Duration, f: F) -> F::Output {
    tokio::time::timeout(limit, f)
        .await
        .expect("operation did not complete in time")
}

/// Count jobs routed through a pool
pub struct CountingPool<P> {
    pub inner: P,
    pub dispatched: AtomicUsize,
}

impl<P> CountingPool<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            dispatched: AtomicUsize::new(0),
        }
    }

    pub fn dispatched(&self) -> usize {
        self.dispatched.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<P: WorkerPool> WorkerPool for CountingPool<P> {
    fn size(&self) -> usize {
        self.inner.size()
    }

    fn is_local_only(&self) -> bool {
        self.inner.is_local_only()
    }

    async fn execute<T>(&self, job: BoxFuture<'static, T>) -> Result<T, WorkerError>
    where
        T: Send + 'static,
    {
        self.dispatched.fetch_add(1, Ordering::SeqCst);
        self.inner.execute(job).await
    }
}

/// Pool whose first `failures` dispatches are lost before the job runs
pub struct FlakyPool<P> {
    inner: P,
    failures: usize,
    attempts: AtomicUsize,
}

impl<P> FlakyPool<P> {
    pub fn new(inner: P, failures: usize) -> Self {
        Self {
            inner,
            failures,
            attempts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl<P: WorkerPool> WorkerPool for FlakyPool<P> {
    fn size(&self) -> usize {
        self.inner.size()
    }

    fn is_local_only(&self) -> bool {
        self.inner.is_local_only()
    }

    async fn execute<T>(&self, job: BoxFuture<'static, T>) -> Result<T, WorkerError>
    where
        T: Send + 'static,
    {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err(WorkerError::Lost {
                worker: attempt,
                reason: "connection to worker dropped".to_string(),
            });
        }
        self.inner.execute(job).await
    }
}
