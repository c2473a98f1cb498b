//! Bounded task dispatcher used for concurrent entity construction.

use crate::errors::{SnykError, SnykErrorKind, SnykResult};
use crate::observability::Metrics;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error};

/// Decrements the in-flight count when a task finishes, panics or is aborted.
struct InFlightGuard {
    in_flight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Bounded worker pool shared by every resolution of a client.
///
/// At most `max_workers` submitted futures run at once; the rest wait for
/// a permit. Must be closed once at the end of the client's life.
pub struct TaskDispatcher {
    permits: Arc<Semaphore>,
    max_workers: usize,
    in_flight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
    closed: AtomicBool,
    metrics: Arc<Metrics>,
}

impl TaskDispatcher {
    /// Creates a dispatcher with `max_workers` slots.
    pub fn new(max_workers: usize, metrics: Arc<Metrics>) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_workers)),
            max_workers,
            in_flight: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
            closed: AtomicBool::new(false),
            metrics,
        }
    }

    /// Pool size.
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Tasks submitted and not finished yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Returns true once [`TaskDispatcher::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Wraps `fut` so it runs under a pool permit and is tracked for `close`.
    fn bounded<F, T>(
        &self,
        fut: F,
    ) -> SnykResult<impl Future<Output = SnykResult<T>> + Send + 'static>
    where
        F: Future<Output = SnykResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_closed() {
            return Err(SnykError::new(
                SnykErrorKind::DispatcherClosed,
                "Task submitted after dispatcher was closed",
            ));
        }

        self.in_flight.fetch_add(1, Ordering::AcqRel);
        self.metrics.record_task_submitted();
        let guard = InFlightGuard {
            in_flight: self.in_flight.clone(),
            idle: self.idle.clone(),
        };
        let permits = self.permits.clone();

        Ok(async move {
            let _guard = guard;
            let _permit = permits.acquire_owned().await.map_err(|_| {
                SnykError::new(SnykErrorKind::DispatcherClosed, "Dispatcher pool is closed")
            })?;
            fut.await
        })
    }

    /// Submits a single future and returns a handle to its result.
    pub fn submit<F, T>(&self, fut: F) -> SnykResult<TaskHandle<T>>
    where
        F: Future<Output = SnykResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let task = self.bounded(fut)?;
        Ok(TaskHandle {
            inner: tokio::spawn(task),
        })
    }

    /// Starts a batch whose results are gathered in completion order.
    pub fn batch<T: Send + 'static>(&self) -> TaskBatch<'_, T> {
        TaskBatch {
            dispatcher: self,
            set: JoinSet::new(),
            submitted: 0,
        }
    }

    /// Waits for every in-flight task, then refuses further work.
    ///
    /// A second call returns `DispatcherClosed`.
    pub async fn close(&self) -> SnykResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(SnykError::new(
                SnykErrorKind::DispatcherClosed,
                "Dispatcher already closed",
            ));
        }

        loop {
            let notified = self.idle.notified();
            if self.in_flight() == 0 {
                break;
            }
            debug!(in_flight = self.in_flight(), "Draining dispatcher");
            notified.await;
        }

        self.permits.close();
        debug!("Dispatcher closed");
        Ok(())
    }
}

/// Handle to a single submitted task.
pub struct TaskHandle<T> {
    inner: JoinHandle<SnykResult<T>>,
}

impl<T> TaskHandle<T> {
    /// Waits for the task. A panic becomes `TaskFailed`.
    pub async fn join(self) -> SnykResult<T> {
        self.inner.await.map_err(task_failed)?
    }
}

fn task_failed(e: JoinError) -> SnykError {
    let reason = if e.is_panic() { "panicked" } else { "was cancelled" };
    SnykError::new(SnykErrorKind::TaskFailed, format!("Task {}", reason))
}

/// A group of tasks collected in completion order.
pub struct TaskBatch<'a, T> {
    dispatcher: &'a TaskDispatcher,
    set: JoinSet<SnykResult<T>>,
    submitted: usize,
}

impl<'a, T: Send + 'static> TaskBatch<'a, T> {
    /// Adds a task to the batch.
    pub fn spawn<F>(&mut self, fut: F) -> SnykResult<()>
    where
        F: Future<Output = SnykResult<T>> + Send + 'static,
    {
        let task = self.dispatcher.bounded(fut)?;
        self.set.spawn(task);
        self.submitted += 1;
        Ok(())
    }

    /// Number of tasks added.
    pub fn submitted(&self) -> usize {
        self.submitted
    }

    /// Next finished task, whichever finishes first.
    pub async fn next_completed(&mut self) -> Option<SnykResult<T>> {
        let joined = self.set.join_next().await?;
        Some(joined.map_err(task_failed).and_then(|r| r))
    }

    /// Gathers every successful result.
    ///
    /// Each failure is logged at error level and left out; one failing task
    /// never aborts the others.
    pub async fn collect_settled(mut self, what: &str) -> Vec<T> {
        let mut results = Vec::with_capacity(self.submitted);
        while let Some(outcome) = self.next_completed().await {
            match outcome {
                Ok(value) => results.push(value),
                Err(e) => {
                    self.dispatcher.metrics.record_task_failed();
                    error!(entity = what, error = %e, "Failed to construct entity, dropping it");
                }
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn dispatcher(workers: usize) -> TaskDispatcher {
        TaskDispatcher::new(workers, Arc::new(Metrics::new()))
    }

    #[tokio::test]
    async fn test_submit_and_join() {
        let d = dispatcher(2);
        let handle = d.submit(async { Ok(21 * 2) }).unwrap();
        assert_eq!(handle.join().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_batch_partial_success() {
        let d = dispatcher(4);
        let mut batch = d.batch::<u32>();
        for i in 0..6u32 {
            batch
                .spawn(async move {
                    if i % 3 == 0 {
                        Err(SnykError::invalid_payload(format!("bad {}", i)))
                    } else {
                        Ok(i)
                    }
                })
                .unwrap();
        }
        assert_eq!(batch.submitted(), 6);

        let mut results = batch.collect_settled("number").await;
        results.sort();
        assert_eq!(results, vec![1, 2, 4, 5]);
        assert_eq!(d.metrics.snapshot().tasks_failed, 2);
    }

    async fn explode() -> SnykResult<u32> {
        panic!("boom")
    }

    #[tokio::test]
    async fn test_panic_becomes_task_failed() {
        let d = dispatcher(1);
        let mut batch = d.batch::<u32>();
        batch.spawn(explode()).unwrap();
        batch.spawn(async { Ok(7) }).unwrap();

        let results = batch.collect_settled("number").await;
        assert_eq!(results, vec![7]);
    }

    #[tokio::test]
    async fn test_completion_order() {
        let d = dispatcher(4);
        let mut batch = d.batch::<&'static str>();
        batch
            .spawn(async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok("slow")
            })
            .unwrap();
        batch.spawn(async { Ok("fast") }).unwrap();

        assert_eq!(batch.next_completed().await.unwrap().unwrap(), "fast");
        assert_eq!(batch.next_completed().await.unwrap().unwrap(), "slow");
        assert!(batch.next_completed().await.is_none());
    }

    #[tokio::test]
    async fn test_pool_is_bounded() {
        let d = dispatcher(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut batch = d.batch::<()>();

        for _ in 0..8 {
            let running = running.clone();
            let peak = peak.clone();
            batch
                .spawn(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
        }

        assert_eq!(batch.collect_settled("sleeper").await.len(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_close_drains_then_rejects() {
        let d = dispatcher(2);
        let handle = d
            .submit(async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(1)
            })
            .unwrap();

        d.close().await.unwrap();
        assert_eq!(d.in_flight(), 0);
        assert_eq!(handle.join().await.unwrap(), 1);

        let err = d.close().await.unwrap_err();
        assert_eq!(*err.kind(), SnykErrorKind::DispatcherClosed);

        let err = d.submit(async { Ok(()) }).err().unwrap();
        assert_eq!(*err.kind(), SnykErrorKind::DispatcherClosed);
    }
}
