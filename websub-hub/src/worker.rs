//! Worker pool that executes queued jobs with bounded concurrency and retries.
//!
//! ```text
//! WorkerPool::run
//!   ├─ recv QueuedJob from the queue
//!   ├─ acquire semaphore permit (caps concurrency)
//!   └─ spawn executor.execute(job)
//!        ├─ Ok                         → done
//!        ├─ transient error, budget    → queue.requeue_after(delay, attempt + 1)
//!        └─ anything else / exhausted  → log terminal failure, drop
//! ```
//!
//! Each job is independent: one failing delivery never holds up the others.
//! On shutdown, jobs already running are awaited; jobs in the delay window are lost.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::queue::{Job, JobQueue, QueuedJob, RetryPolicy};

/// Something that can run a [`Job`].
#[async_trait]
pub trait JobExecutor: Send + Sync + 'static {
    async fn execute(&self, job: &Job) -> Result<()>;
}

/// Pulls jobs off a [`JobQueue`] and runs them.
pub struct WorkerPool<E: JobExecutor> {
    executor: Arc<E>,
    queue: JobQueue,
    retry: RetryPolicy,
    max_concurrent_jobs: usize,
}

impl<E: JobExecutor> WorkerPool<E> {
    /// `queue` must be the handle paired with the receiver later passed to [`run`](Self::run);
    /// retries are put back on it.
    pub fn new(executor: Arc<E>, queue: JobQueue, retry: RetryPolicy, max_concurrent_jobs: usize) -> Self {
        Self {
            executor,
            queue,
            retry,
            max_concurrent_jobs: max_concurrent_jobs.max(1),
        }
    }

    /// Run until the channel closes or `shutdown` is cancelled, then wait for
    /// jobs already running to finish.
    pub async fn run(self, mut rx: mpsc::Receiver<QueuedJob>, shutdown: CancellationToken) {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_jobs));
        let mut running = JoinSet::new();
        tracing::info!(max_concurrent_jobs = self.max_concurrent_jobs, "Worker pool started");

        loop {
            let queued = tokio::select! {
                job = rx.recv() => {
                    match job {
                        Some(j) => j,
                        None => {
                            tracing::debug!("Job channel closed, shutting down worker pool");
                            break;
                        }
                    }
                }
                Some(finished) = running.join_next(), if !running.is_empty() => {
                    if let Err(e) = finished {
                        tracing::error!(error = %e, "Job task panicked");
                    }
                    continue;
                }
                _ = shutdown.cancelled() => {
                    tracing::debug!("Worker pool received shutdown signal");
                    break;
                }
            };

            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => {
                        tracing::warn!("Worker pool semaphore closed");
                        break;
                    }
                },
                _ = shutdown.cancelled() => break,
            };

            let executor = self.executor.clone();
            let queue = self.queue.clone();
            let retry = self.retry.clone();

            running.spawn(async move {
                let _permit = permit;
                run_job(executor.as_ref(), &queue, &retry, queued).await;
            });
        }

        if !running.is_empty() {
            tracing::info!(in_flight = running.len(), "Waiting for in-flight jobs");
        }
        while let Some(finished) = running.join_next().await {
            if let Err(e) = finished {
                tracing::error!(error = %e, "Job task panicked");
            }
        }

        tracing::info!("Worker pool exited");
    }
}

async fn run_job<E: JobExecutor>(executor: &E, queue: &JobQueue, retry: &RetryPolicy, queued: QueuedJob) {
    let kind = queued.job.kind();
    tracing::debug!(
        job_id = %queued.id,
        kind,
        topic = %queued.job.topic(),
        attempt = queued.attempt,
        "Running job"
    );

    let error = match executor.execute(&queued.job).await {
        Ok(()) => {
            counter!("websub_jobs_total", "kind" => kind, "outcome" => "success").increment(1);
            return;
        }
        Err(e) => e,
    };

    if error.is_retryable() {
        if let Some(delay) = retry.delay_after(queued.attempt) {
            counter!("websub_jobs_total", "kind" => kind, "outcome" => "retry").increment(1);
            tracing::warn!(
                job_id = %queued.id,
                kind,
                attempt = queued.attempt,
                retry_in = ?delay,
                error = %error,
                "Job failed, scheduling retry"
            );
            queue.requeue_after(queued.next_attempt(), delay);
            return;
        }
    }

    counter!("websub_jobs_total", "kind" => kind, "outcome" => "failed").increment(1);
    tracing::error!(
        job_id = %queued.id,
        kind,
        topic = %queued.job.topic(),
        attempt = queued.attempt,
        retryable = error.is_retryable(),
        error = %error,
        "Job failed permanently, dropping"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use crate::error::HubError;

    /// Fails the first `failures` executions with the given error, then succeeds.
    struct FlakyExecutor {
        failures: u32,
        retryable: bool,
        calls: AtomicU32,
    }

    impl FlakyExecutor {
        fn new(failures: u32, retryable: bool) -> Self {
            Self {
                failures,
                retryable,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl JobExecutor for FlakyExecutor {
        async fn execute(&self, job: &Job) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(if self.retryable {
                    HubError::Fetch {
                        topic: job.topic().to_string(),
                        status: Some(503),
                        reason: "HTTP 503".to_string(),
                    }
                } else {
                    HubError::InvalidLease
                });
            }
            Ok(())
        }
    }

    fn fetch_job() -> Job {
        Job::Fetch {
            topic: "https://example.com/feed".to_string(),
        }
    }

    async fn run_pool(executor: Arc<FlakyExecutor>, retry: RetryPolicy, settle: Duration) {
        let (queue, rx) = JobQueue::new(16);
        let shutdown = CancellationToken::new();
        let pool = WorkerPool::new(executor, queue.clone(), retry, 4);
        let handle = tokio::spawn(pool.run(rx, shutdown.clone()));

        queue.enqueue(fetch_job()).unwrap();
        tokio::time::sleep(settle).await;

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("pool should exit on shutdown")
            .expect("pool should not panic");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_failures_until_success() {
        let executor = Arc::new(FlakyExecutor::new(2, true));
        run_pool(executor.clone(), RetryPolicy::from_secs(vec![1, 1, 1]), Duration::from_secs(10)).await;
        assert_eq!(executor.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drops_after_retry_budget() {
        let executor = Arc::new(FlakyExecutor::new(u32::MAX, true));
        run_pool(executor.clone(), RetryPolicy::from_secs(vec![1, 2]), Duration::from_secs(60)).await;
        assert_eq!(executor.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_errors_are_not_retried() {
        let executor = Arc::new(FlakyExecutor::new(u32::MAX, false));
        run_pool(executor.clone(), RetryPolicy::from_secs(vec![1, 1, 1]), Duration::from_secs(10)).await;
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }

    /// Takes `duration` to run and records completion.
    struct SlowExecutor {
        duration: Duration,
        started: tokio::sync::Notify,
        finished: AtomicU32,
    }

    #[async_trait]
    impl JobExecutor for SlowExecutor {
        async fn execute(&self, _job: &Job) -> Result<()> {
            self.started.notify_one();
            tokio::time::sleep(self.duration).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_running_jobs() {
        let executor = Arc::new(SlowExecutor {
            duration: Duration::from_secs(5),
            started: tokio::sync::Notify::new(),
            finished: AtomicU32::new(0),
        });
        let (queue, rx) = JobQueue::new(4);
        let shutdown = CancellationToken::new();
        let pool = WorkerPool::new(executor.clone(), queue.clone(), RetryPolicy::none(), 2);
        let handle = tokio::spawn(pool.run(rx, shutdown.clone()));

        queue.enqueue(fetch_job()).unwrap();
        executor.started.notified().await;

        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(executor.finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exits_on_shutdown_while_idle() {
        let (queue, rx) = JobQueue::new(4);
        let shutdown = CancellationToken::new();
        let pool = WorkerPool::new(Arc::new(FlakyExecutor::new(0, true)), queue, RetryPolicy::none(), 1);
        let handle = tokio::spawn(pool.run(rx, shutdown.clone()));

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("pool should exit promptly")
            .expect("pool should not panic");
    }
}
