//! Typed job descriptors and the queue that carries them to workers.

use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::error::{HubError, Result};

/// A unique identifier for a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hex = format!("{:x}", self.0.as_u128());
        write!(f, "job_{}", &hex[..8.min(hex.len())])
    }
}

/// Topic content to be fanned out to every active subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationJob {
    pub topic: String,
    pub payload: Bytes,
    pub content_type: Option<String>,
    /// Subscribers still to be queued when a fan-out was cut short by a full
    /// queue. `None` targets every active subscriber of the topic.
    pub callbacks: Option<Vec<String>>,
}

impl NotificationJob {
    pub fn new(topic: impl Into<String>, payload: Bytes, content_type: Option<String>) -> Self {
        Self {
            topic: topic.into(),
            payload,
            content_type,
            callbacks: None,
        }
    }
}

/// One notification for one subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub callback: String,
    pub payload: Bytes,
    pub content_type: Option<String>,
}

/// Unit of work executed by the worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Fetch the topic from its origin, then fan out
    Fetch { topic: String },
    /// Fan out content supplied by the publisher
    Publish(NotificationJob),
    /// Deliver to a single callback
    Deliver(Delivery),
}

impl Job {
    pub fn topic(&self) -> &str {
        match self {
            Job::Fetch { topic } => topic,
            Job::Publish(job) => &job.topic,
            Job::Deliver(delivery) => &delivery.topic,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Job::Fetch { .. } => "fetch",
            Job::Publish(_) => "publish",
            Job::Deliver(_) => "deliver",
        }
    }
}

/// A job together with its retry bookkeeping.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub id: JobId,
    /// Attempts started so far, including the one about to run
    pub attempt: u32,
    pub job: Job,
}

impl QueuedJob {
    pub fn new(job: Job) -> Self {
        Self {
            id: JobId::new(),
            attempt: 1,
            job,
        }
    }

    pub fn next_attempt(self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self
        }
    }
}

/// Delays between attempts of a failing job.
///
/// Entry `n` is the wait before retry `n + 1`; the schedule length is the
/// number of retries after the first attempt.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct RetryPolicy {
    schedule_secs: Vec<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        // 5s, 30s, 5m, 30m, 2h
        Self::from_secs(vec![5, 30, 300, 1800, 7200])
    }
}

impl RetryPolicy {
    pub fn from_secs(schedule_secs: Vec<u64>) -> Self {
        Self { schedule_secs }
    }

    /// No retries: every failure is terminal.
    pub fn none() -> Self {
        Self::from_secs(Vec::new())
    }

    pub fn max_attempts(&self) -> u32 {
        self.schedule_secs.len() as u32 + 1
    }

    /// Delay before the next attempt, given how many attempts have run.
    /// `None` once the schedule is exhausted.
    pub fn delay_after(&self, attempts_made: u32) -> Option<Duration> {
        let index = attempts_made.checked_sub(1)? as usize;
        self.schedule_secs.get(index).map(|secs| Duration::from_secs(*secs))
    }
}

/// Cloneable handle for submitting jobs to the worker pool.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<QueuedJob>,
}

impl JobQueue {
    /// Create a bounded queue; the receiver goes to [`crate::worker::WorkerPool::run`].
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<QueuedJob>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Submit a new job without waiting.
    ///
    /// # Errors
    /// - `QueueFull` when the queue is at capacity or the workers have shut down
    pub fn enqueue(&self, job: Job) -> Result<JobId> {
        let queued = QueuedJob::new(job);
        let id = queued.id;
        match self.tx.try_send(queued) {
            Ok(()) => Ok(id),
            Err(TrySendError::Full(_)) => Err(HubError::QueueFull),
            Err(TrySendError::Closed(_)) => {
                tracing::warn!(job_id = %id, "Job queue closed, dropping job");
                Err(HubError::QueueFull)
            }
        }
    }

    /// Submit a new job as soon as the queue has room, without waiting for it.
    pub fn enqueue_when_ready(&self, job: Job) -> JobId {
        let queued = QueuedJob::new(job);
        let id = queued.id;
        self.send_later(queued, Duration::ZERO);
        id
    }

    /// Put a job back on the queue once `delay` has elapsed.
    pub fn requeue_after(&self, job: QueuedJob, delay: Duration) {
        self.send_later(job, delay);
    }

    fn send_later(&self, job: QueuedJob, delay: Duration) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let id = job.id;
            if tx.send(job).await.is_err() {
                tracing::debug!(job_id = %id, "Job queue closed before job could be queued");
            }
        });
    }
}
