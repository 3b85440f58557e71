//! Fixed-interval refresh of configured topics.
//!
//! For origins that never ping the hub, each configured topic gets a
//! `Job::Fetch` every interval. Fetch failures are handled by the worker pool.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::queue::{Job, JobQueue};

pub async fn run_poller(queue: JobQueue, topics: Vec<String>, interval: Duration, shutdown: CancellationToken) {
    if topics.is_empty() {
        tracing::debug!("No poll topics configured, topic poller not started");
        return;
    }

    tracing::info!(interval = ?interval, topics = topics.len(), "Starting topic poller");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.cancelled() => {
                tracing::info!("Topic poller shutting down");
                return;
            }
        }

        for topic in &topics {
            match queue.enqueue(Job::Fetch { topic: topic.clone() }) {
                Ok(job_id) => tracing::debug!(job_id = %job_id, topic = %topic, "Queued topic fetch"),
                Err(e) => tracing::warn!(topic = %topic, error = %e, "Failed to queue topic fetch"),
            }
        }
    }
}
