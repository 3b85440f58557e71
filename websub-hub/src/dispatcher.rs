//! Content distribution: fetch, fan out, sign, deliver.
//!
//! ```text
//! Job::Fetch { topic }
//!   └─ notify(topic)
//!        ├─ ContentFetcher::fetch()          // failure → Err(Fetch), no fan-out this cycle
//!        └─ fan_out(NotificationJob)
//!             ├─ store.list_active(topic)    // snapshot
//!             ├─ queue.enqueue(Job::Deliver) // one per subscriber
//!             └─ queue full → Job::Publish carrying the remaining callbacks,
//!                             queued as soon as there is room
//!
//! Job::Deliver(delivery)
//!   └─ deliver(delivery)                     // inside race_guarded(topic, callback)
//!        ├─ store.get(topic, callback)       // vanished → logged no-op
//!        ├─ lease expired since snapshot     → skipped
//!        ├─ sign payload (if secret)
//!        └─ POST callback
//!             ├─ 2xx → Delivered
//!             ├─ 410 → subscriber is gone, remove subscription
//!             └─ other / transport error → Err(Delivery), retried by the worker pool
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;

use crate::error::{HubError, Result};
use crate::fetch::{ContentFetcher, DEFAULT_MAX_BODY_BYTES, DEFAULT_REQUEST_TIMEOUT};
use crate::http::{HttpClient, HttpRequest};
use crate::queue::{Delivery, Job, JobQueue, NotificationJob};
use crate::race::race_guarded;
use crate::signing::{self, Algorithm, SIGNATURE_HEADER};
use crate::store::SubscriptionStore;
use crate::worker::JobExecutor;

/// Settings the dispatcher is constructed with.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Public URL of this hub, advertised with `rel="hub"` on every notification
    pub hub_url: Option<String>,
    pub signature_algorithm: Algorithm,
    /// Bound on each topic fetch and each delivery
    pub request_timeout: Duration,
    pub max_body_bytes: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            hub_url: None,
            signature_algorithm: Algorithm::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// How a single delivery ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The callback accepted the notification
    Delivered { status: u16 },
    /// The subscription was removed after the fan-out snapshot was taken
    Vanished,
    /// The lease ran out after the fan-out snapshot was taken
    Expired,
    /// The callback answered 410 Gone; the subscription was removed
    Gone,
}

pub struct NotificationDispatcher<S, H>
where
    S: SubscriptionStore,
    H: HttpClient,
{
    store: Arc<S>,
    fetcher: ContentFetcher<H>,
    http: H,
    queue: JobQueue,
    config: DispatcherConfig,
}

impl<S, H> NotificationDispatcher<S, H>
where
    S: SubscriptionStore,
    H: HttpClient,
{
    pub fn new(store: Arc<S>, http: H, queue: JobQueue, config: DispatcherConfig) -> Self {
        let fetcher = ContentFetcher::new(http.clone(), config.request_timeout, config.max_body_bytes);
        Self {
            store,
            fetcher,
            http,
            queue,
            config,
        }
    }

    /// Fetch the topic and queue one delivery per active subscriber.
    ///
    /// Returns the number of deliveries queued. A failed fetch returns the
    /// `Fetch` error and queues nothing.
    #[tracing::instrument(skip(self))]
    pub async fn notify(&self, topic: &str) -> Result<usize> {
        let content = self.fetcher.fetch(topic).await?;
        self.fan_out(NotificationJob::new(topic, content.body, content.content_type))
            .await
    }

    /// Queue one delivery per active subscriber of `job.topic`, or per entry of
    /// `job.callbacks` when continuing an earlier fan-out.
    ///
    /// Returns the number of deliveries queued by this call. When the queue
    /// fills up, the subscribers not yet queued are handed to a continuation
    /// `Job::Publish` that is queued once there is room, so every subscriber
    /// gets exactly one delivery job.
    #[tracing::instrument(skip(self, job), fields(topic = %job.topic, len = job.payload.len()))]
    pub async fn fan_out(&self, mut job: NotificationJob) -> Result<usize> {
        let callbacks = match job.callbacks.take() {
            Some(callbacks) => callbacks,
            None => self
                .store
                .list_active(&job.topic, Utc::now())
                .await?
                .into_iter()
                .map(|subscription| subscription.callback)
                .collect(),
        };
        if callbacks.is_empty() {
            tracing::debug!("No active subscriptions for topic");
            return Ok(0);
        }

        let mut enqueued = 0usize;
        for (index, callback) in callbacks.iter().enumerate() {
            let delivery = Delivery {
                topic: job.topic.clone(),
                callback: callback.clone(),
                payload: job.payload.clone(),
                content_type: job.content_type.clone(),
            };

            match self.queue.enqueue(Job::Deliver(delivery)) {
                Ok(job_id) => {
                    enqueued += 1;
                    tracing::trace!(job_id = %job_id, callback = %callback, "Queued delivery");
                }
                Err(e) => {
                    let remaining = callbacks[index..].to_vec();
                    let pending = remaining.len();
                    let continuation = NotificationJob {
                        callbacks: Some(remaining),
                        ..job
                    };
                    let job_id = self.queue.enqueue_when_ready(Job::Publish(continuation));
                    tracing::info!(
                        enqueued,
                        pending,
                        continuation = %job_id,
                        error = %e,
                        "Queue full, continuing fan-out once there is room"
                    );
                    return Ok(enqueued);
                }
            }
        }

        tracing::info!(enqueued, "Fanned out topic update");
        Ok(enqueued)
    }

    /// Deliver one notification. A subscription that vanished since the
    /// fan-out is a logged no-op rather than an error.
    #[tracing::instrument(skip(self, delivery), fields(topic = %delivery.topic, callback = %delivery.callback))]
    pub async fn deliver(&self, delivery: &Delivery) -> Result<DeliveryOutcome> {
        let outcome = race_guarded(&delivery.topic, &delivery.callback, self.try_deliver(delivery)).await?;
        Ok(outcome.unwrap_or(DeliveryOutcome::Vanished))
    }

    async fn try_deliver(&self, delivery: &Delivery) -> Result<DeliveryOutcome> {
        let subscription = self.store.get(&delivery.topic, &delivery.callback).await?;

        if !subscription.is_active(Utc::now()) {
            tracing::debug!(lease_expiry = %subscription.lease_expiry, "Lease expired since fan-out, skipping");
            return Ok(DeliveryOutcome::Expired);
        }

        let request = self.build_request(delivery, subscription.secret.as_deref());
        let response = self.http.send(&request).await.map_err(|e| {
            counter!("websub_deliveries_total", "outcome" => "error").increment(1);
            HubError::Delivery {
                callback: delivery.callback.clone(),
                status: None,
                reason: e.to_string(),
            }
        })?;

        if response.is_success() {
            counter!("websub_deliveries_total", "outcome" => "success").increment(1);
            tracing::debug!(status = response.status, "Notification delivered");
            return Ok(DeliveryOutcome::Delivered { status: response.status });
        }

        if response.status == 410 {
            counter!("websub_deliveries_total", "outcome" => "gone").increment(1);
            let removed = self.store.remove(&delivery.topic, &delivery.callback).await?;
            tracing::info!(removed, "Callback reported 410 Gone, subscription removed");
            return Ok(DeliveryOutcome::Gone);
        }

        counter!("websub_deliveries_total", "outcome" => "bad_status").increment(1);
        Err(HubError::Delivery {
            callback: delivery.callback.clone(),
            status: Some(response.status),
            reason: format!("HTTP {}", response.status),
        })
    }

    /// Build the POST for one subscriber, signed when a secret is configured.
    pub fn build_request(&self, delivery: &Delivery, secret: Option<&[u8]>) -> HttpRequest {
        let mut request = HttpRequest::post(&delivery.callback, delivery.payload.clone(), self.config.request_timeout)
            .header("Link", self.link_header(&delivery.topic));

        if let Some(content_type) = &delivery.content_type {
            request = request.header("Content-Type", content_type);
        }
        if let Some(secret) = secret {
            let signature = signing::signature_header(self.config.signature_algorithm, secret, &delivery.payload);
            request = request.header(SIGNATURE_HEADER, signature);
        }
        request
    }

    fn link_header(&self, topic: &str) -> String {
        match &self.config.hub_url {
            Some(hub_url) => format!(r#"<{hub_url}>; rel="hub", <{topic}>; rel="self""#),
            None => format!(r#"<{topic}>; rel="self""#),
        }
    }
}

#[async_trait]
impl<S, H> JobExecutor for NotificationDispatcher<S, H>
where
    S: SubscriptionStore + 'static,
    H: HttpClient,
{
    async fn execute(&self, job: &Job) -> Result<()> {
        match job {
            Job::Fetch { topic } => self.notify(topic).await.map(|_| ()),
            Job::Publish(notification) => self.fan_out(notification.clone()).await.map(|_| ()),
            Job::Deliver(delivery) => self.deliver(delivery).await.map(|_| ()),
        }
    }
}
