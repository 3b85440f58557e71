//! # websub-hub: subscription and content distribution core of a WebSub hub
//!
//! A hub sits between publishers and subscribers. Subscribers register a callback URL for a
//! topic with a time-bounded lease and an optional shared secret; when a topic changes the hub
//! fetches its current content and POSTs it to every active subscriber, signing the body with
//! HMAC when a secret was given.
//!
//! ## Architecture
//!
//! ```text
//!  handshake ──► SubscriptionService ──► SubscriptionStore (SQLite, WAL)
//!                                              ▲     ▲
//!  publish ping ─┐                             │     │ sweep_expired
//!  poller ───────┴─► JobQueue ─► WorkerPool ─► NotificationDispatcher     janitor
//!                       ▲                          │
//!                       └──── retry with backoff ◄─┘ fetch / fan-out / sign / deliver
//! ```
//!
//! Subscription mutations and dispatch run concurrently without a global lock. A subscriber
//! removed between the fan-out snapshot and its delivery is absorbed by [`race`] as a logged
//! no-op; every other failure is surfaced. Delivery is at-least-once: failed jobs are retried
//! on the [`queue::RetryPolicy`] schedule and are never silently dropped before it is exhausted.
//!
//! The HTTP surface (subscription handshake with intent verification, publish endpoint) is not
//! part of this crate; it drives [`Hub::service`] and [`Hub::publish`].
//!
//! ## Configuration
//!
//! See [`config`] for the YAML layout and environment overrides.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod fetch;
pub mod http;
pub mod janitor;
pub mod lease;
pub mod poller;
pub mod queue;
pub mod race;
pub mod service;
pub mod signing;
pub mod store;
pub mod subscription;
pub mod telemetry;
pub mod worker;

pub use config::Config;
pub use dispatcher::{DeliveryOutcome, DispatcherConfig, NotificationDispatcher};
pub use error::{ErrorKind, HubError, Result};
pub use queue::{Job, JobId, JobQueue, NotificationJob, RetryPolicy};
pub use service::SubscriptionService;
pub use signing::Algorithm;
pub use store::SubscriptionStore;
pub use subscription::Subscription;

use crate::http::ReqwestHttpClient;
use crate::queue::QueuedJob;
use crate::store::sqlite::SqliteStore;
use crate::worker::WorkerPool;

type Dispatcher = NotificationDispatcher<SqliteStore, ReqwestHttpClient>;

/// A fully wired hub: store, queue, dispatcher and background tasks.
pub struct Hub {
    config: Config,
    store: Arc<SqliteStore>,
    service: SubscriptionService<SqliteStore>,
    dispatcher: Arc<Dispatcher>,
    queue: JobQueue,
    rx: mpsc::Receiver<QueuedJob>,
}

impl Hub {
    /// Open the subscription store and build every component from `config`.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting hub with configuration: {:#?}", config);

        let store = Arc::new(SqliteStore::open_with(&config.database.path, config.database.store_options()).await?);

        let (queue, rx) = JobQueue::new(config.workers.queue_capacity);
        let dispatcher = Arc::new(NotificationDispatcher::new(
            store.clone(),
            ReqwestHttpClient::new(),
            queue.clone(),
            config.dispatcher(),
        ));
        let service = SubscriptionService::new(store.clone(), config.lease.clone());

        Ok(Self {
            config,
            store,
            service,
            dispatcher,
            queue,
            rx,
        })
    }

    pub fn service(&self) -> &SubscriptionService<SqliteStore> {
        &self.service
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Schedule a fetch and fan-out for `topic`, as after a publisher ping.
    pub fn publish(&self, topic: &str) -> Result<JobId> {
        self.queue.enqueue(Job::Fetch {
            topic: topic.to_string(),
        })
    }

    /// Run the worker pool, lease janitor and topic poller until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let Hub {
            config,
            store,
            dispatcher,
            queue,
            rx,
            ..
        } = self;

        let token = CancellationToken::new();
        let mut tasks = JoinSet::new();

        let pool = WorkerPool::new(
            dispatcher,
            queue.clone(),
            config.workers.retry_schedule.clone(),
            config.workers.max_concurrent_jobs,
        );
        tasks.spawn(pool.run(rx, token.clone()));
        tasks.spawn(janitor::run_janitor(
            store.clone(),
            config.janitor.sweep_interval,
            token.clone(),
        ));
        tasks.spawn(poller::run_poller(
            queue,
            config.poller.topics.clone(),
            config.poller.interval,
            token.clone(),
        ));

        info!("Hub running");
        shutdown.await;

        info!("Stopping background tasks...");
        token.cancel();
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Background task failed");
            }
        }

        info!("Closing database connections...");
        store.close().await;
        Ok(())
    }
}
