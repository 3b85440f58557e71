//! Hub configuration.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The file path
//! defaults to `hub.yaml` and can be set with the `-f` flag or the `WEBSUB_HUB_CONFIG`
//! environment variable.
//!
//! Sources are merged in order, later ones winning:
//!
//! 1. **YAML config file** (default: `hub.yaml`)
//! 2. **Environment variables** prefixed with `WEBSUB_HUB_`
//!
//! Nested values use double underscores, e.g. `WEBSUB_HUB_WORKERS__MAX_CONCURRENT_JOBS=50`.
//!
//! ```yaml
//! hub_url: https://hub.example.com/
//! signature_algorithm: sha256
//! database:
//!   path: /var/lib/websub/hub.sqlite3
//! http:
//!   request_timeout: 3s
//! lease:
//!   default: 10days
//!   max: 30days
//! workers:
//!   max_concurrent_jobs: 20
//!   retry_schedule: [5, 30, 300]
//! poller:
//!   interval: 5m
//!   topics:
//!     - https://example.com/feed
//! ```

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::dispatcher::DispatcherConfig;
use crate::error::HubError;
use crate::fetch::{DEFAULT_MAX_BODY_BYTES, DEFAULT_REQUEST_TIMEOUT};
use crate::lease::{LeasePolicy, lease_expiry};
use crate::queue::RetryPolicy;
use crate::signing::Algorithm;
use crate::store::sqlite::SqliteStoreOptions;

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "WEBSUB_HUB_CONFIG", default_value = "hub.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the hub.
    #[arg(long)]
    pub validate: bool,
}

/// Root configuration. Every field has a default.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Public URL of this hub, advertised with `rel="hub"` in notification `Link` headers
    pub hub_url: Option<Url>,
    /// HMAC algorithm used to sign notifications for subscribers with a secret
    pub signature_algorithm: Algorithm,
    pub database: DatabaseConfig,
    pub http: HttpConfig,
    pub lease: LeasePolicy,
    pub workers: WorkerConfig,
    pub janitor: JanitorConfig,
    pub poller: PollerConfig,
}

/// SQLite subscription store settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Database file, created if missing (default: `websub.sqlite3`)
    pub path: PathBuf,
    pub max_connections: u32,
    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub busy_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let options = SqliteStoreOptions::default();
        Self {
            path: PathBuf::from("websub.sqlite3"),
            max_connections: options.max_connections,
            acquire_timeout: options.acquire_timeout,
            busy_timeout: options.busy_timeout,
        }
    }
}

impl DatabaseConfig {
    pub fn store_options(&self) -> SqliteStoreOptions {
        SqliteStoreOptions {
            max_connections: self.max_connections,
            acquire_timeout: self.acquire_timeout,
            busy_timeout: self.busy_timeout,
        }
    }
}

/// Outbound HTTP settings shared by topic fetches and deliveries.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConfig {
    /// Per-request timeout (default: 3s)
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Largest topic body accepted (default: 10 MiB)
    pub max_body_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    /// Jobs executing at once (default: 20)
    pub max_concurrent_jobs: usize,
    /// Jobs waiting before enqueue reports a full queue (default: 1000)
    pub queue_capacity: usize,
    /// Seconds to wait before each retry (default: 5s, 30s, 5m, 30m, 2h)
    pub retry_schedule: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 20,
            queue_capacity: 1000,
            retry_schedule: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct JanitorConfig {
    /// How often expired subscriptions are deleted (default: 10m)
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(10 * 60),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollerConfig {
    /// How often each topic is refetched (default: 5m)
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Topics refetched on a timer, for publishers that never ping the hub
    pub topics: Vec<String>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            topics: Vec::new(),
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            .merge(Yaml::file(&args.config))
            .merge(Env::prefixed("WEBSUB_HUB_").split("__"))
    }

    /// Check the configuration for values that would make the hub misbehave.
    pub fn validate(&self) -> Result<(), HubError> {
        if self.http.request_timeout.is_zero() {
            return Err(HubError::Config("http.request_timeout must be greater than zero".to_string()));
        }
        if self.http.max_body_bytes == 0 {
            return Err(HubError::Config("http.max_body_bytes must be greater than zero".to_string()));
        }
        if lease_expiry(Utc::now(), self.lease.max.as_secs()).is_err() {
            return Err(HubError::Config(format!("lease.max ({:?}) is too large", self.lease.max)));
        }
        if self.lease.min > self.lease.max {
            return Err(HubError::Config(format!(
                "lease.min ({:?}) cannot be greater than lease.max ({:?})",
                self.lease.min, self.lease.max
            )));
        }
        if self.workers.max_concurrent_jobs == 0 || self.workers.queue_capacity == 0 {
            return Err(HubError::Config(
                "workers.max_concurrent_jobs and workers.queue_capacity must be greater than zero".to_string(),
            ));
        }
        if self.janitor.sweep_interval.is_zero() {
            return Err(HubError::Config("janitor.sweep_interval must be greater than zero".to_string()));
        }
        if !self.poller.topics.is_empty() && self.poller.interval.is_zero() {
            return Err(HubError::Config("poller.interval must be greater than zero".to_string()));
        }
        for topic in &self.poller.topics {
            Url::parse(topic).map_err(|e| HubError::Config(format!("poller.topics: invalid URL '{topic}': {e}")))?;
        }
        Ok(())
    }

    pub fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig {
            hub_url: self.hub_url.as_ref().map(Url::to_string),
            signature_algorithm: self.signature_algorithm,
            request_timeout: self.http.request_timeout,
            max_body_bytes: self.http.max_body_bytes,
        }
    }
}
