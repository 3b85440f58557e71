//! Retrieval of topic content from the publisher's origin server.

use std::time::Duration;

use bytes::Bytes;
use metrics::counter;

use crate::error::{HubError, Result};
use crate::http::{HttpClient, HttpRequest};

/// Default bound on a topic fetch. Hub requests should be answered quickly,
/// so a few seconds is enough even for slow or distant origins.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Default cap on the size of a fetched topic body.
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Current representation of a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedContent {
    pub body: Bytes,
    pub content_type: Option<String>,
    pub status: u16,
}

/// Stateless, retry-free fetcher for topic URLs.
#[derive(Clone)]
pub struct ContentFetcher<H: HttpClient> {
    client: H,
    timeout: Duration,
    max_body_bytes: usize,
}

impl<H: HttpClient> ContentFetcher<H> {
    pub fn new(client: H, timeout: Duration, max_body_bytes: usize) -> Self {
        Self {
            client,
            timeout,
            max_body_bytes,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// GET the topic. Timeouts, transport errors and non-2xx statuses all fail
    /// with `HubError::Fetch`; deciding whether to try again is up to the caller.
    #[tracing::instrument(skip(self))]
    pub async fn fetch(&self, topic: &str) -> Result<FetchedContent> {
        let request = HttpRequest::get(topic, self.timeout).max_body_bytes(self.max_body_bytes);

        let response = match self.client.send(&request).await {
            Ok(response) => response,
            Err(e) => {
                counter!("websub_fetches_total", "outcome" => "error").increment(1);
                tracing::warn!(error = %e, "Topic fetch failed");
                return Err(HubError::Fetch {
                    topic: topic.to_string(),
                    status: None,
                    reason: e.to_string(),
                });
            }
        };

        if !response.is_success() {
            counter!("websub_fetches_total", "outcome" => "bad_status").increment(1);
            tracing::warn!(status = response.status, "Topic fetch returned error status");
            return Err(HubError::Fetch {
                topic: topic.to_string(),
                status: Some(response.status),
                reason: format!("HTTP {}", response.status),
            });
        }

        counter!("websub_fetches_total", "outcome" => "success").increment(1);
        tracing::debug!(status = response.status, len = response.body.len(), "Fetched topic");

        Ok(FetchedContent {
            body: response.body,
            content_type: response.content_type,
            status: response.status,
        })
    }
}
