//! HTTP client abstraction for fetching topics and delivering notifications.
//!
//! This module defines the `HttpClient` trait to abstract HTTP request execution,
//! enabling testability with mock implementations.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::Method;
use reqwest::header::CONTENT_TYPE;

use crate::error::{HubError, Result};

/// An outbound HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    /// Bound on the whole exchange, including reading the response body
    pub timeout: Duration,
    /// Abort once the response body grows past this many bytes
    pub max_body_bytes: Option<usize>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: Vec::new(),
            body: Bytes::new(),
            timeout,
            max_body_bytes: None,
        }
    }

    pub fn post(url: impl Into<String>, body: Bytes, timeout: Duration) -> Self {
        Self {
            method: Method::POST,
            body,
            ..Self::get(url, timeout)
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = Some(limit);
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Response from an HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Value of the Content-Type header, if any
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            content_type: None,
            body: body.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Trait for executing HTTP requests.
///
/// Transport failures (connection refused, timeout, oversized body) are
/// returned as `HubError::Http`; any status code, including errors, is a
/// successful `HttpResponse`.
#[async_trait]
pub trait HttpClient: Send + Sync + Clone + 'static {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

// ============================================================================
// Production Implementation using reqwest
// ============================================================================

/// Production HTTP client using reqwest.
#[derive(Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

fn transport_error(url: &str, timeout: Duration, e: reqwest::Error) -> HubError {
    if e.is_timeout() {
        HubError::Http(format!("{url}: timed out after {timeout:?}"))
    } else {
        HubError::Http(format!("{url}: {e}"))
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    #[tracing::instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .timeout(request.timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(&request.url, request.timeout, e))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if let (Some(limit), Some(declared)) = (request.max_body_bytes, response.content_length()) {
            if declared > limit as u64 {
                return Err(HubError::Http(format!(
                    "{}: response body of {declared} bytes exceeds limit of {limit}",
                    request.url
                )));
            }
        }

        // Read chunk by chunk so an undeclared oversized body is cut off early.
        let mut body = BytesMut::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| transport_error(&request.url, request.timeout, e))?;
            if let Some(limit) = request.max_body_bytes {
                if body.len() + chunk.len() > limit {
                    return Err(HubError::Http(format!(
                        "{}: response body exceeds limit of {limit} bytes",
                        request.url
                    )));
                }
            }
            body.extend_from_slice(&chunk);
        }

        tracing::debug!(status, response_len = body.len(), "HTTP request completed");

        Ok(HttpResponse {
            status,
            content_type,
            body: body.freeze(),
        })
    }
}

// ============================================================================
// Test/Mock Implementation
// ============================================================================

/// Mock HTTP client for testing.
///
/// Responses are queued per `"{METHOD} {url}"` key and returned in FIFO order.
/// Every call is recorded.
#[derive(Clone, Default)]
pub struct MockHttpClient {
    responses: Arc<Mutex<HashMap<String, Vec<Result<HttpResponse>>>>>,
    calls: Arc<Mutex<Vec<HttpRequest>>>,
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for `"{METHOD} {url}"`.
    pub fn add_response(&self, key: &str, response: Result<HttpResponse>) {
        self.responses
            .lock()
            .entry(key.to_string())
            .or_default()
            .push(response);
    }

    /// Get all calls that have been made to this mock client.
    pub fn get_calls(&self) -> Vec<HttpRequest> {
        self.calls.lock().clone()
    }

    /// Get the number of calls made.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        self.calls.lock().push(request.clone());

        let key = format!("{} {}", request.method, request.url);
        let mut responses = self.responses.lock();

        if let Some(queue) = responses.get_mut(&key) {
            if !queue.is_empty() {
                return queue.remove(0);
            }
        }

        Err(HubError::Http(format!("No mock response configured for {key}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_bytes, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_mock_client_fifo_and_recording() {
        let mock = MockHttpClient::new();
        mock.add_response("GET https://example.com/feed", Ok(HttpResponse::new(200, "first")));
        mock.add_response("GET https://example.com/feed", Ok(HttpResponse::new(200, "second")));

        let request = HttpRequest::get("https://example.com/feed", Duration::from_secs(3));
        assert_eq!(mock.send(&request).await.unwrap().body, Bytes::from("first"));
        assert_eq!(mock.send(&request).await.unwrap().body, Bytes::from("second"));
        assert!(mock.send(&request).await.is_err());
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_reqwest_client_sends_headers_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/cb"))
            .and(header("X-Test", "yes"))
            .and(body_bytes(b"payload".to_vec()))
            .respond_with(ResponseTemplate::new(202).set_body_raw("ok", "text/plain"))
            .expect(1)
            .mount(&server)
            .await;

        let client = ReqwestHttpClient::new();
        let request = HttpRequest::post(format!("{}/cb", server.uri()), Bytes::from("payload"), Duration::from_secs(3))
            .header("X-Test", "yes");

        let response = client.send(&request).await.unwrap();
        assert_eq!(response.status, 202);
        assert_eq!(response.content_type.as_deref(), Some("text/plain"));
        assert_eq!(response.body, Bytes::from("ok"));
    }

    #[tokio::test]
    async fn test_reqwest_client_enforces_body_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'a'; 4096]))
            .mount(&server)
            .await;

        let client = ReqwestHttpClient::new();
        let request = HttpRequest::get(server.uri(), Duration::from_secs(3)).max_body_bytes(1024);

        let result = client.send(&request).await;
        assert!(matches!(result, Err(HubError::Http(msg)) if msg.contains("exceeds")));
    }

    #[tokio::test]
    async fn test_reqwest_client_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let client = ReqwestHttpClient::new();
        let request = HttpRequest::get(server.uri(), Duration::from_millis(200));

        let result = client.send(&request).await;
        assert!(matches!(result, Err(HubError::Http(msg)) if msg.contains("timed out")));
    }

    #[tokio::test]
    async fn test_reqwest_client_connection_refused() {
        let client = ReqwestHttpClient::new();
        let request = HttpRequest::get("http://127.0.0.1:1", Duration::from_secs(1));
        assert!(matches!(client.send(&request).await, Err(HubError::Http(_))));
    }
}
