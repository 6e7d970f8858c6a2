use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;

const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Hard ceiling on attempts regardless of configuration.
const ATTEMPT_CEILING: u32 = 10;

/// Errors that can occur while talking to the upstream API.
///
/// `Network` and `Timeout` mean no response was received at all, while
/// `UpstreamStatus` carries the status of a response that did arrive. Callers
/// rely on that split to read a 404 as "not found" instead of an outage.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Request exceeded the per-attempt timeout
    #[error("Request timed out")]
    Timeout,
    /// Upstream answered with a non-2xx status code
    #[error("Upstream error: status {0}")]
    UpstreamStatus(u16),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Body was received but did not have the expected shape
    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl FetchError {
    /// Returns true if this error is transient and the request should be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network(_) | FetchError::Timeout => true,
            FetchError::UpstreamStatus(status) => *status >= 500 || *status == 429,
            FetchError::ResponseTooLarge | FetchError::Malformed(_) => false,
        }
    }

    /// True for a 404 from upstream.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::UpstreamStatus(404))
    }
}

/// Bounded exponential backoff settings for [`Fetcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one (clamped to 1..=10)
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for every following retry
    pub base_delay: Duration,
    /// Upper bound for the exponential part of the delay
    pub max_delay: Duration,
    /// Random jitter added on top of every delay, drawn from `0..=max_jitter`
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            max_jitter: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    pub fn attempts(&self) -> u32 {
        self.max_attempts.clamp(1, ATTEMPT_CEILING)
    }

    /// Delay before retry number `retry` (0-based), without jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    fn delay_with_jitter(&self, retry: u32) -> Duration {
        let jitter_ms = self.max_jitter.as_millis() as f64 * rand::random::<f64>();
        self.backoff(retry) + Duration::from_millis(jitter_ms as u64)
    }
}

/// Single-request HTTP GET wrapper with bounded retry.
///
/// Does no caching of its own; every call hits the network.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    policy: RetryPolicy,
    timeout: Duration,
}

impl Fetcher {
    pub fn new(client: reqwest::Client, policy: RetryPolicy, timeout: Duration) -> Self {
        Self {
            client,
            policy,
            timeout,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// GET `url`, retrying transient failures.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Network`] / [`FetchError::Timeout`] - no response after the last attempt
    /// - [`FetchError::UpstreamStatus`] - non-2xx status; 5xx and 429 only after the last attempt,
    ///   other statuses immediately
    pub async fn get(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        let attempts = self.policy.attempts();
        let mut attempt = 1;

        loop {
            match self.send_once(url).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    let delay = self.policy.delay_with_jitter(attempt - 1);
                    tracing::debug!(
                        url = %url,
                        error = %e,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying upstream request after transient error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        tracing::warn!(url = %url, error = %e, attempts = attempt, "Upstream request failed after retries");
                    }
                    return Err(e);
                }
            }
        }
    }

    /// GET `url` and decode the body as JSON.
    ///
    /// Decoding failures are reported as [`FetchError::Malformed`] and are never retried.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let response = self.get(url).await?;
        let bytes = read_limited_bytes(response, MAX_RESPONSE_SIZE).await?;
        serde_json::from_slice(&bytes).map_err(|e| FetchError::Malformed(e.to_string()))
    }

    async fn send_once(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        let request = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json");

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(FetchError::Network)?;

        if !response.status().is_success() {
            return Err(FetchError::UpstreamStatus(response.status().as_u16()));
        }

        Ok(response)
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{any, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_fetcher(max_attempts: u32) -> Fetcher {
        let policy = RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            max_jitter: Duration::ZERO,
        };
        Fetcher::new(reqwest::Client::new(), policy, Duration::from_secs(5))
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            max_jitter: Duration::ZERO,
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(500));
        assert_eq!(policy.backoff(40), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            max_jitter: Duration::from_millis(200),
        };
        for _ in 0..100 {
            let delay = policy.delay_with_jitter(0);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(300));
        }
    }

    #[test]
    fn test_attempts_are_bounded() {
        let mut policy = RetryPolicy::default();
        policy.max_attempts = 0;
        assert_eq!(policy.attempts(), 1);
        policy.max_attempts = 1_000;
        assert_eq!(policy.attempts(), ATTEMPT_CEILING);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(FetchError::Timeout.is_retryable());
        assert!(FetchError::UpstreamStatus(500).is_retryable());
        assert!(FetchError::UpstreamStatus(503).is_retryable());
        assert!(FetchError::UpstreamStatus(429).is_retryable());
        assert!(!FetchError::UpstreamStatus(404).is_retryable());
        assert!(!FetchError::Malformed("x".into()).is_retryable());
        assert!(FetchError::UpstreamStatus(404).is_not_found());
    }

    #[tokio::test]
    async fn test_persistent_500_retries_exactly_max_attempts() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&mock_server)
            .await;

        let fetcher = fast_fetcher(3);
        let result = fetcher.get(&format!("{}/chapter", mock_server.uri())).await;

        match result {
            Err(FetchError::UpstreamStatus(500)) => {}
            other => panic!("Expected UpstreamStatus(500), got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_success_is_not_retried() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let fetcher = fast_fetcher(5);
        let result = fetcher.get(&format!("{}/chapter", mock_server.uri())).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_503_retry_then_success() {
        let mock_server = MockServer::start().await;

        // First two requests return 503, third succeeds
        Mock::given(any())
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&mock_server)
            .await;

        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":true}"#))
            .mount(&mock_server)
            .await;

        let fetcher = fast_fetcher(3);
        let value: serde_json::Value = fetcher
            .get_json(&format!("{}/genre", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(value["ok"], true);
    }

    #[tokio::test]
    async fn test_404_fails_immediately() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&mock_server)
            .await;

        let fetcher = fast_fetcher(4);
        let err = fetcher
            .get(&format!("{}/comic/missing/", mock_server.uri()))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_network_error_is_reported_as_network() {
        // Nothing listens on port 9 on loopback
        let fetcher = fast_fetcher(2);
        let err = fetcher.get("http://127.0.0.1:9/chapter").await.unwrap_err();
        assert!(matches!(err, FetchError::Network(_) | FetchError::Timeout));
    }

    #[tokio::test]
    async fn test_invalid_json_is_malformed() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let fetcher = fast_fetcher(3);
        let result: Result<serde_json::Value, _> = fetcher
            .get_json(&format!("{}/genre", mock_server.uri()))
            .await;
        assert!(matches!(result, Err(FetchError::Malformed(_))));
    }
}
