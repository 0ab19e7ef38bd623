//! Probe runner for exercising gateway rate limits.
//!
//! Issues a bounded, sequential burst of chat-completion requests against
//! a single endpoint and classifies each terminal outcome. Results are
//! appended to a shared log as they arrive so observers can render live
//! progress while the run is still going.

use crate::models::{Outcome, ProbeResult, ResultLog};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Configuration for one probe run.
///
/// Supplied by the caller per run and never mutated by the runner.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Gateway base URL, without trailing slash.
    pub gateway_url: String,
    /// Subscription key sent in the `api-key` header.
    pub api_key: String,
    /// Model deployment name on the completions route.
    pub model_name: String,
    /// API version query parameter.
    pub api_version: String,
    /// Number of requests to issue. Must be at least 1.
    pub request_count: usize,
    /// Delay between consecutive requests in milliseconds.
    pub delay_ms: u64,
    /// Per-request timeout in seconds.
    pub timeout_seconds: u64,
    /// `max_tokens` requested per completion.
    pub max_tokens: u32,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            gateway_url: String::new(),
            api_key: String::new(),
            model_name: "gpt-4o-mini".to_string(),
            api_version: "2024-02-01".to_string(),
            request_count: 20,
            delay_ms: 100,
            timeout_seconds: 30,
            max_tokens: 100,
        }
    }
}

/// Cooperative cancellation flag.
///
/// Checked at the inter-request boundary only; an in-flight request runs
/// to its own timeout before cancellation takes effect. Results recorded
/// before cancellation remain valid.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }
}

/// Chat-completion request body.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    messages: Vec<ChatMessage>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

/// The subset of the completion response we read.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u64,
}

/// The probe runner.
pub struct ProbeRunner {
    config: ProbeConfig,
    http_client: reqwest::Client,
}

impl ProbeRunner {
    /// Creates a runner with an HTTP client bound to the configured timeout.
    pub fn new(config: ProbeConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            config,
            http_client,
        })
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.config.gateway_url.trim_end_matches('/'),
            self.config.model_name,
            self.config.api_version
        )
    }

    /// Runs the configured burst, appending one result per request to `log`.
    ///
    /// The log is cleared first; exactly one request is in flight at a time.
    /// `prompt_for` maps the 1-based request index to the request payload
    /// and should vary per index to avoid gateway-side caching artifacts.
    /// `notify` is invoked after every append. Per-request failures never
    /// abort the run; they are recorded as classified results.
    ///
    /// Returns the number of requests actually issued, which is short of
    /// `request_count` when the run was cancelled.
    pub async fn run<P, F>(
        &self,
        log: &ResultLog,
        cancel: &CancelToken,
        prompt_for: P,
        mut notify: F,
    ) -> usize
    where
        P: Fn(usize) -> String,
        F: FnMut(&ProbeResult),
    {
        info!(
            "Starting probe run: {} requests, {}ms delay, {}s timeout",
            self.config.request_count, self.config.delay_ms, self.config.timeout_seconds
        );
        log.clear();

        for index in 1..=self.config.request_count {
            if cancel.is_cancelled() {
                warn!("Probe run cancelled after {} requests", index - 1);
                return index - 1;
            }

            let result = self.send_probe(index, prompt_for(index)).await;
            debug!(
                "Request {}: {} (status {}, {}ms)",
                index, result.outcome, result.status, result.latency_ms
            );

            log.append(result.clone());
            notify(&result);

            // No delay after the final request.
            if index < self.config.request_count && self.config.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.delay_ms)).await;
            }
        }

        self.config.request_count
    }

    /// Issues one request and classifies its terminal outcome.
    ///
    /// Latency is measured from immediately before send until the response
    /// head is received; reading the body for token usage is excluded.
    async fn send_probe(&self, index: usize, prompt: String) -> ProbeResult {
        let payload = ChatCompletionRequest {
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt,
            }],
            max_tokens: self.config.max_tokens,
        };

        let start = Instant::now();
        let response = self
            .http_client
            .post(self.completions_url())
            .header("api-key", &self.config.api_key)
            .json(&payload)
            .send()
            .await;
        let latency_ms = start.elapsed().as_millis() as u64;

        match response {
            Ok(resp) => self.classify_response(index, resp, latency_ms).await,
            Err(err) => classify_error(index, &err, latency_ms),
        }
    }

    async fn classify_response(
        &self,
        index: usize,
        resp: reqwest::Response,
        latency_ms: u64,
    ) -> ProbeResult {
        let status = resp.status().as_u16();

        match status {
            200 => {
                let tokens = resp
                    .json::<ChatCompletionResponse>()
                    .await
                    .ok()
                    .and_then(|body| body.usage)
                    .map(|usage| usage.total_tokens)
                    .unwrap_or(0);

                ProbeResult {
                    index,
                    outcome: Outcome::Success,
                    status: 200,
                    tokens,
                    latency_ms,
                    retry_after: None,
                }
            }
            429 => {
                let retry_after = resp
                    .headers()
                    .get("Retry-After")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("N/A")
                    .to_string();

                ProbeResult {
                    index,
                    outcome: Outcome::RateLimited,
                    status: 429,
                    tokens: 0,
                    latency_ms,
                    retry_after: Some(retry_after),
                }
            }
            other => ProbeResult {
                index,
                outcome: Outcome::OtherError,
                status: other,
                tokens: 0,
                latency_ms,
                retry_after: None,
            },
        }
    }
}

/// Maps a transport-level failure to its outcome class.
///
/// A connect-phase timeout satisfies both conditions; the connection check
/// runs first to match the classification priority.
fn classify_error(index: usize, err: &reqwest::Error, latency_ms: u64) -> ProbeResult {
    let outcome = if err.is_connect() {
        Outcome::ConnectionError
    } else if err.is_timeout() {
        Outcome::Timeout
    } else {
        Outcome::UnknownError
    };

    ProbeResult {
        index,
        outcome,
        status: 0,
        tokens: 0,
        latency_ms,
        retry_after: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn test_config(gateway_url: &str, request_count: usize, delay_ms: u64) -> ProbeConfig {
        ProbeConfig {
            gateway_url: gateway_url.to_string(),
            api_key: "test-key".to_string(),
            model_name: "gpt-test".to_string(),
            api_version: "2024-02-01".to_string(),
            request_count,
            delay_ms,
            timeout_seconds: 5,
            max_tokens: 100,
        }
    }

    const COMPLETIONS_PATH: &str = "/openai/deployments/gpt-test/chat/completions";

    async fn run_single(config: ProbeConfig) -> ProbeResult {
        let runner = ProbeRunner::new(config).unwrap();
        let log = ResultLog::new();
        let cancel = CancelToken::new();

        let issued = runner
            .run(&log, &cancel, |i| format!("Say hello {}", i), |_| {})
            .await;
        assert_eq!(issued, 1);

        log.snapshot().into_iter().next().unwrap()
    }

    #[tokio::test]
    async fn test_success_parses_token_usage() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", COMPLETIONS_PATH)
            .match_query(Matcher::Any)
            .match_header("api-key", "test-key")
            .with_status(200)
            .with_body(r#"{"usage": {"total_tokens": 42}}"#)
            .create_async()
            .await;

        let result = run_single(test_config(&server.url(), 1, 0)).await;
        assert_eq!(result.outcome, Outcome::Success);
        assert_eq!(result.status, 200);
        assert_eq!(result.tokens, 42);
        assert!(result.retry_after.is_none());
    }

    #[tokio::test]
    async fn test_success_with_unparseable_body_counts_zero_tokens() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", COMPLETIONS_PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let result = run_single(test_config(&server.url(), 1, 0)).await;
        assert_eq!(result.outcome, Outcome::Success);
        assert_eq!(result.tokens, 0);
    }

    #[tokio::test]
    async fn test_rate_limited_captures_retry_hint() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", COMPLETIONS_PATH)
            .match_query(Matcher::Any)
            .with_status(429)
            .with_header("Retry-After", "5")
            .create_async()
            .await;

        let result = run_single(test_config(&server.url(), 1, 0)).await;
        assert_eq!(result.outcome, Outcome::RateLimited);
        assert_eq!(result.status, 429);
        assert_eq!(result.tokens, 0);
        assert_eq!(result.retry_after.as_deref(), Some("5"));
    }

    #[tokio::test]
    async fn test_rate_limited_without_header_reports_na() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", COMPLETIONS_PATH)
            .match_query(Matcher::Any)
            .with_status(429)
            .create_async()
            .await;

        let result = run_single(test_config(&server.url(), 1, 0)).await;
        assert_eq!(result.outcome, Outcome::RateLimited);
        assert_eq!(result.retry_after.as_deref(), Some("N/A"));
    }

    #[tokio::test]
    async fn test_server_error_is_classified_other() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", COMPLETIONS_PATH)
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let result = run_single(test_config(&server.url(), 1, 0)).await;
        assert_eq!(result.outcome, Outcome::OtherError);
        assert_eq!(result.status, 503);
        assert_eq!(result.tokens, 0);
    }

    #[tokio::test]
    async fn test_connection_refused_is_connection_error() {
        // Nothing listens on port 1.
        let result = run_single(test_config("http://127.0.0.1:1", 1, 0)).await;
        assert_eq!(result.outcome, Outcome::ConnectionError);
        assert_eq!(result.status, 0);
        assert_eq!(result.tokens, 0);
        assert!(result.retry_after.is_none());
    }

    #[tokio::test]
    async fn test_indices_are_sequential_and_complete() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", COMPLETIONS_PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"usage": {"total_tokens": 10}}"#)
            .expect(3)
            .create_async()
            .await;

        let runner = ProbeRunner::new(test_config(&server.url(), 3, 0)).unwrap();
        let log = ResultLog::new();
        let cancel = CancelToken::new();

        let issued = runner
            .run(&log, &cancel, |i| format!("Say hello {}", i), |_| {})
            .await;

        assert_eq!(issued, 3);
        let indices: Vec<usize> = log.snapshot().iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_delay_applies_between_requests() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", COMPLETIONS_PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"usage": {"total_tokens": 1}}"#)
            .expect(3)
            .create_async()
            .await;

        let runner = ProbeRunner::new(test_config(&server.url(), 3, 100)).unwrap();
        let log = ResultLog::new();
        let cancel = CancelToken::new();

        let start = Instant::now();
        runner
            .run(&log, &cancel, |i| format!("Say hello {}", i), |_| {})
            .await;

        // Two inter-request delays, none after the last request.
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_cancellation_preserves_recorded_results() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", COMPLETIONS_PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"usage": {"total_tokens": 7}}"#)
            .create_async()
            .await;

        let runner = ProbeRunner::new(test_config(&server.url(), 10, 0)).unwrap();
        let log = ResultLog::new();
        let cancel = CancelToken::new();

        let observer_cancel = cancel.clone();
        let issued = runner
            .run(
                &log,
                &cancel,
                |i| format!("Say hello {}", i),
                |_| observer_cancel.cancel(),
            )
            .await;

        assert_eq!(issued, 1);
        let snapshot = log.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].index, 1);
        assert_eq!(snapshot[0].tokens, 7);
    }

    #[tokio::test]
    async fn test_run_clears_previous_results() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", COMPLETIONS_PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"usage": {"total_tokens": 1}}"#)
            .expect(2)
            .create_async()
            .await;

        let runner = ProbeRunner::new(test_config(&server.url(), 1, 0)).unwrap();
        let log = ResultLog::new();

        runner
            .run(&log, &CancelToken::new(), |_| "hello".to_string(), |_| {})
            .await;
        runner
            .run(&log, &CancelToken::new(), |_| "hello".to_string(), |_| {})
            .await;

        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_completions_url_shape() {
        let runner = ProbeRunner::new(test_config("https://my-apim.azure-api.net/", 1, 0)).unwrap();
        assert_eq!(
            runner.completions_url(),
            "https://my-apim.azure-api.net/openai/deployments/gpt-test/chat/completions?api-version=2024-02-01"
        );
    }
}
