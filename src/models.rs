//! Data models for the rate-limit probe.
//!
//! This module contains the core data structures used throughout
//! the application for representing probe outcomes, the shared
//! result log, and run summaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Terminal outcome category of a single probe request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// HTTP 200 with a completion body.
    Success,
    /// HTTP 429 - the gateway throttled the request. Expected, not a fault.
    RateLimited,
    /// The request exceeded the configured timeout.
    Timeout,
    /// The connection could not be established.
    ConnectionError,
    /// Any other HTTP status.
    OtherError,
    /// Catch-all for unclassified failures during request execution.
    UnknownError,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "Success"),
            Outcome::RateLimited => write!(f, "Rate Limited"),
            Outcome::Timeout => write!(f, "Timeout"),
            Outcome::ConnectionError => write!(f, "Connection Error"),
            Outcome::OtherError => write!(f, "Error"),
            Outcome::UnknownError => write!(f, "Unknown Error"),
        }
    }
}

impl Outcome {
    /// Returns an emoji representation for console output.
    pub fn emoji(&self) -> &'static str {
        match self {
            Outcome::Success => "✅",
            Outcome::RateLimited => "🚫",
            _ => "❌",
        }
    }
}

/// The classified result of one probe request.
///
/// Created exactly once per request attempt and immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    /// 1-based sequence index, assigned in issue order.
    pub index: usize,
    /// Terminal outcome classification.
    pub outcome: Outcome,
    /// HTTP status code; 0 when no response was received.
    pub status: u16,
    /// Tokens consumed per `usage.total_tokens`; 0 when unavailable.
    pub tokens: u64,
    /// Wall-clock latency in milliseconds.
    pub latency_ms: u64,
    /// Server-supplied retry hint. Present only for throttled responses;
    /// "N/A" when the gateway sent no `Retry-After` header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<String>,
}

/// Ordered, append-only log of probe results for one run.
///
/// There is exactly one writer (the probe runner) and any number of
/// readers. Readers work on a `snapshot()` so a summary is computed over
/// a consistent view even while the log grows.
#[derive(Clone, Default)]
pub struct ResultLog {
    entries: Arc<RwLock<Vec<ProbeResult>>>,
}

impl ResultLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a result. Visible to all observers immediately.
    pub fn append(&self, result: ProbeResult) {
        self.entries
            .write()
            .expect("result log lock poisoned")
            .push(result);
    }

    /// Copies the current entries for consistent iteration.
    pub fn snapshot(&self) -> Vec<ProbeResult> {
        self.entries
            .read()
            .expect("result log lock poisoned")
            .clone()
    }

    /// Number of results recorded so far.
    #[allow(dead_code)] // Observer utility (summaries read snapshots directly)
    pub fn len(&self) -> usize {
        self.entries.read().expect("result log lock poisoned").len()
    }

    /// Returns true when no results have been recorded.
    #[allow(dead_code)] // Observer utility (summaries read snapshots directly)
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discards all entries. Called at the start of the next run.
    pub fn clear(&self) {
        self.entries
            .write()
            .expect("result log lock poisoned")
            .clear();
    }
}

/// Latency distribution over one run, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub min_ms: u64,
    pub max_ms: u64,
    pub mean_ms: f64,
    pub p95_ms: u64,
}

impl LatencyStats {
    /// Computes stats from raw latencies. Returns `None` for empty input.
    pub fn from_latencies(latencies: &[u64]) -> Option<Self> {
        if latencies.is_empty() {
            return None;
        }

        let mut sorted = latencies.to_vec();
        sorted.sort_unstable();

        let sum: u64 = sorted.iter().sum();
        let p95_index = ((sorted.len() - 1) as f64 * 0.95).round() as usize;

        Some(Self {
            min_ms: sorted[0],
            max_ms: sorted[sorted.len() - 1],
            mean_ms: sum as f64 / sorted.len() as f64,
            p95_ms: sorted[p95_index],
        })
    }
}

/// Summary statistics derived from a result log.
///
/// Always a pure function of the log contents; recomputed on demand and
/// never persisted independently.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Total number of results.
    pub total: usize,
    /// Results classified Success (status 200).
    pub success: usize,
    /// Results classified Rate Limited (status 429).
    pub rate_limited: usize,
    /// Sum of token counts across all results.
    pub token_sum: u64,
    /// Count per outcome label, covering only labels actually present.
    pub by_outcome: HashMap<String, usize>,
    /// Latency distribution; `None` for an empty log.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<LatencyStats>,
}

impl Summary {
    /// Folds a result slice into summary statistics.
    pub fn from_results(results: &[ProbeResult]) -> Self {
        let mut summary = Self::default();
        summary.total = results.len();

        let mut latencies = Vec::with_capacity(results.len());
        for result in results {
            match result.outcome {
                Outcome::Success => summary.success += 1,
                Outcome::RateLimited => summary.rate_limited += 1,
                _ => {}
            }

            summary.token_sum += result.tokens;
            latencies.push(result.latency_ms);

            *summary
                .by_outcome
                .entry(result.outcome.to_string())
                .or_insert(0) += 1;
        }

        summary.latency = LatencyStats::from_latencies(&latencies);
        summary
    }
}

/// Metadata about one probe run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Gateway base URL that was probed.
    pub gateway_url: String,
    /// Model deployment name.
    pub model_name: String,
    /// API version used on the completions endpoint.
    pub api_version: String,
    /// Configured tokens-per-minute limit, for context.
    pub tpm_limit: u64,
    /// Date and time the run started.
    pub run_date: DateTime<Utc>,
    /// Number of requests actually issued (short when cancelled).
    pub request_count: usize,
    /// Inter-request delay in milliseconds.
    pub delay_ms: u64,
    /// Wall-clock duration of the run in seconds.
    pub duration_seconds: f64,
}

/// The complete record of a probe run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Metadata about the run.
    pub metadata: ReportMetadata,
    /// Per-request results in issue order.
    pub results: Vec<ProbeResult>,
    /// Summary statistics over `results`.
    pub summary: Summary,
    /// Gateway-side traffic metrics, when fetched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traffic: Option<crate::metrics::TrafficMetrics>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(index: usize, outcome: Outcome, status: u16, tokens: u64) -> ProbeResult {
        ProbeResult {
            index,
            outcome,
            status,
            tokens,
            latency_ms: 100,
            retry_after: None,
        }
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(Outcome::Success.to_string(), "Success");
        assert_eq!(Outcome::RateLimited.to_string(), "Rate Limited");
        assert_eq!(Outcome::ConnectionError.to_string(), "Connection Error");
    }

    #[test]
    fn test_outcome_emoji() {
        assert_eq!(Outcome::Success.emoji(), "✅");
        assert_eq!(Outcome::RateLimited.emoji(), "🚫");
        assert_eq!(Outcome::Timeout.emoji(), "❌");
        assert_eq!(Outcome::OtherError.emoji(), "❌");
    }

    #[test]
    fn test_result_log_append_and_snapshot() {
        let log = ResultLog::new();
        assert!(log.is_empty());

        log.append(result(1, Outcome::Success, 200, 40));
        log.append(result(2, Outcome::RateLimited, 429, 0));

        let snapshot = log.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].index, 1);
        assert_eq!(snapshot[1].index, 2);

        // Appending after a snapshot must not mutate the copy.
        log.append(result(3, Outcome::Success, 200, 38));
        assert_eq!(snapshot.len(), 2);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn test_result_log_clear() {
        let log = ResultLog::new();
        log.append(result(1, Outcome::Success, 200, 40));
        log.clear();
        assert!(log.is_empty());
        assert!(log.snapshot().is_empty());
    }

    #[test]
    fn test_empty_summary() {
        let summary = Summary::from_results(&[]);
        assert_eq!(summary.total, 0);
        assert_eq!(summary.success, 0);
        assert_eq!(summary.rate_limited, 0);
        assert_eq!(summary.token_sum, 0);
        assert!(summary.by_outcome.is_empty());
        assert!(summary.latency.is_none());
    }

    #[test]
    fn test_summary_counts() {
        let results = vec![
            result(1, Outcome::Success, 200, 42),
            result(2, Outcome::Success, 200, 38),
            result(3, Outcome::RateLimited, 429, 0),
            result(4, Outcome::OtherError, 503, 0),
        ];

        let summary = Summary::from_results(&results);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.success, 2);
        assert_eq!(summary.rate_limited, 1);
        assert_eq!(summary.token_sum, 80);
        assert_eq!(summary.by_outcome.get("Success"), Some(&2));
        assert_eq!(summary.by_outcome.get("Rate Limited"), Some(&1));
        assert_eq!(summary.by_outcome.get("Error"), Some(&1));
        assert_eq!(summary.by_outcome.get("Timeout"), None);
    }

    #[test]
    fn test_summary_is_order_independent() {
        let mut results = vec![
            result(1, Outcome::Success, 200, 42),
            result(2, Outcome::RateLimited, 429, 0),
            result(3, Outcome::Success, 200, 38),
        ];
        let forward = Summary::from_results(&results);
        results.reverse();
        let backward = Summary::from_results(&results);

        assert_eq!(forward.success, backward.success);
        assert_eq!(forward.rate_limited, backward.rate_limited);
        assert_eq!(forward.token_sum, backward.token_sum);
        assert_eq!(forward.by_outcome, backward.by_outcome);
    }

    #[test]
    fn test_latency_stats() {
        let stats = LatencyStats::from_latencies(&[100, 200, 300, 400]).unwrap();
        assert_eq!(stats.min_ms, 100);
        assert_eq!(stats.max_ms, 400);
        assert_eq!(stats.mean_ms, 250.0);
        assert_eq!(stats.p95_ms, 400);

        assert!(LatencyStats::from_latencies(&[]).is_none());
    }
}
