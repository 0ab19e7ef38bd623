//! Azure Monitor traffic metrics via the `az` CLI.
//!
//! The gateway's own request counts come from Azure Monitor rather than
//! from the probe, so this module shells out to the Azure CLI and reduces
//! its JSON payload to a compact per-minute timeline. Azure Monitor data
//! lags live traffic by a minute or two.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

/// How far back the reduced timeline reaches, in one-minute buckets.
const TIMELINE_WINDOW: usize = 15;

/// Seconds to wait for `az --version` while probing candidate paths.
const DETECT_TIMEOUT_SECS: u64 = 5;

/// Seconds to wait for a metrics query.
const FETCH_TIMEOUT_SECS: u64 = 60;

/// Errors from the metrics collaborator.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Azure CLI not found; tried {0} candidate locations")]
    CliNotFound(usize),

    #[error("Azure CLI command timed out after {0}s")]
    Timeout(u64),

    #[error("Azure CLI failed: {0}")]
    CommandFailed(String),

    #[error("failed to launch Azure CLI: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected metrics payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

/// Identifies the API Management instance to query.
#[derive(Debug, Clone)]
pub struct MetricsTarget {
    pub subscription_id: String,
    pub resource_group: String,
    pub apim_name: String,
}

impl MetricsTarget {
    /// Full ARM resource id for the APIM service.
    pub fn resource_id(&self) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.ApiManagement/service/{}",
            self.subscription_id, self.resource_group, self.apim_name
        )
    }
}

/// Request counts over time, reduced from the Azure Monitor payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrafficMetrics {
    /// Total requests across the returned interval.
    pub total: u64,
    /// Per-minute buckets, oldest first, at most the last 15.
    pub timeline: Vec<TimelinePoint>,
}

/// One per-minute bucket of gateway requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelinePoint {
    /// HH:MM bucket label.
    pub time: String,
    pub requests: u64,
}

/// Default locations probed for the Azure CLI, in order.
///
/// The bare `az` entry falls through to PATH lookup.
pub fn default_cli_candidates() -> Vec<PathBuf> {
    let mut candidates = vec![
        PathBuf::from("/usr/local/bin/az"),
        PathBuf::from("/opt/homebrew/bin/az"),
    ];

    if let Some(home) = std::env::var_os("HOME") {
        let home = PathBuf::from(home);
        candidates.push(home.join(".local/bin/az"));
        candidates.push(home.join("Library/Python/3.12/bin/az"));
        candidates.push(home.join("Library/Python/3.11/bin/az"));
    }

    candidates.push(PathBuf::from("az"));
    candidates
}

/// Probes the candidate list and returns the first working CLI path.
///
/// A candidate works when it exists (absolute paths only; bare names are
/// left to PATH lookup) and answers `--version` with a zero exit code
/// within the detection timeout.
pub async fn detect_cli(candidates: &[PathBuf]) -> Result<PathBuf, MetricsError> {
    for candidate in candidates {
        if candidate.is_absolute() && !candidate.exists() {
            continue;
        }

        let mut probe = Command::new(candidate);
        probe.arg("--version");

        let check =
            tokio::time::timeout(Duration::from_secs(DETECT_TIMEOUT_SECS), probe.output()).await;

        match check {
            Ok(Ok(output)) if output.status.success() => {
                debug!("Using Azure CLI at {}", candidate.display());
                return Ok(candidate.clone());
            }
            _ => continue,
        }
    }

    Err(MetricsError::CliNotFound(candidates.len()))
}

/// Azure Monitor metrics source backed by the `az` CLI.
pub struct AzureMonitorSource {
    cli_path: PathBuf,
    timeout: Duration,
}

impl AzureMonitorSource {
    pub fn new(cli_path: PathBuf) -> Self {
        Self {
            cli_path,
            timeout: Duration::from_secs(FETCH_TIMEOUT_SECS),
        }
    }

    #[allow(dead_code)] // Used by tests to shorten the command timeout
    pub fn with_timeout(cli_path: PathBuf, timeout: Duration) -> Self {
        Self { cli_path, timeout }
    }

    /// Fetches per-minute request totals for the target APIM instance.
    pub async fn fetch_traffic(&self, target: &MetricsTarget) -> Result<TrafficMetrics, MetricsError> {
        let resource = target.resource_id();
        info!("Fetching APIM request metrics for {}", target.apim_name);

        let mut cmd = Command::new(&self.cli_path);
        cmd.args([
            "monitor",
            "metrics",
            "list",
            "--resource",
            &resource,
            "--metrics",
            "Requests",
            "--aggregation",
            "Total",
            "--interval",
            "PT1M",
            "-o",
            "json",
        ]);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| MetricsError::Timeout(self.timeout.as_secs()))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let reason = if stderr.is_empty() {
                "check your Azure CLI login and configuration".to_string()
            } else {
                stderr
            };
            return Err(MetricsError::CommandFailed(reason));
        }

        parse_metrics_payload(&String::from_utf8_lossy(&output.stdout))
    }
}

/// The subset of the `az monitor metrics list` payload we read.
#[derive(Debug, Deserialize)]
struct MetricsPayload {
    #[serde(default)]
    value: Vec<Metric>,
}

#[derive(Debug, Deserialize)]
struct Metric {
    #[serde(default)]
    timeseries: Vec<Series>,
}

#[derive(Debug, Deserialize)]
struct Series {
    #[serde(default)]
    data: Vec<DataPoint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataPoint {
    time_stamp: String,
    #[serde(default)]
    total: Option<f64>,
}

/// Reduces the raw CLI payload to totals and a bounded timeline.
pub fn parse_metrics_payload(payload: &str) -> Result<TrafficMetrics, MetricsError> {
    let payload: MetricsPayload = serde_json::from_str(payload)?;
    let mut metrics = TrafficMetrics::default();

    for metric in payload.value {
        for series in metric.timeseries {
            for point in series.data {
                let count = point.total.unwrap_or(0.0) as u64;
                metrics.total += count;
                metrics.timeline.push(TimelinePoint {
                    time: bucket_label(&point.time_stamp),
                    requests: count,
                });
            }
        }
    }

    if metrics.timeline.len() > TIMELINE_WINDOW {
        metrics.timeline.drain(..metrics.timeline.len() - TIMELINE_WINDOW);
    }

    Ok(metrics)
}

/// Formats an ISO-8601 timestamp as an HH:MM bucket label.
///
/// Falls back to the raw string when the timestamp does not parse.
fn bucket_label(timestamp: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(timestamp)
        .map(|dt| dt.format("%H:%M").to_string())
        .unwrap_or_else(|_| timestamp.to_string())
}
