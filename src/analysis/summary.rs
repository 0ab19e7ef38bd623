//! Result aggregation and statistics.
//!
//! This module computes summaries over a probe result log. Everything
//! here is a pure function of a log snapshot, so it can be called after
//! every append (for live tallies) and once at completion without side
//! effects on the run.

use crate::models::{ResultLog, Summary};

/// Computes a summary from the log's current contents.
///
/// Works on a snapshot: results appended while the summary is being
/// computed are not included, and calling this repeatedly on an
/// unmodified log yields identical values.
pub fn summarize(log: &ResultLog) -> Summary {
    Summary::from_results(&log.snapshot())
}

/// Fraction of requests that were throttled, in [0, 1].
pub fn throttle_rate(summary: &Summary) -> f64 {
    if summary.total == 0 {
        0.0
    } else {
        summary.rate_limited as f64 / summary.total as f64
    }
}

/// Outcome distribution sorted by count, highest first.
pub fn distribution_sorted(summary: &Summary) -> Vec<(String, usize)> {
    let mut distribution: Vec<(String, usize)> = summary
        .by_outcome
        .iter()
        .map(|(label, count)| (label.clone(), *count))
        .collect();

    distribution.sort_by_key(|(_, count)| std::cmp::Reverse(*count));
    distribution
}

/// Generates a text block of summary statistics for console output.
pub fn generate_summary_text(summary: &Summary) -> String {
    let mut lines = Vec::new();

    lines.push(format!("Total Requests: {}", summary.total));
    lines.push(format!("- ✅ Success: {}", summary.success));
    lines.push(format!("- 🚫 Rate Limited: {}", summary.rate_limited));
    lines.push(format!("- 📊 Tokens: {}", summary.token_sum));

    if let Some(ref latency) = summary.latency {
        lines.push(format!(
            "- ⏱️ Latency: {}ms min / {:.0}ms mean / {}ms p95",
            latency.min_ms, latency.mean_ms, latency.p95_ms
        ));
    }

    if !summary.by_outcome.is_empty() {
        lines.push(String::new());
        lines.push("By Outcome:".to_string());

        for (label, count) in distribution_sorted(summary) {
            lines.push(format!("- {}: {}", label, count));
        }
    }

    lines.join("\n")
}
