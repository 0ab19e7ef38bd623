//! Markdown and JSON report generation.
//!
//! This module renders probe run reports from the run record, plus the
//! ASCII traffic timeline used for console output.

use crate::analysis::{distribution_sorted, throttle_rate};
use crate::metrics::TrafficMetrics;
use crate::models::{ProbeResult, RunReport, Summary};
use anyhow::Result;

/// Widest ASCII bar drawn for a timeline bucket.
const TIMELINE_BAR_WIDTH: u64 = 40;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &RunReport) -> String {
    let mut output = String::new();

    // Title
    output.push_str("# Limitscope Report\n\n");

    // Metadata section
    output.push_str(&generate_metadata_section(report));

    // Summary section
    output.push_str(&generate_summary_section(&report.summary));

    // Per-request results
    output.push_str(&generate_results_section(&report.results));

    // Outcome distribution
    output.push_str(&generate_distribution_section(&report.summary));

    // Gateway traffic, when fetched
    if let Some(ref traffic) = report.traffic {
        output.push_str(&generate_traffic_section(traffic));
    }

    // Footer
    output.push_str(&generate_footer());

    output
}

/// Generate a JSON report.
pub fn generate_json_report(report: &RunReport) -> Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}

/// Generate the metadata section.
fn generate_metadata_section(report: &RunReport) -> String {
    let metadata = &report.metadata;
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Gateway:** {}\n", metadata.gateway_url));
    section.push_str(&format!("- **Model:** `{}`\n", metadata.model_name));
    section.push_str(&format!("- **API Version:** {}\n", metadata.api_version));
    section.push_str(&format!("- **Configured Limit:** {} TPM\n", metadata.tpm_limit));
    section.push_str(&format!(
        "- **Run Date:** {}\n",
        metadata.run_date.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!(
        "- **Requests Issued:** {} ({}ms delay)\n",
        metadata.request_count, metadata.delay_ms
    ));
    section.push_str(&format!(
        "- **Run Duration:** {:.1}s\n",
        metadata.duration_seconds
    ));
    section.push_str("\n");

    section
}

/// Generate the summary section.
fn generate_summary_section(summary: &Summary) -> String {
    let mut section = String::new();

    section.push_str("## Summary\n\n");
    section.push_str(&format!("- **Total Requests:** {}\n", summary.total));
    section.push_str(&format!("- **✅ Success:** {}\n", summary.success));
    section.push_str(&format!(
        "- **🚫 Rate Limited:** {} ({:.0}%)\n",
        summary.rate_limited,
        throttle_rate(summary) * 100.0
    ));
    section.push_str(&format!("- **📊 Tokens Consumed:** {}\n", summary.token_sum));

    if let Some(ref latency) = summary.latency {
        section.push_str(&format!(
            "- **⏱️ Latency:** {}ms min / {:.0}ms mean / {}ms p95 / {}ms max\n",
            latency.min_ms, latency.mean_ms, latency.p95_ms, latency.max_ms
        ));
    }

    section.push_str("\n");
    section
}

/// Generate the per-request results table.
fn generate_results_section(results: &[ProbeResult]) -> String {
    let mut section = String::new();

    section.push_str("## Results\n\n");

    if results.is_empty() {
        section.push_str("No requests were issued.\n\n");
        return section;
    }

    // Only include the retry column when a throttled response supplied one.
    let has_retry_hint = results.iter().any(|r| r.retry_after.is_some());

    if has_retry_hint {
        section.push_str("| # | Outcome | Code | Tokens | Latency (ms) | Retry-After |\n");
        section.push_str("|---|---------|------|--------|--------------|-------------|\n");
    } else {
        section.push_str("| # | Outcome | Code | Tokens | Latency (ms) |\n");
        section.push_str("|---|---------|------|--------|--------------|\n");
    }

    for result in results {
        let mut row = format!(
            "| {} | {} {} | {} | {} | {} |",
            result.index,
            result.outcome.emoji(),
            result.outcome,
            result.status,
            result.tokens,
            result.latency_ms
        );

        if has_retry_hint {
            row.push_str(&format!(
                " {} |",
                result.retry_after.as_deref().unwrap_or("-")
            ));
        }

        section.push_str(&row);
        section.push('\n');
    }

    section.push_str("\n");
    section
}

/// Generate the outcome distribution section.
fn generate_distribution_section(summary: &Summary) -> String {
    let mut section = String::new();

    section.push_str("## Distribution\n\n");

    if summary.by_outcome.is_empty() {
        section.push_str("No outcomes recorded.\n\n");
        return section;
    }

    for (label, count) in distribution_sorted(summary) {
        section.push_str(&format!("- {}: {}\n", label, count));
    }

    section.push_str("\n");
    section
}

/// Generate the gateway traffic section.
fn generate_traffic_section(traffic: &TrafficMetrics) -> String {
    let mut section = String::new();

    section.push_str("## Gateway Traffic\n\n");
    section.push_str(&format!(
        "- **Total Requests:** {} ({} data points)\n\n",
        traffic.total,
        traffic.timeline.len()
    ));

    if !traffic.timeline.is_empty() {
        section.push_str("```\n");
        section.push_str(&render_timeline(traffic));
        section.push_str("```\n\n");
    }

    section
}

/// Generate the report footer.
fn generate_footer() -> String {
    format!(
        "---\n\n*Generated by Limitscope v{}*\n",
        env!("CARGO_PKG_VERSION")
    )
}

/// Render the traffic timeline as ASCII bars, one bucket per line.
pub fn render_timeline(traffic: &TrafficMetrics) -> String {
    let max = traffic
        .timeline
        .iter()
        .map(|point| point.requests)
        .max()
        .unwrap_or(0)
        .max(1);

    let mut lines = String::new();
    for point in &traffic.timeline {
        let width = (point.requests * TIMELINE_BAR_WIDTH / max) as usize;
        lines.push_str(&format!(
            "{} {:<width$} {}\n",
            point.time,
            "█".repeat(width),
            point.requests,
            width = TIMELINE_BAR_WIDTH as usize
        ));
    }

    lines
}
