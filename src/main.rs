//! Limitscope - rate-limit probe for LLM gateways behind Azure APIM
//!
//! A CLI tool that fires a bounded burst of chat-completion requests at
//! an API gateway, classifies each outcome, and tallies the results
//! live. Optionally pulls the gateway's own request counts from Azure
//! Monitor via the `az` CLI.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (config, CLI detection, report write failure, etc.)
//!   2 - Throttled requests observed with --fail-on-throttle

mod analysis;
mod cli;
mod config;
mod metrics;
mod models;
mod probe;
mod report;

use anyhow::{Context, Result};
use chrono::Utc;
use cli::{Args, OutputFormat};
use config::Config;
use indicatif::{ProgressBar, ProgressStyle};
use metrics::{AzureMonitorSource, MetricsTarget, TrafficMetrics};
use models::{ReportMetadata, ResultLog, RunReport, Summary};
use probe::{CancelToken, ProbeConfig, ProbeRunner};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args);

    info!("Limitscope v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Run failed: {}", e);
            eprintln!("\n❌ Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .limitscope.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(Config::DEFAULT_PATH);

    if path.exists() {
        eprintln!("⚠️  .limitscope.toml already exists. Remove it first or edit it manually.");
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).context("Failed to write .limitscope.toml")?;

    println!("✅ Created .limitscope.toml with default settings.");
    println!("   Edit it to set your gateway URL, API key, and Azure Monitor details.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Run the complete workflow. Returns exit code (0 or 2).
async fn run(args: Args) -> Result<i32> {
    // Load configuration
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    if args.save_config {
        config.save(Path::new(Config::DEFAULT_PATH))?;
        println!("💾 Saved configuration to {}", Config::DEFAULT_PATH);
    }

    let mut exit_code = 0;
    let mut run_report: Option<RunReport> = None;

    // Step 1: the probe run
    if !args.metrics_only {
        let missing = config.missing_gateway_keys();
        if !missing.is_empty() {
            anyhow::bail!(
                "Missing gateway configuration: {}. Set them via flags, env vars, or {}",
                missing.join(", "),
                Config::DEFAULT_PATH
            );
        }

        let (report, summary) = run_probe(&args, &config).await?;

        if args.fail_on_throttle && summary.rate_limited > 0 {
            eprintln!(
                "\n⛔ {} throttled request(s) observed. Failing (exit code 2).",
                summary.rate_limited
            );
            exit_code = 2;
        }

        run_report = Some(report);
    }

    // Step 2: gateway-side traffic metrics
    if args.metrics || args.metrics_only {
        match fetch_metrics(&args, &config).await {
            Ok(traffic) => {
                print_traffic(&traffic);
                if let Some(ref mut report) = run_report {
                    report.traffic = Some(traffic);
                }
            }
            Err(e) if args.metrics_only => return Err(e),
            Err(e) => {
                // A completed probe run stands even when metrics fail.
                warn!("Metrics fetch failed: {}", e);
                eprintln!("⚠️  Metrics fetch failed: {}", e);
            }
        }
    }

    // Step 3: write the report file
    if let Some(report) = run_report {
        let output = PathBuf::from(&config.report.output);
        let rendered = match args.format {
            OutputFormat::Markdown => report::generate_markdown_report(&report),
            OutputFormat::Json => report::generate_json_report(&report)?,
        };

        std::fs::write(&output, &rendered)
            .with_context(|| format!("Failed to write report to {}", output.display()))?;

        println!("\n📄 Report saved to: {}", output.display());
    }

    Ok(exit_code)
}

/// Execute the probe run with live console tallies.
async fn run_probe(args: &Args, config: &Config) -> Result<(RunReport, Summary)> {
    // Config-file values bypass CLI validation.
    if config.probe.requests == 0 {
        anyhow::bail!("Requests must be at least 1");
    }
    if config.probe.timeout_seconds == 0 {
        anyhow::bail!("Timeout must be at least 1 second");
    }

    let probe_config = ProbeConfig {
        gateway_url: config.gateway.gateway_url.clone(),
        api_key: config.gateway.api_key.clone(),
        model_name: config.gateway.model_name.clone(),
        api_version: config.gateway.api_version.clone(),
        request_count: config.probe.requests,
        delay_ms: config.probe.delay_ms,
        timeout_seconds: config.probe.timeout_seconds,
        max_tokens: config.probe.max_tokens,
    };

    println!(
        "🧪 Probing `{}` ({} requests, {}ms delay, limit {} TPM)",
        config.gateway.model_name,
        probe_config.request_count,
        probe_config.delay_ms,
        config.gateway.tpm_limit
    );

    let runner = ProbeRunner::new(probe_config.clone())?;
    let log = ResultLog::new();
    let cancel = CancelToken::new();

    // Ctrl-C aborts at the next inter-request boundary; the in-flight
    // request runs to its own timeout.
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let progress = if args.quiet {
        None
    } else {
        let pb = ProgressBar::new(probe_config.request_count as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        Some(pb)
    };

    let start = Instant::now();
    let issued = runner
        .run(
            &log,
            &cancel,
            |index| format!("Say hello {}", index),
            |_| {
                if let Some(ref pb) = progress {
                    let tally = analysis::summarize(&log);
                    pb.inc(1);
                    pb.set_message(format!(
                        "✅ {}  🚫 {}  tokens {}",
                        tally.success, tally.rate_limited, tally.token_sum
                    ));
                }
            },
        )
        .await;
    let duration = start.elapsed().as_secs_f64();

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    let summary = analysis::summarize(&log);

    if issued < probe_config.request_count {
        println!(
            "⚠️  Cancelled after {} of {} requests",
            issued, probe_config.request_count
        );
    }

    println!("\n📊 Probe Summary:");
    println!("{}", analysis::generate_summary_text(&summary));
    println!(
        "\n✅ Done! {}/{} succeeded, {} rate limited",
        summary.success, issued, summary.rate_limited
    );

    let report = RunReport {
        metadata: ReportMetadata {
            gateway_url: config.gateway.gateway_url.clone(),
            model_name: config.gateway.model_name.clone(),
            api_version: config.gateway.api_version.clone(),
            tpm_limit: config.gateway.tpm_limit,
            run_date: Utc::now(),
            request_count: issued,
            delay_ms: probe_config.delay_ms,
            duration_seconds: duration,
        },
        results: log.snapshot(),
        summary: summary.clone(),
        traffic: None,
    };

    Ok((report, summary))
}

/// Fetch gateway traffic metrics from Azure Monitor.
async fn fetch_metrics(args: &Args, config: &Config) -> Result<TrafficMetrics> {
    let missing = config.missing_metrics_keys();
    if !missing.is_empty() {
        anyhow::bail!(
            "Missing Azure Monitor configuration: {}",
            missing.join(", ")
        );
    }

    let cli_path = resolve_cli_path(args, config).await?;
    let source = AzureMonitorSource::new(cli_path);
    let target = MetricsTarget {
        subscription_id: config.azure.subscription_id.clone(),
        resource_group: config.azure.resource_group.clone(),
        apim_name: config.azure.apim_name.clone(),
    };

    println!("\n📊 Fetching APIM traffic metrics (Azure Monitor lags 1-2 min)...");
    let traffic = source.fetch_traffic(&target).await?;
    Ok(traffic)
}

/// Resolve the Azure CLI path: explicit setting first, then the ordered
/// candidate list.
async fn resolve_cli_path(args: &Args, config: &Config) -> Result<PathBuf> {
    if let Some(ref path) = args.az_cli {
        return Ok(path.clone());
    }
    if let Some(ref path) = config.azure.cli_path {
        return Ok(PathBuf::from(path));
    }

    let candidates = metrics::default_cli_candidates();
    let path = metrics::detect_cli(&candidates).await?;
    Ok(path)
}

/// Print fetched traffic metrics with an ASCII timeline.
fn print_traffic(traffic: &TrafficMetrics) {
    println!(
        "📈 Gateway traffic: {} requests over {} data points",
        traffic.total,
        traffic.timeline.len()
    );

    if !traffic.timeline.is_empty() {
        println!();
        print!("{}", report::render_timeline(traffic));
    }
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded config from {}", Config::DEFAULT_PATH);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
