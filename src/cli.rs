//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values. Most options can also be
//! supplied via environment variables or `.limitscope.toml`.

use clap::Parser;
use std::path::PathBuf;

/// Limitscope - rate-limit probe and traffic monitor for LLM gateways
///
/// Fires a bounded burst of chat-completion requests at an APIM-fronted
/// OpenAI deployment, tallies success/throttle outcomes live, and can
/// pull the gateway's request metrics from Azure Monitor.
///
/// Examples:
///   limitscope --requests 20 --delay-ms 100
///   limitscope --gateway-url https://my-apim.azure-api.net --api-key $KEY
///   limitscope --metrics-only --apim-name my-apim
///   limitscope --fail-on-throttle --output probe_report.md
///   limitscope --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Number of probe requests to issue
    #[arg(short = 'n', long, value_name = "COUNT")]
    pub requests: Option<usize>,

    /// Delay between requests in milliseconds
    #[arg(short, long, value_name = "MS")]
    pub delay_ms: Option<u64>,

    /// Gateway base URL (without trailing slash)
    #[arg(long, value_name = "URL", env = "APIM_GATEWAY_URL")]
    pub gateway_url: Option<String>,

    /// APIM subscription key sent in the api-key header
    #[arg(long, value_name = "KEY", env = "APIM_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Model deployment name to probe
    #[arg(short, long, env = "OPENAI_MODEL")]
    pub model: Option<String>,

    /// Azure OpenAI API version
    #[arg(long, value_name = "VERSION", env = "OPENAI_API_VERSION")]
    pub api_version: Option<String>,

    /// Tokens-per-minute limit configured in the gateway policy
    ///
    /// Shown for context in reports; the gateway enforces the real limit.
    #[arg(long, value_name = "TPM", env = "TPM_LIMIT")]
    pub tpm_limit: Option<u64>,

    /// Per-request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Fetch APIM traffic metrics from Azure Monitor after the run
    ///
    /// Azure Monitor lags live traffic by 1-2 minutes.
    #[arg(long)]
    pub metrics: bool,

    /// Only fetch metrics, skip the probe run
    #[arg(long, conflicts_with = "metrics")]
    pub metrics_only: bool,

    /// Azure subscription ID (GUID) for Azure Monitor
    #[arg(long, value_name = "GUID", env = "AZURE_SUBSCRIPTION_ID")]
    pub subscription_id: Option<String>,

    /// Resource group containing the APIM instance
    #[arg(long, value_name = "NAME", env = "AZURE_RESOURCE_GROUP")]
    pub resource_group: Option<String>,

    /// API Management service name
    #[arg(long, value_name = "NAME", env = "AZURE_APIM_NAME")]
    pub apim_name: Option<String>,

    /// Explicit Azure CLI path (skips candidate probing)
    #[arg(long, value_name = "PATH")]
    pub az_cli: Option<PathBuf>,

    /// Output file path for the report (default: limitscope_report.md)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Report format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Path to configuration file
    ///
    /// If not specified, looks for .limitscope.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Persist the merged configuration back to .limitscope.toml
    #[arg(long)]
    pub save_config: bool,

    /// Generate a default .limitscope.toml configuration file
    #[arg(long)]
    pub init_config: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Exit with code 2 if any request was throttled
    ///
    /// Useful for CI pipelines verifying a limit is (or isn't) being hit.
    #[arg(long)]
    pub fail_on_throttle: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if let Some(ref gateway_url) = self.gateway_url {
            if !gateway_url.starts_with("http://") && !gateway_url.starts_with("https://") {
                return Err("Gateway URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if self.requests == Some(0) {
            return Err("Requests must be at least 1".to_string());
        }

        if self.timeout == Some(0) {
            return Err("Timeout must be at least 1 second".to_string());
        }

        if self.tpm_limit == Some(0) {
            return Err("TPM limit must be at least 1".to_string());
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("limitscope").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]);
        assert!(args.requests.is_none());
        assert!(args.delay_ms.is_none());
        assert_eq!(args.format, OutputFormat::Markdown);
        assert!(!args.metrics);
        assert!(!args.fail_on_throttle);
    }

    #[test]
    fn test_validation_invalid_gateway_url() {
        let mut args = parse(&[]);
        args.gateway_url = Some("my-apim.azure-api.net".to_string());
        assert!(args.validate().is_err());

        args.gateway_url = Some("https://my-apim.azure-api.net".to_string());
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validation_zero_requests() {
        let args = parse(&["--requests", "0"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = parse(&[]);
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_metrics_flags_conflict() {
        let result =
            Args::try_parse_from(["limitscope", "--metrics", "--metrics-only"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_init_config_skips_validation() {
        let mut args = parse(&["--init-config"]);
        args.requests = Some(0);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_log_level() {
        let mut args = parse(&[]);
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }
}
