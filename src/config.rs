//! Configuration file handling.
//!
//! This module handles loading, merging, and persisting configuration
//! from `.limitscope.toml` files. Precedence is defaults < config file
//! < environment < CLI flags (the last two arrive through clap).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Gateway endpoint settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Probe run settings.
    #[serde(default)]
    pub probe: ProbeSettings,

    /// Azure Monitor settings.
    #[serde(default)]
    pub azure: AzureConfig,

    /// Report settings.
    #[serde(default)]
    pub report: ReportSettings,
}

/// APIM gateway endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway base URL, without trailing slash.
    #[serde(default)]
    pub gateway_url: String,

    /// APIM subscription key.
    #[serde(default)]
    pub api_key: String,

    /// Model deployment name.
    #[serde(default = "default_model")]
    pub model_name: String,

    /// Azure OpenAI API version.
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Tokens-per-minute limit configured in the gateway policy, shown
    /// for context in reports.
    #[serde(default = "default_tpm_limit")]
    pub tpm_limit: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            gateway_url: String::new(),
            api_key: String::new(),
            model_name: default_model(),
            api_version: default_api_version(),
            tpm_limit: default_tpm_limit(),
        }
    }
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_version() -> String {
    "2024-02-01".to_string()
}

fn default_tpm_limit() -> u64 {
    500
}

/// Probe run settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeSettings {
    /// Number of requests per run.
    #[serde(default = "default_requests")]
    pub requests: usize,

    /// Delay between requests in milliseconds.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// `max_tokens` requested per completion.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            requests: default_requests(),
            delay_ms: default_delay_ms(),
            timeout_seconds: default_timeout(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_requests() -> usize {
    20
}

fn default_delay_ms() -> u64 {
    100
}

fn default_timeout() -> u64 {
    30
}

fn default_max_tokens() -> u32 {
    100
}

/// Azure Monitor settings. Required only for metrics fetching.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AzureConfig {
    /// Azure subscription ID (GUID).
    #[serde(default)]
    pub subscription_id: String,

    /// Resource group containing the APIM instance.
    #[serde(default)]
    pub resource_group: String,

    /// API Management service name.
    #[serde(default)]
    pub apim_name: String,

    /// Explicit Azure CLI path; candidate probing is skipped when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cli_path: Option<String>,
}

/// Report generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSettings {
    /// Default report file path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
        }
    }
}

fn default_output() -> String {
    "limitscope_report.md".to_string()
}

impl Config {
    /// Default config file location, relative to the working directory.
    pub const DEFAULT_PATH: &'static str = ".limitscope.toml";

    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(Self::DEFAULT_PATH);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Persist the configuration to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments (including their env fallbacks) take precedence over
    /// config file settings; only explicitly provided values override.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref gateway_url) = args.gateway_url {
            self.gateway.gateway_url = gateway_url.trim_end_matches('/').to_string();
        }
        if let Some(ref api_key) = args.api_key {
            self.gateway.api_key = api_key.clone();
        }
        if let Some(ref model) = args.model {
            self.gateway.model_name = model.clone();
        }
        if let Some(ref api_version) = args.api_version {
            self.gateway.api_version = api_version.clone();
        }
        if let Some(tpm_limit) = args.tpm_limit {
            self.gateway.tpm_limit = tpm_limit;
        }

        if let Some(requests) = args.requests {
            self.probe.requests = requests;
        }
        if let Some(delay_ms) = args.delay_ms {
            self.probe.delay_ms = delay_ms;
        }
        if let Some(timeout) = args.timeout {
            self.probe.timeout_seconds = timeout;
        }

        if let Some(ref subscription_id) = args.subscription_id {
            self.azure.subscription_id = subscription_id.clone();
        }
        if let Some(ref resource_group) = args.resource_group {
            self.azure.resource_group = resource_group.clone();
        }
        if let Some(ref apim_name) = args.apim_name {
            self.azure.apim_name = apim_name.clone();
        }
        if let Some(ref az_cli) = args.az_cli {
            self.azure.cli_path = Some(az_cli.display().to_string());
        }

        if let Some(ref output) = args.output {
            self.report.output = output.display().to_string();
        }

        // Flags always override.
        if args.verbose {
            self.report.verbose = true;
        }
    }

    /// Names of gateway settings required for probing that are unset.
    pub fn missing_gateway_keys(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();

        if self.gateway.gateway_url.is_empty() {
            missing.push("gateway_url");
        }
        if self.gateway.api_key.is_empty() {
            missing.push("api_key");
        }
        if self.gateway.model_name.is_empty() {
            missing.push("model_name");
        }

        missing
    }

    /// Names of Azure Monitor settings required for metrics that are unset.
    pub fn missing_metrics_keys(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();

        if self.azure.subscription_id.is_empty() {
            missing.push("subscription_id");
        }
        if self.azure.resource_group.is_empty() {
            missing.push("resource_group");
        }
        if self.azure.apim_name.is_empty() {
            missing.push("apim_name");
        }

        missing
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
