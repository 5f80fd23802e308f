use clap::Parser;
use std::path::PathBuf;

use cdp_adapter::CdpConfig;
use pagegauge_core_types::Settings;

use super::constants::{DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_HOST, DEFAULT_PORT};
use super::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Page to load and audit
    #[arg(value_name = "URL")]
    pub url: Option<String>,

    /// Configuration file path (YAML or JSON)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Enable debug mode
    #[arg(short, long)]
    pub debug: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,

    /// Output format
    #[arg(short, long, default_value = "human")]
    pub output: OutputFormat,

    /// Write the report here instead of stdout
    #[arg(long, value_name = "FILE")]
    pub output_path: Option<PathBuf>,

    /// DevTools debugging host
    #[arg(long, env = "PAGEGAUGE_HOST", default_value = DEFAULT_HOST)]
    pub hostname: String,

    /// DevTools debugging port
    #[arg(long, env = "PAGEGAUGE_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Attach to this page socket instead of opening a new tab
    #[arg(long, value_name = "WS_URL")]
    pub websocket_url: Option<String>,

    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT_MS)]
    pub connect_timeout_ms: u64,

    /// Ceiling for the page load wait, in milliseconds
    #[arg(long)]
    pub max_wait_for_load: Option<u64>,

    /// Keep cookies, caches and storage between passes
    #[arg(long)]
    pub disable_storage_reset: bool,

    #[arg(long)]
    pub disable_device_emulation: bool,

    #[arg(long)]
    pub disable_cpu_throttling: bool,

    #[arg(long)]
    pub disable_network_throttling: bool,

    /// URL patterns to block, comma separated; `*` matches anything
    #[arg(long, value_delimiter = ',')]
    pub blocked_url_patterns: Vec<String>,

    /// Extra trace categories, comma separated
    #[arg(long)]
    pub additional_trace_categories: Option<String>,

    /// Run only these audits
    #[arg(long, value_delimiter = ',')]
    pub only_audits: Vec<String>,

    /// Skip these audits
    #[arg(long, value_delimiter = ',')]
    pub skip_audits: Vec<String>,

    /// Gather and save artifacts to DIR
    #[arg(short = 'G', long, value_name = "DIR")]
    pub gather_mode: Option<PathBuf>,

    /// Audit the artifacts saved in DIR
    #[arg(short = 'A', long, value_name = "DIR")]
    pub audit_mode: Option<PathBuf>,

    /// Print every registered audit and exit
    #[arg(long)]
    pub list_all_audits: bool,

    /// Print the trace categories a traced pass records and exit
    #[arg(long)]
    pub list_trace_categories: bool,

    /// Write protocol metrics in the Prometheus text format to FILE
    #[arg(long, value_name = "FILE")]
    pub metrics_out: Option<PathBuf>,
}

impl CliArgs {
    /// Settings given on the command line, to merge over the config file's.
    pub fn settings_overrides(&self) -> Settings {
        let list = |items: &[String]| (!items.is_empty()).then(|| items.to_vec());
        Settings {
            max_wait_for_load: self
                .max_wait_for_load
                .unwrap_or(Settings::default().max_wait_for_load),
            disable_storage_reset: self.disable_storage_reset,
            disable_device_emulation: self.disable_device_emulation,
            disable_cpu_throttling: self.disable_cpu_throttling,
            disable_network_throttling: self.disable_network_throttling,
            blocked_url_patterns: self.blocked_url_patterns.clone(),
            additional_trace_categories: self.additional_trace_categories.clone(),
            only_audits: list(&self.only_audits),
            skip_audits: list(&self.skip_audits),
        }
    }

    pub fn cdp_config(&self) -> CdpConfig {
        CdpConfig {
            host: self.hostname.clone(),
            port: self.port,
            websocket_url: self.websocket_url.clone(),
            connect_timeout_ms: self.connect_timeout_ms,
            ..CdpConfig::default()
        }
    }

    /// Whether this invocation talks to a browser at all.
    pub fn needs_browser(&self) -> bool {
        self.audit_mode.is_none() || self.gather_mode.is_some()
    }
}
