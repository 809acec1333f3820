//! Application configuration loaded from command-line flags and
//! environment variables.

use std::time::Duration;

use clap::Parser;
use reconciler::WorkerConfig;

/// Command-line flags. When both a flag and its environment variable are
/// set, the environment variable wins.
#[derive(Debug, Default, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Listen address, overridden by `RUN_ADDRESS`
    #[arg(short = 'a', long = "address")]
    pub run_address: Option<String>,

    /// PostgreSQL connection string, overridden by `DATABASE_URI`
    #[arg(short = 'd', long)]
    pub database_uri: Option<String>,

    /// Accrual provider base URL, overridden by `ACCRUAL_SYSTEM_ADDRESS`
    #[arg(short = 'r', long)]
    pub accrual_address: Option<String>,
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Some(LogFormat::Pretty),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `RUN_ADDRESS` or `-a`: listen address (default: `"0.0.0.0:8080"`)
/// - `DATABASE_URI` or `-d`: PostgreSQL connection string; in-memory store when unset
/// - `ACCRUAL_SYSTEM_ADDRESS` or `-r`: accrual provider base URL; no worker when unset
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `pretty` or `json` (default: `pretty`)
/// - `SHUTDOWN_TIMEOUT_SECS`: how long to wait for the worker on shutdown (default: `30`)
/// - `ACCRUAL_POLL_INTERVAL_MS`: base poll interval of the worker (default: `1000`)
#[derive(Debug, Clone)]
pub struct Config {
    pub run_address: String,
    pub database_uri: Option<String>,
    pub accrual_address: Option<String>,
    pub log_level: String,
    pub log_format: LogFormat,
    pub shutdown_timeout: Duration,
    pub poll_interval: Duration,
}

impl Config {
    /// Loads configuration from the process arguments and environment,
    /// falling back to defaults.
    ///
    /// Exits the process with a usage message on malformed arguments.
    pub fn from_env() -> Self {
        Self::from_sources(&Cli::parse(), |key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup alone.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self::from_sources(&Cli::default(), lookup)
    }

    /// Merges parsed flags with a variable lookup; variables take priority.
    ///
    /// Empty and unparsable values fall back to the default.
    pub fn from_sources(cli: &Cli, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let flag = |value: &Option<String>| value.clone().filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Self {
            run_address: get("RUN_ADDRESS")
                .or_else(|| flag(&cli.run_address))
                .map(|addr| listen_address(&addr))
                .unwrap_or(defaults.run_address),
            database_uri: get("DATABASE_URI").or_else(|| flag(&cli.database_uri)),
            accrual_address: get("ACCRUAL_SYSTEM_ADDRESS").or_else(|| flag(&cli.accrual_address)),
            log_level: get("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: get("LOG_FORMAT")
                .and_then(|v| LogFormat::parse(&v))
                .unwrap_or(defaults.log_format),
            shutdown_timeout: get("SHUTDOWN_TIMEOUT_SECS")
                .and_then(|v| v.trim().parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
            poll_interval: get("ACCRUAL_POLL_INTERVAL_MS")
                .and_then(|v| v.trim().parse().ok())
                .filter(|ms: &u64| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
        }
    }

    /// Worker tuning derived from this configuration.
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            base_interval: self.poll_interval,
            ..WorkerConfig::default()
        }
    }
}

/// Expands a bare `:port` to listen on all interfaces.
fn listen_address(addr: &str) -> String {
    let addr = addr.trim();
    match addr.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => addr.to_string(),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            run_address: "0.0.0.0:8080".to_string(),
            database_uri: None,
            accrual_address: None,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            shutdown_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
        }
    }
}
