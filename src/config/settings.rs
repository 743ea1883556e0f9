//! Configuration settings for SFTP Relay
//!
//! Defines all configuration options, CLI arguments, environment bindings
//! and defaults. Everything is captured once at startup into an immutable
//! [`PipelineConfig`] which is handed to each component explicitly.

use crate::error::{Result, TransferError};
use crate::route::RuleSpec;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Upper bound for the upload worker pool
pub const MAX_UPLOAD_CONCURRENCY: usize = 64;

/// SFTP Relay - move files from an SFTP server into object storage
#[derive(Parser, Debug, Clone)]
#[command(name = "sftp-relay")]
#[command(author = "SFTP Relay Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Scheduled SFTP to object-storage transfer with per-file routing")]
#[command(long_about = r#"
SFTP Relay lists a remote SFTP directory, routes each file through an ordered
rule table, applies an optional transform and uploads the result to an S3
bucket. Each invocation is stateless and prints a JSON transfer report.

Examples:
  sftp-relay run                                   # One scheduled invocation
  sftp-relay run --event '{"remote_directory":"/outbound/daily"}'
  sftp-relay classify report_2024.csv archive.zip  # Preview routing decisions
"#)]
pub struct CliArgs {
    /// Pipeline settings (flags or environment)
    #[command(flatten)]
    pub settings: Settings,

    /// Log output format
    #[arg(long, value_enum, env = "LOG_FORMAT", default_value = "json", global = true)]
    pub log_format: LogFormat,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run one transfer invocation
    #[command(name = "run")]
    Run {
        /// Opaque trigger payload (JSON); may override remote_directory
        #[arg(long, value_name = "JSON")]
        event: Option<String>,
        /// Request id for log correlation (generated when absent)
        #[arg(long, env = "REQUEST_ID", value_name = "ID")]
        request_id: Option<String>,
    },

    /// Show routing decisions for file names without touching the network
    #[command(name = "classify")]
    Classify {
        /// Remote file names to classify
        #[arg(required = true, value_name = "NAME")]
        names: Vec<String>,
    },
}

/// Settings captured from flags or environment variables
#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// SFTP server hostname
    #[arg(long, env = "SFTP_HOST", value_name = "HOST", global = true)]
    pub sftp_host: Option<String>,

    /// SFTP server port
    #[arg(long, env = "SFTP_PORT", default_value = "22", value_name = "PORT", global = true)]
    pub sftp_port: u16,

    /// SFTP username
    #[arg(long, env = "SFTP_USERNAME", value_name = "USER", global = true)]
    pub sftp_username: Option<String>,

    /// Remote directory to list
    #[arg(long, env = "REMOTE_DIRECTORY", default_value = ".", value_name = "PATH", global = true)]
    pub remote_directory: PathBuf,

    /// Secret identifier holding the SSH private key
    #[arg(long, env = "SECRET_ARN", value_name = "ID", global = true)]
    pub secret_arn: Option<String>,

    /// Destination bucket
    #[arg(long, env = "S3_BUCKET", value_name = "BUCKET", global = true)]
    pub s3_bucket: Option<String>,

    /// AWS region (falls back to the SDK default chain)
    #[arg(long, env = "AWS_REGION", value_name = "REGION", global = true)]
    pub aws_region: Option<String>,

    /// Custom endpoint for S3-compatible storage
    #[arg(long, env = "S3_ENDPOINT_URL", value_name = "URL", global = true)]
    pub s3_endpoint_url: Option<String>,

    /// Host key verification policy
    #[arg(long, value_enum, env = "HOST_KEY_POLICY", default_value = "accept-new", global = true)]
    pub host_key_policy: HostKeyPolicy,

    /// Known hosts file (default: $HOME/.ssh/known_hosts)
    #[arg(long, env = "KNOWN_HOSTS_FILE", value_name = "PATH", global = true)]
    pub known_hosts_file: Option<PathBuf>,

    /// Number of files processed concurrently
    #[arg(long, env = "UPLOAD_CONCURRENCY", default_value = "4", value_name = "NUM", global = true)]
    pub upload_concurrency: usize,

    /// Destination prefix for files matching no rule
    #[arg(long, env = "DEFAULT_PREFIX", default_value = "", value_name = "PREFIX", global = true)]
    pub default_prefix: String,

    /// Transform for files matching no rule
    #[arg(long, env = "DEFAULT_TRANSFORM", default_value = "none", value_name = "ID", global = true)]
    pub default_transform: String,

    /// Routing rules as a JSON array
    #[arg(long, env = "ROUTING_RULES", value_name = "JSON", global = true, conflicts_with = "rules_file")]
    pub routing_rules: Option<String>,

    /// Path to a JSON file with routing rules
    #[arg(long, env = "ROUTING_RULES_FILE", value_name = "PATH", global = true)]
    pub rules_file: Option<PathBuf>,

    /// Secret fetch timeout (e.g. 10s)
    #[arg(long, env = "SECRET_TIMEOUT", default_value = "10s", value_parser = humantime::parse_duration, global = true)]
    pub secret_timeout: Duration,

    /// SSH connect and handshake timeout
    #[arg(long, env = "CONNECT_TIMEOUT", default_value = "15s", value_parser = humantime::parse_duration, global = true)]
    pub connect_timeout: Duration,

    /// Per-operation SFTP I/O timeout
    #[arg(long, env = "IO_TIMEOUT", default_value = "60s", value_parser = humantime::parse_duration, global = true)]
    pub io_timeout: Duration,

    /// Per-object upload timeout
    #[arg(long, env = "UPLOAD_TIMEOUT", default_value = "300s", value_parser = humantime::parse_duration, global = true)]
    pub upload_timeout: Duration,

    /// Overall invocation deadline
    #[arg(long, env = "INVOCATION_TIMEOUT", default_value = "900s", value_parser = humantime::parse_duration, global = true)]
    pub invocation_timeout: Duration,

    /// Stop admitting new files when less than this remains
    #[arg(long, env = "DEADLINE_MARGIN", default_value = "30s", value_parser = humantime::parse_duration, global = true)]
    pub deadline_margin: Duration,

    /// Maximum input size for buffering transforms (e.g. 256M)
    #[arg(long, env = "MAX_BUFFERED_TRANSFORM_BYTES", default_value = "256M", value_name = "SIZE", global = true)]
    pub max_buffered_transform_bytes: String,

    /// Objects above this size use multipart upload (e.g. 100M)
    #[arg(long, env = "MULTIPART_THRESHOLD", default_value = "100M", value_name = "SIZE", global = true)]
    pub multipart_threshold: String,

    /// Directory for staged files (default: system temp dir)
    #[arg(long, env = "STAGING_DIR", value_name = "PATH", global = true)]
    pub staging_dir: Option<PathBuf>,
}

/// Log output format
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable text
    Text,
    /// One JSON object per line
    #[default]
    Json,
}

/// Host key verification policy
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    /// Verify against known hosts, fail closed on unknown or changed keys
    Strict,
    /// Trust on first use, fail on changed keys
    #[default]
    AcceptNew,
    /// No verification (test environments only)
    AcceptAny,
}

/// SFTP connection parameters, immutable for an invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionConfig {
    /// Remote hostname or IP
    pub host: String,
    /// Port
    pub port: u16,
    /// Username
    pub username: String,
    /// Directory to list
    pub remote_directory: PathBuf,
    /// Host key verification policy
    pub host_key_policy: HostKeyPolicy,
    /// Known hosts store
    pub known_hosts_file: Option<PathBuf>,
}

impl ConnectionConfig {
    /// Create a connection config with defaults for everything but the endpoint
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            username: username.into(),
            remote_directory: PathBuf::from("."),
            host_key_policy: HostKeyPolicy::default(),
            known_hosts_file: None,
        }
    }

    /// `host:port` address string
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Bounded timeouts for every network step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Timeouts {
    /// Secret fetch
    pub secret: Duration,
    /// TCP connect and SSH handshake
    pub connect: Duration,
    /// Each SFTP request (listing, reads)
    pub io: Duration,
    /// Each object upload
    pub upload: Duration,
    /// Whole invocation
    pub invocation: Duration,
    /// Admission margin before the invocation deadline
    pub deadline_margin: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            secret: Duration::from_secs(10),
            connect: Duration::from_secs(15),
            io: Duration::from_secs(60),
            upload: Duration::from_secs(300),
            invocation: Duration::from_secs(900),
            deadline_margin: Duration::from_secs(30),
        }
    }
}

/// Object storage settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageConfig {
    /// Destination bucket
    pub bucket: String,
    /// AWS region
    pub region: Option<String>,
    /// Custom endpoint URL for S3-compatible services
    pub endpoint_url: Option<String>,
    /// Multipart upload threshold in bytes
    pub multipart_threshold: u64,
}

impl StorageConfig {
    /// Storage config for a bucket with default settings
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: None,
            endpoint_url: None,
            multipart_threshold: 100 * 1024 * 1024,
        }
    }
}

/// Rule table plus the fallback decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingConfig {
    /// Ordered rules, first match wins
    pub rules: Vec<RuleSpec>,
    /// Prefix for unmatched files
    pub default_prefix: String,
    /// Transform for unmatched files
    pub default_transform: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            default_prefix: String::new(),
            default_transform: "none".to_string(),
        }
    }
}

/// Runtime configuration for one invocation
#[derive(Debug, Clone, Serialize)]
pub struct PipelineConfig {
    /// SFTP endpoint
    pub connection: ConnectionConfig,
    /// Secret identifier for the SSH key
    pub secret_id: String,
    /// Object storage destination
    pub storage: StorageConfig,
    /// Routing rules
    pub routing: RoutingConfig,
    /// Step timeouts
    pub timeouts: Timeouts,
    /// Concurrent file workers
    pub upload_concurrency: usize,
    /// Bound for buffering transforms in bytes
    pub max_buffered_transform_bytes: u64,
    /// Staging directory for transformed content
    pub staging_dir: PathBuf,
}

impl PipelineConfig {
    /// Build a config with defaults around the required values
    pub fn new(
        connection: ConnectionConfig,
        secret_id: impl Into<String>,
        storage: StorageConfig,
    ) -> Self {
        Self {
            connection,
            secret_id: secret_id.into(),
            storage,
            routing: RoutingConfig::default(),
            timeouts: Timeouts::default(),
            upload_concurrency: 4,
            max_buffered_transform_bytes: 256 * 1024 * 1024,
            staging_dir: std::env::temp_dir(),
        }
    }

    /// Create config from CLI arguments and environment
    pub fn from_cli(settings: &Settings) -> Result<Self> {
        let host = required(&settings.sftp_host, "SFTP_HOST")?;
        let username = required(&settings.sftp_username, "SFTP_USERNAME")?;
        let secret_id = required(&settings.secret_arn, "SECRET_ARN")?;
        let bucket = required(&settings.s3_bucket, "S3_BUCKET")?;

        let known_hosts_file = settings.known_hosts_file.clone().or_else(|| {
            std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".ssh").join("known_hosts"))
        });

        let connection = ConnectionConfig {
            host,
            port: settings.sftp_port,
            username,
            remote_directory: settings.remote_directory.clone(),
            host_key_policy: settings.host_key_policy,
            known_hosts_file,
        };

        let storage = StorageConfig {
            bucket,
            region: settings.aws_region.clone(),
            endpoint_url: settings.s3_endpoint_url.clone(),
            multipart_threshold: parse_size(&settings.multipart_threshold)
                .map_err(|e| TransferError::config(format!("Invalid multipart threshold: {}", e)))?,
        };

        let mut config = Self::new(connection, secret_id, storage);
        config.routing = RoutingConfig::from_settings(settings)?;
        config.timeouts = Timeouts {
            secret: settings.secret_timeout,
            connect: settings.connect_timeout,
            io: settings.io_timeout,
            upload: settings.upload_timeout,
            invocation: settings.invocation_timeout,
            deadline_margin: settings.deadline_margin,
        };
        config.upload_concurrency = settings.upload_concurrency.clamp(1, MAX_UPLOAD_CONCURRENCY);
        config.max_buffered_transform_bytes = parse_size(&settings.max_buffered_transform_bytes)
            .map_err(|e| TransferError::config(format!("Invalid transform bound: {}", e)))?;
        if let Some(dir) = &settings.staging_dir {
            config.staging_dir = dir.clone();
        }

        Ok(config)
    }
}

impl RoutingConfig {
    /// Load the rule table from inline JSON or a rules file
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let rules = match (&settings.routing_rules, &settings.rules_file) {
            (Some(json), _) => parse_rules(json)?,
            (None, Some(path)) => {
                let json = std::fs::read_to_string(path).map_err(|e| {
                    TransferError::config(format!("Cannot read rules file {}: {}", path.display(), e))
                })?;
                parse_rules(&json)?
            }
            (None, None) => Vec::new(),
        };

        Ok(Self {
            rules,
            default_prefix: settings.default_prefix.clone(),
            default_transform: settings.default_transform.clone(),
        })
    }
}

/// Parse a JSON array of routing rules
pub fn parse_rules(json: &str) -> Result<Vec<RuleSpec>> {
    serde_json::from_str(json)
        .map_err(|e| TransferError::config(format!("Invalid routing rules: {}", e)))
}

fn required(value: &Option<String>, name: &str) -> Result<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(TransferError::config(format!("Missing required setting {}", name))),
    }
}

/// Parse human-readable size string to bytes
pub fn parse_size(size: &str) -> std::result::Result<u64, String> {
    let size = size.trim().to_uppercase();

    if size.is_empty() {
        return Err("Empty size string".to_string());
    }

    let (num_str, multiplier) = if size.ends_with("GB") || size.ends_with('G') {
        (size.trim_end_matches(|c| c == 'G' || c == 'B'), 1024u64 * 1024 * 1024)
    } else if size.ends_with("MB") || size.ends_with('M') {
        (size.trim_end_matches(|c| c == 'M' || c == 'B'), 1024u64 * 1024)
    } else if size.ends_with("KB") || size.ends_with('K') {
        (size.trim_end_matches(|c| c == 'K' || c == 'B'), 1024u64)
    } else if size.ends_with('B') {
        (size.trim_end_matches('B'), 1u64)
    } else {
        (size.as_str(), 1u64)
    };

    let num: f64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number: {}", num_str))?;

    Ok((num * multiplier as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> CliArgs {
        let mut argv = vec!["sftp-relay"];
        argv.extend_from_slice(args);
        CliArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1024").unwrap(), 1024);
        assert_eq!(parse_size("1K").unwrap(), 1024);
        assert_eq!(parse_size("1M").unwrap(), 1024 * 1024);
        assert_eq!(parse_size("256M").unwrap(), 256 * 1024 * 1024);
        assert_eq!(parse_size("1.5G").unwrap(), (1.5 * 1024.0 * 1024.0 * 1024.0) as u64);
        assert!(parse_size("lots").is_err());
    }

    #[test]
    fn test_from_cli_builds_immutable_config() {
        let args = cli(&[
            "--sftp-host", "sftp.example.com",
            "--sftp-username", "relay",
            "--secret-arn", "arn:aws:secretsmanager:eu-west-1:1:secret:sftp",
            "--s3-bucket", "landing",
            "--upload-concurrency", "500",
            "--known-hosts-file", "/etc/ssh/known_hosts",
            "--routing-rules", r#"[{"match":{"suffix":".csv"},"prefix":"csv/"}]"#,
            "--io-timeout", "2m",
            "run",
        ]);

        let config = PipelineConfig::from_cli(&args.settings).unwrap();
        assert_eq!(config.connection.address(), "sftp.example.com:22");
        assert_eq!(config.connection.remote_directory, PathBuf::from("."));
        assert_eq!(config.connection.host_key_policy, HostKeyPolicy::AcceptNew);
        assert_eq!(
            config.connection.known_hosts_file,
            Some(PathBuf::from("/etc/ssh/known_hosts"))
        );
        assert_eq!(config.storage.bucket, "landing");
        assert_eq!(config.upload_concurrency, MAX_UPLOAD_CONCURRENCY);
        assert_eq!(config.routing.rules.len(), 1);
        assert_eq!(config.routing.default_transform, "none");
        assert_eq!(config.timeouts.io, Duration::from_secs(120));
        assert_eq!(config.max_buffered_transform_bytes, 256 * 1024 * 1024);
    }

    #[test]
    fn test_missing_required_setting() {
        let mut args = cli(&["--sftp-host", "sftp.example.com", "classify", "a.txt"]);
        // An exported SFTP_USERNAME would otherwise fill the field
        args.settings.sftp_username = None;
        let err = PipelineConfig::from_cli(&args.settings).unwrap_err();
        assert!(err.to_string().contains("SFTP_USERNAME"));
    }

    #[test]
    fn test_rules_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(&path, r#"[{"match":{"exact":"manifest.txt"},"skip":true}]"#).unwrap();

        let args = cli(&["--rules-file", path.to_str().unwrap(), "classify", "x"]);
        let routing = RoutingConfig::from_settings(&args.settings).unwrap();
        assert_eq!(routing.rules.len(), 1);
        assert!(routing.rules[0].skip);
    }

    #[test]
    fn test_invalid_rules_are_config_errors() {
        let err = parse_rules("{not json").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
    }
}
