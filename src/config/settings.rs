//! Configuration settings for S3Ferry
//!
//! Defines the CLI arguments, the runtime configuration of the worker pool
//! and the per-run transfer parameters.

use crate::error::{IoResultExt, Result, TransferError};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

/// Default size at which transfers switch to multipart: 8 MiB
pub const DEFAULT_MULTIPART_THRESHOLD: u64 = 8 * 1024 * 1024;

/// Default multipart split size: 8 MiB
pub const DEFAULT_MULTIPART_CHUNKSIZE: u64 = 8 * 1024 * 1024;

/// Default number of worker threads
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 10;

/// Default task queue capacity
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1000;

/// S3Ferry - bulk object-storage transfers
#[derive(Parser, Debug, Clone)]
#[command(name = "s3ferry")]
#[command(author = "S3Ferry Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Parallel uploads, downloads, copies and moves for S3-compatible storage")]
#[command(long_about = r#"
S3Ferry moves files between a local filesystem and S3-compatible object
storage using a bounded pool of worker threads. Large files are split into
multipart transfers; a failed multipart upload is always aborted.

Examples:
  s3ferry cp ./report.pdf s3://bucket/reports/report.pdf
  s3ferry cp ./photos s3://bucket/photos --recursive
  s3ferry cp s3://bucket/big.iso ./big.iso
  s3ferry mv s3://bucket/a.txt s3://other/a.txt
  cat data.csv | s3ferry cp - s3://bucket/data.csv --expected-size 2G
  s3ferry rm s3://bucket/old.log
  s3ferry rb s3://bucket
"#)]
pub struct CliArgs {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,

    /// JSON runtime configuration file
    #[arg(long, global = true, env = "S3FERRY_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Size at which transfers switch to multipart (e.g., 8M)
    #[arg(long, global = true, value_name = "SIZE")]
    pub multipart_threshold: Option<String>,

    /// Multipart split size (e.g., 16M)
    #[arg(long, global = true, value_name = "SIZE")]
    pub multipart_chunksize: Option<String>,

    /// Number of worker threads
    #[arg(short = 't', long, global = true, value_name = "NUM")]
    pub max_concurrent_requests: Option<usize>,

    /// Task queue capacity
    #[arg(long, global = true, value_name = "NUM")]
    pub max_queue_size: Option<usize>,

    /// AWS region
    #[arg(long, global = true, env = "AWS_REGION", default_value = "us-east-1")]
    pub region: String,

    /// Custom endpoint URL for S3-compatible services
    #[arg(long, global = true, env = "AWS_ENDPOINT_URL", value_name = "URL")]
    pub endpoint_url: Option<String>,

    /// Force path-style bucket addressing
    #[arg(long, global = true)]
    pub force_path_style: bool,

    /// Suppress all status output
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Only print errors and warnings
    #[arg(long, global = true)]
    pub only_show_errors: bool,

    /// Verbose logging (can be repeated: -v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Copy files or objects
    #[command(name = "cp")]
    Copy(TransferArgs),

    /// Move files or objects (transfer, then delete the source)
    #[command(name = "mv")]
    Move(TransferArgs),

    /// Delete a file or object
    #[command(name = "rm")]
    Remove {
        /// Local path or s3://bucket/key
        target: String,
    },

    /// Delete an empty bucket
    #[command(name = "rb")]
    RemoveBucket {
        /// s3://bucket
        bucket: String,
    },
}

/// Arguments shared by `cp` and `mv`
#[derive(Args, Debug, Clone)]
pub struct TransferArgs {
    /// Local path, s3://bucket/key, or - for stdin
    pub source: String,

    /// Local path, s3://bucket/key, or - for stdout
    pub destination: String,

    /// Transfer every file under a local directory
    #[arg(short = 'r', long)]
    pub recursive: bool,

    /// Canned ACL for uploaded objects
    #[arg(long)]
    pub acl: Option<String>,

    /// Explicit Content-Type for uploaded objects
    #[arg(long)]
    pub content_type: Option<String>,

    /// Storage class for uploaded objects
    #[arg(long)]
    pub storage_class: Option<String>,

    /// Do not guess Content-Type from file extensions
    #[arg(long)]
    pub no_guess_mime_type: bool,

    /// Expected size of a streamed upload (e.g., 2G)
    #[arg(long, value_name = "SIZE")]
    pub expected_size: Option<String>,
}

/// Worker pool and multipart settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Size at which transfers switch to multipart
    #[serde(deserialize_with = "deserialize_size")]
    pub multipart_threshold: u64,
    /// Requested multipart split size, adjusted to provider limits per transfer
    #[serde(deserialize_with = "deserialize_size")]
    pub multipart_chunksize: u64,
    /// Number of worker threads
    pub max_concurrent_requests: usize,
    /// Task queue capacity
    pub max_queue_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
            multipart_chunksize: DEFAULT_MULTIPART_CHUNKSIZE,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
        }
    }
}

impl RuntimeConfig {
    /// Load a JSON configuration file; missing fields keep their defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_path(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Build the configuration from CLI arguments, layered over the config file
    pub fn from_cli(args: &CliArgs) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::from_json_file(path)?,
            None => Self::default(),
        };

        if let Some(threshold) = &args.multipart_threshold {
            config.multipart_threshold = parse_size(threshold).map_err(TransferError::config)?;
        }
        if let Some(chunksize) = &args.multipart_chunksize {
            config.multipart_chunksize = parse_size(chunksize).map_err(TransferError::config)?;
        }
        if let Some(threads) = args.max_concurrent_requests {
            config.max_concurrent_requests = threads;
        }
        if let Some(size) = args.max_queue_size {
            config.max_queue_size = size;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the worker pool cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_requests == 0 {
            return Err(TransferError::config(
                "max_concurrent_requests must be at least 1",
            ));
        }
        if self.max_queue_size == 0 {
            return Err(TransferError::config("max_queue_size must be at least 1"));
        }
        if self.multipart_chunksize == 0 {
            return Err(TransferError::config("multipart_chunksize must be positive"));
        }
        Ok(())
    }
}

/// Per-run transfer parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferParams {
    /// Canned ACL for created objects
    pub acl: Option<String>,
    /// Explicit Content-Type, overriding guessing
    pub content_type: Option<String>,
    /// Storage class for created objects
    pub storage_class: Option<String>,
    /// Guess Content-Type from the source name
    pub guess_mime_type: bool,
    /// Suppress all status output
    pub quiet: bool,
    /// Only print errors and warnings
    pub only_show_errors: bool,
    /// Size hint for streamed uploads
    pub expected_size: Option<u64>,
    /// Source or destination is a stream
    pub is_stream: bool,
}

impl Default for TransferParams {
    fn default() -> Self {
        Self {
            acl: None,
            content_type: None,
            storage_class: None,
            guess_mime_type: true,
            quiet: false,
            only_show_errors: false,
            expected_size: None,
            is_stream: false,
        }
    }
}

impl TransferParams {
    /// Parameters for a `cp`/`mv` invocation
    pub fn from_args(args: &CliArgs, transfer: &TransferArgs) -> Result<Self> {
        let expected_size = transfer
            .expected_size
            .as_deref()
            .map(parse_size)
            .transpose()
            .map_err(TransferError::config)?;

        Ok(Self {
            acl: transfer.acl.clone(),
            content_type: transfer.content_type.clone(),
            storage_class: transfer.storage_class.clone(),
            guess_mime_type: !transfer.no_guess_mime_type,
            quiet: args.quiet,
            only_show_errors: args.only_show_errors,
            expected_size,
            is_stream: transfer.source == "-" || transfer.destination == "-",
        })
    }

    /// Parameters for commands without transfer options
    pub fn output_only(args: &CliArgs) -> Self {
        Self {
            quiet: args.quiet,
            only_show_errors: args.only_show_errors,
            ..Self::default()
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SizeValue {
    Bytes(u64),
    Text(String),
}

fn deserialize_size<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
    match SizeValue::deserialize(deserializer)? {
        SizeValue::Bytes(bytes) => Ok(bytes),
        SizeValue::Text(text) => parse_size(&text).map_err(serde::de::Error::custom),
    }
}

/// Parse size string (e.g., "1M", "64K", "1G", "8MB")
pub fn parse_size(size: &str) -> std::result::Result<u64, String> {
    let size = size.trim().to_uppercase();

    if size.is_empty() {
        return Err("Empty size string".to_string());
    }

    let size = size.strip_suffix("IB").map(|s| format!("{}B", s)).unwrap_or(size);
    let (num_str, multiplier) = if let Some(num) = size.strip_suffix("TB").or_else(|| size.strip_suffix('T')) {
        (num, 1024u64 * 1024 * 1024 * 1024)
    } else if let Some(num) = size.strip_suffix("GB").or_else(|| size.strip_suffix('G')) {
        (num, 1024u64 * 1024 * 1024)
    } else if let Some(num) = size.strip_suffix("MB").or_else(|| size.strip_suffix('M')) {
        (num, 1024u64 * 1024)
    } else if let Some(num) = size.strip_suffix("KB").or_else(|| size.strip_suffix('K')) {
        (num, 1024u64)
    } else if let Some(num) = size.strip_suffix('B') {
        (num, 1u64)
    } else {
        // Assume bytes if no suffix
        (size.as_str(), 1u64)
    };

    let num: f64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number: {}", num_str))?;
    if num < 0.0 {
        return Err(format!("Negative size: {}", num_str));
    }

    Ok((num * multiplier as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1024").unwrap(), 1024);
        assert_eq!(parse_size("1K").unwrap(), 1024);
        assert_eq!(parse_size("1KB").unwrap(), 1024);
        assert_eq!(parse_size("8MB").unwrap(), 8 * 1024 * 1024);
        assert_eq!(parse_size("8MiB").unwrap(), 8 * 1024 * 1024);
        assert_eq!(parse_size("1G").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_size("1.5G").unwrap(), (1.5 * 1024.0 * 1024.0 * 1024.0) as u64);
        assert!(parse_size("").is_err());
        assert!(parse_size("abc").is_err());
        assert!(parse_size("-5M").is_err());
    }

    #[test]
    fn test_runtime_config_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.multipart_threshold, 8 * 1024 * 1024);
        assert_eq!(config.multipart_chunksize, 8 * 1024 * 1024);
        assert_eq!(config.max_concurrent_requests, 10);
        assert_eq!(config.max_queue_size, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_runtime_config_validation() {
        let config = RuntimeConfig {
            max_concurrent_requests: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        let config = RuntimeConfig {
            max_queue_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"multipart_chunksize": "16MB", "max_concurrent_requests": 4, "multipart_threshold": 1024}}"#
        )
        .unwrap();

        let config = RuntimeConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.multipart_chunksize, 16 * 1024 * 1024);
        assert_eq!(config.multipart_threshold, 1024);
        assert_eq!(config.max_concurrent_requests, 4);
        assert_eq!(config.max_queue_size, DEFAULT_MAX_QUEUE_SIZE);
    }

    #[test]
    fn test_from_json_file_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            RuntimeConfig::from_json_file(file.path()),
            Err(TransferError::ConfigError(_))
        ));
    }

    #[test]
    fn test_cli_overrides() {
        let args = CliArgs::parse_from([
            "s3ferry",
            "cp",
            "a.txt",
            "s3://bucket/a.txt",
            "--multipart-chunksize",
            "5M",
            "-t",
            "3",
            "--expected-size",
            "1G",
            "--no-guess-mime-type",
        ]);
        let config = RuntimeConfig::from_cli(&args).unwrap();
        assert_eq!(config.multipart_chunksize, 5 * 1024 * 1024);
        assert_eq!(config.max_concurrent_requests, 3);

        let Commands::Copy(transfer) = &args.command else {
            panic!("expected cp");
        };
        let params = TransferParams::from_args(&args, transfer).unwrap();
        assert_eq!(params.expected_size, Some(1024 * 1024 * 1024));
        assert!(!params.guess_mime_type);
        assert!(!params.is_stream);
    }

    #[test]
    fn test_stream_detection() {
        let args = CliArgs::parse_from(["s3ferry", "cp", "-", "s3://bucket/key"]);
        let Commands::Copy(transfer) = &args.command else {
            panic!("expected cp");
        };
        assert!(TransferParams::from_args(&args, transfer).unwrap().is_stream);
    }
}
