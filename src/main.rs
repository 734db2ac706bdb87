//! S3Ferry CLI - bulk object-storage transfers
//!
//! Turns `cp`, `mv`, `rm` and `rb` invocations into transfer records and
//! runs them through the worker pool.

use anyhow::{bail, Context};
use clap::Parser;
use s3ferry::config::{CliArgs, Commands, RuntimeConfig, TransferArgs, TransferParams};
use s3ferry::core::RunResult;
use s3ferry::storage::{HeadObjectRequest, NativeS3Client, NativeS3Config, ObjectStore};
use s3ferry::transfer::{
    Location, OperationKind, StreamTransferHandler, TransferHandler, TransferRecord, REMOTE_SCHEME,
    STREAM_PATH,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

fn main() {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Initialize logging
    let default_level = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(&args) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn run(args: &CliArgs) -> anyhow::Result<i32> {
    let config = RuntimeConfig::from_cli(args)?;
    debug!(?config, "Runtime configuration");

    let client: Arc<dyn ObjectStore> = Arc::new(
        NativeS3Client::new(NativeS3Config {
            region: args.region.clone(),
            endpoint_url: args.endpoint_url.clone(),
            force_path_style: args.force_path_style,
            ..NativeS3Config::default()
        })
        .context("could not create S3 client")?,
    );

    let result = match &args.command {
        Commands::Copy(transfer) => cmd_transfer(args, transfer, false, client, config)?,
        Commands::Move(transfer) => cmd_transfer(args, transfer, true, client, config)?,
        Commands::Remove { target } => {
            let record = TransferRecord::delete(Location::parse(target));
            run_records(client, config, TransferParams::output_only(args), vec![record])?
        }
        Commands::RemoveBucket { bucket } => {
            let name = bucket
                .strip_prefix(REMOTE_SCHEME)
                .unwrap_or(bucket)
                .trim_end_matches('/');
            if name.is_empty() || name.contains('/') {
                bail!("not a bucket: {}", bucket);
            }
            let record = TransferRecord::remove_bucket(name);
            run_records(client, config, TransferParams::output_only(args), vec![record])?
        }
    };

    Ok(result.exit_code())
}

fn run_records(
    client: Arc<dyn ObjectStore>,
    config: RuntimeConfig,
    params: TransferParams,
    records: Vec<TransferRecord>,
) -> anyhow::Result<RunResult> {
    let quiet = params.quiet;
    let handler = TransferHandler::new(client, config, params)?;
    let result = handler.call(records);
    if !quiet {
        result.print_summary();
    }
    Ok(result)
}

fn cmd_transfer(
    args: &CliArgs,
    transfer: &TransferArgs,
    is_move: bool,
    client: Arc<dyn ObjectStore>,
    config: RuntimeConfig,
) -> anyhow::Result<RunResult> {
    let params = TransferParams::from_args(args, transfer)?;
    let source = Location::parse(&transfer.source);
    let destination = Location::parse(&transfer.destination);

    if params.is_stream {
        if is_move {
            bail!("streams cannot be moved");
        }
        let kind = if source.is_remote() {
            OperationKind::Download
        } else {
            OperationKind::Upload
        };
        let record = TransferRecord::new(kind, source, Some(destination));
        let mut handler = StreamTransferHandler::new(client, &config, params)?;
        return Ok(handler.call(&record));
    }

    let kind = match (is_move, source.is_remote(), destination.is_remote()) {
        (true, _, _) => OperationKind::Move,
        (false, false, true) => OperationKind::Upload,
        (false, true, false) => OperationKind::Download,
        (false, true, true) => OperationKind::Copy,
        (false, false, false) => bail!("one side of the transfer must be s3://bucket/key"),
    };

    let records = match &source {
        Location::Local(path) if transfer.recursive => {
            local_tree(kind, path, &transfer.destination)?
        }
        Location::Local(path) => vec![local_record(kind, path, resolve(&transfer.destination, path))?],
        Location::Remote { .. } if transfer.recursive => {
            bail!("recursive transfers from s3:// sources are not supported")
        }
        Location::Remote { bucket, key } => {
            let head = client
                .head_object(HeadObjectRequest {
                    bucket: bucket.clone(),
                    key: key.clone(),
                })
                .with_context(|| format!("could not stat {}", source))?;
            let name = Path::new(key.as_str());
            let mut record = TransferRecord::new(
                kind,
                source.clone(),
                Some(Location::parse(&resolve(&transfer.destination, name))),
            )
            .with_size(head.content_length);
            if let Some(modified) = head.last_modified {
                record = record.with_last_modified(modified);
            }
            vec![record]
        }
    };

    run_records(client, config, params, records)
}

/// Append the source file name when the destination names a directory or prefix
fn resolve(destination: &str, source: &Path) -> String {
    let is_prefix = destination.ends_with('/')
        || destination == "."
        || (!destination.starts_with(REMOTE_SCHEME) && Path::new(destination).is_dir());
    match source.file_name() {
        Some(name) if is_prefix => {
            let separator = if destination.ends_with('/') { "" } else { "/" };
            format!("{}{}{}", destination, separator, name.to_string_lossy())
        }
        _ => destination.to_string(),
    }
}

fn local_record(kind: OperationKind, path: &Path, destination: String) -> anyhow::Result<TransferRecord> {
    let metadata = std::fs::metadata(path).with_context(|| format!("could not stat {}", path.display()))?;
    let mut record = TransferRecord::new(
        kind,
        Location::Local(path.to_path_buf()),
        Some(Location::parse(&destination)),
    )
    .with_size(metadata.len());
    if let Ok(modified) = metadata.modified() {
        record = record.with_last_modified(modified);
    }
    Ok(record)
}

fn local_tree(kind: OperationKind, root: &Path, destination: &str) -> anyhow::Result<Vec<TransferRecord>> {
    if root == Path::new(STREAM_PATH) {
        bail!("--recursive cannot read from a stream");
    }
    let prefix = destination.trim_end_matches('/');
    let mut records = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.with_context(|| format!("could not walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative: PathBuf = entry.path().strip_prefix(root)?.to_path_buf();
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        records.push(local_record(kind, entry.path(), format!("{}/{}", prefix, key))?);
    }
    debug!("Found {} files under {}", records.len(), root.display());
    Ok(records)
}
