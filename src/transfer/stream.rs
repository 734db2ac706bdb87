//! Streaming transfers
//!
//! `-` as a source uploads stdin, `-` as a destination downloads to stdout.
//! Streams bypass the task pool and go through a [`TransferManager`], which
//! hands back a [`TransferFuture`] whose blocking [`TransferFuture::result`]
//! reports the outcome.

use super::record::{Action, TransferRecord};
use crate::config::{RuntimeConfig, TransferParams};
use crate::core::{RunResult, TransferLimits};
use crate::error::{Result, TransferError};
use crate::progress::{StatusMessage, StatusPrinter};
use crate::storage::*;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Source or destination name that stands for stdin/stdout
pub const STREAM_PATH: &str = "-";

/// Metadata a transfer collects before it starts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferMeta {
    size: Option<u64>,
}

impl TransferMeta {
    /// Announce the total size of the transfer
    pub fn provide_transfer_size(&mut self, size: u64) {
        self.size = Some(size);
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }
}

/// Hook invoked by a transfer manager before the transfer starts
pub trait Subscriber: Send + Sync {
    fn on_queued(&self, meta: &mut TransferMeta);
}

/// Supplies a known total size to a stream whose length cannot be probed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProvideSizeSubscriber {
    size: u64,
}

impl ProvideSizeSubscriber {
    pub fn new(size: u64) -> Self {
        Self { size }
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Subscriber for ProvideSizeSubscriber {
    fn on_queued(&self, meta: &mut TransferMeta) {
        meta.provide_transfer_size(self.size);
    }
}

/// Handle on a transfer that may still be running
pub struct TransferFuture {
    state: FutureState,
}

enum FutureState {
    Ready(Result<()>),
    Running(JoinHandle<Result<()>>),
}

impl TransferFuture {
    /// A transfer that has already finished
    pub fn ready(result: Result<()>) -> Self {
        Self {
            state: FutureState::Ready(result),
        }
    }

    /// A transfer running on `handle`
    pub fn running(handle: JoinHandle<Result<()>>) -> Self {
        Self {
            state: FutureState::Running(handle),
        }
    }

    /// Block until the transfer finishes
    pub fn result(self) -> Result<()> {
        match self.state {
            FutureState::Ready(result) => result,
            FutureState::Running(handle) => handle
                .join()
                .unwrap_or_else(|_| Err(TransferError::Stream("transfer thread panicked".to_string()))),
        }
    }
}

/// Streaming transfer engine
pub trait TransferManager: Send + Sync {
    fn upload(
        &self,
        source: Box<dyn Read + Send>,
        bucket: &str,
        key: &str,
        subscribers: Vec<Box<dyn Subscriber>>,
    ) -> TransferFuture;

    fn download(&self, bucket: &str, key: &str, destination: Box<dyn Write + Send>) -> TransferFuture;
}

/// [`TransferManager`] that streams through an [`ObjectStore`].
///
/// Uploads are buffered one chunk at a time; a stream that fits in one chunk
/// becomes a single PutObject, anything longer a sequential multipart upload.
pub struct StoreTransferManager {
    client: Arc<dyn ObjectStore>,
    chunksize: u64,
    params: Arc<TransferParams>,
}

impl StoreTransferManager {
    pub fn new(client: Arc<dyn ObjectStore>, chunksize: u64, params: Arc<TransferParams>) -> Self {
        Self {
            client,
            chunksize: chunksize.max(1),
            params,
        }
    }

    fn spawn(name: &str, work: impl FnOnce() -> Result<()> + Send + 'static) -> TransferFuture {
        match thread::Builder::new().name(name.to_string()).spawn(work) {
            Ok(handle) => TransferFuture::running(handle),
            Err(source) => TransferFuture::ready(Err(TransferError::Spawn {
                name: name.to_string(),
                source,
            })),
        }
    }
}

impl TransferManager for StoreTransferManager {
    fn upload(
        &self,
        source: Box<dyn Read + Send>,
        bucket: &str,
        key: &str,
        subscribers: Vec<Box<dyn Subscriber>>,
    ) -> TransferFuture {
        let mut meta = TransferMeta::default();
        for subscriber in &subscribers {
            subscriber.on_queued(&mut meta);
        }
        if let Some(size) = meta.size() {
            debug!("Streaming upload of {} bytes to {}/{}", size, bucket, key);
        }

        let upload = StreamUpload {
            client: Arc::clone(&self.client),
            params: Arc::clone(&self.params),
            bucket: bucket.to_string(),
            key: key.to_string(),
            chunksize: self.chunksize,
        };
        Self::spawn("stream-upload", move || upload.run(source))
    }

    fn download(&self, bucket: &str, key: &str, mut destination: Box<dyn Write + Send>) -> TransferFuture {
        let client = Arc::clone(&self.client);
        let request = GetObjectRequest {
            bucket: bucket.to_string(),
            key: key.to_string(),
            range: None,
        };
        Self::spawn("stream-download", move || {
            let output = client.get_object(request)?;
            let mut body = output.body.ok_or(TransferError::MissingField {
                operation: "GetObject",
                field: "Body",
            })?;
            io::copy(&mut body, &mut destination)
                .and_then(|_| destination.flush())
                .map_err(|e| TransferError::Stream(e.to_string()))
        })
    }
}

struct StreamUpload {
    client: Arc<dyn ObjectStore>,
    params: Arc<TransferParams>,
    bucket: String,
    key: String,
    chunksize: u64,
}

impl StreamUpload {
    fn run(self, mut source: Box<dyn Read + Send>) -> Result<()> {
        let first = self.read_chunk(&mut source)?;
        if (first.len() as u64) < self.chunksize {
            self.client.put_object(PutObjectRequest {
                bucket: self.bucket.clone(),
                key: self.key.clone(),
                body: first,
                content_type: self.content_type(),
                acl: self.params.acl.clone(),
                storage_class: self.params.storage_class.clone(),
            })?;
            return Ok(());
        }

        let upload_id = self
            .client
            .create_multipart_upload(CreateMultipartUploadRequest {
                bucket: self.bucket.clone(),
                key: self.key.clone(),
                content_type: self.content_type(),
                acl: self.params.acl.clone(),
                storage_class: self.params.storage_class.clone(),
            })?
            .upload_id
            .ok_or(TransferError::MissingField {
                operation: "CreateMultipartUpload",
                field: "UploadId",
            })?;

        match self.upload_parts(&upload_id, first, &mut source) {
            Ok(parts) => self.client.complete_multipart_upload(CompleteMultipartUploadRequest {
                bucket: self.bucket.clone(),
                key: self.key.clone(),
                upload_id,
                parts,
            }),
            Err(e) => {
                let abort = self.client.abort_multipart_upload(AbortMultipartUploadRequest {
                    bucket: self.bucket.clone(),
                    key: self.key.clone(),
                    upload_id: upload_id.clone(),
                });
                if let Err(abort_error) = abort {
                    warn!("Aborting multipart upload {} failed: {}", upload_id, abort_error);
                }
                Err(e)
            }
        }
    }

    fn content_type(&self) -> Option<String> {
        if self.params.content_type.is_some() {
            return self.params.content_type.clone();
        }
        if !self.params.guess_mime_type {
            return None;
        }
        guess_content_type(&self.key).map(str::to_string)
    }

    fn upload_parts(
        &self,
        upload_id: &str,
        first: Vec<u8>,
        source: &mut Box<dyn Read + Send>,
    ) -> Result<Vec<CompletedPart>> {
        let mut parts = Vec::new();
        let mut chunk = first;
        let mut part_number = 1u32;
        while !chunk.is_empty() {
            let output = self.client.upload_part(UploadPartRequest {
                bucket: self.bucket.clone(),
                key: self.key.clone(),
                upload_id: upload_id.to_string(),
                part_number,
                body: chunk,
            })?;
            let e_tag = output.e_tag.ok_or(TransferError::MissingField {
                operation: "UploadPart",
                field: "ETag",
            })?;
            parts.push(CompletedPart { part_number, e_tag });
            part_number += 1;
            chunk = self.read_chunk(source)?;
        }
        Ok(parts)
    }

    fn read_chunk(&self, source: &mut Box<dyn Read + Send>) -> Result<Vec<u8>> {
        let mut chunk = Vec::new();
        source
            .take(self.chunksize)
            .read_to_end(&mut chunk)
            .map_err(|e| TransferError::Stream(e.to_string()))?;
        Ok(chunk)
    }
}

/// Runs a single stdin/stdout transfer
pub struct StreamTransferHandler {
    manager: Arc<dyn TransferManager>,
    params: TransferParams,
    chunksize: u64,
    printer: StatusPrinter,
}

impl StreamTransferHandler {
    /// Create a handler streaming through `client`.
    ///
    /// The configured chunksize is adjusted to provider limits up front, using
    /// the expected size as the total when one was given.
    pub fn new(client: Arc<dyn ObjectStore>, config: &RuntimeConfig, params: TransferParams) -> Result<Self> {
        config.validate()?;
        let chunksize =
            TransferLimits::default().adjust_chunksize(config.multipart_chunksize, params.expected_size);
        let manager = StoreTransferManager::new(client, chunksize, Arc::new(params.clone()));
        let printer = StatusPrinter::new(params.quiet, params.only_show_errors);
        Ok(Self {
            manager: Arc::new(manager),
            params,
            chunksize,
            printer,
        })
    }

    /// Use another transfer engine
    pub fn with_manager(mut self, manager: Arc<dyn TransferManager>) -> Self {
        self.manager = manager;
        self
    }

    /// Print failures with `printer`
    pub fn with_printer(mut self, printer: StatusPrinter) -> Self {
        self.printer = printer;
        self
    }

    /// Adjusted chunksize handed to the transfer engine
    pub fn chunksize(&self) -> u64 {
        self.chunksize
    }

    /// Upload `source` to `bucket/key`
    pub fn upload(&mut self, source: Box<dyn Read + Send>, bucket: &str, key: &str) -> RunResult {
        let subscribers: Vec<Box<dyn Subscriber>> = match self.params.expected_size {
            Some(size) => vec![Box::new(ProvideSizeSubscriber::new(size))],
            None => Vec::new(),
        };
        let outcome = self.manager.upload(source, bucket, key, subscribers).result();
        let description = format!("{} to s3://{}/{}", STREAM_PATH, bucket, key);
        self.finish("upload", description, outcome)
    }

    /// Download `bucket/key` into `destination`
    pub fn download(&mut self, bucket: &str, key: &str, destination: Box<dyn Write + Send>) -> RunResult {
        let outcome = self.manager.download(bucket, key, destination).result();
        let description = format!("s3://{}/{} to {}", bucket, key, STREAM_PATH);
        self.finish("download", description, outcome)
    }

    /// Run a record whose local side is `-`
    pub fn call(&mut self, record: &TransferRecord) -> RunResult {
        let is_stream = |location: Option<&Path>| location == Some(Path::new(STREAM_PATH));
        let destination = record.destination.as_ref();

        match record.action() {
            Ok(Action::Upload) if is_stream(record.source.as_local()) => {
                if let Some((bucket, key)) = destination.and_then(|d| d.as_remote()) {
                    return self.upload(Box::new(io::stdin()), bucket, key);
                }
            }
            Ok(Action::Download) if is_stream(destination.and_then(|d| d.as_local())) => {
                if let Some((bucket, key)) = record.source.as_remote() {
                    return self.download(bucket, key, Box::new(io::stdout()));
                }
            }
            Ok(_) => {}
            Err(e) => return self.finish(record.kind.as_str(), record.describe(), Err(e)),
        }

        let error = TransferError::InvalidRecord(format!("not a stream transfer: {}", record.describe()));
        self.finish(record.kind.as_str(), record.describe(), Err(error))
    }

    fn finish(&mut self, operation: &'static str, description: String, outcome: Result<()>) -> RunResult {
        match outcome {
            Ok(()) => {
                debug!("{}: {}", operation, description);
                RunResult {
                    tasks_succeeded: 1,
                    ..RunResult::default()
                }
            }
            Err(e) => {
                warn!("{} failed: {}: {}", operation, description, e);
                let message = StatusMessage::Failure {
                    operation,
                    description,
                    error: e.to_string(),
                };
                if let Err(io_error) = self.printer.print(&message) {
                    debug!("Could not write status line: {}", io_error);
                }
                RunResult {
                    tasks_failed: 1,
                    ..RunResult::default()
                }
            }
        }
    }
}
