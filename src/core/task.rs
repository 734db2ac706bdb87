//! Tasks and their execution
//!
//! A [`Task`] is one remote call or local filesystem step of a logical
//! [`Operation`]. Tasks that finish a step schedule the next one themselves
//! as follow-ups, so an operation advances without any coordinator thread.
//!
//! Multipart parts are fed into the queue only while it has room. Every
//! finished part feeds the next ones, and an operation with nothing queued
//! or running always gets one part in, so the queue never holds more than
//! its capacity plus one item per active operation.

use super::chunksize::{part_range, PartRange};
use super::executor::{panic_message, WorkerContext};
use super::multipart::{MultipartDownload, MultipartUpload, PartCursor, UploadStep};
use super::queue::{Prioritized, Priority};
use crate::config::TransferParams;
use crate::error::{Result, TransferError};
use crate::fs::local;
use crate::progress::StatusMessage;
use crate::storage::*;
use crate::transfer::{OperationKind, TransferRecord};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Atomic operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    SingleUpload,
    CreateMultipartUpload,
    UploadPart(PartRange),
    CopyPart(PartRange),
    CompleteMultipartUpload,
    AbortMultipartUpload,
    Copy,
    Download,
    CreateLocalFile,
    DownloadPart(PartRange),
    CompleteDownload,
    Delete,
    RemoveBucket,
}

impl TaskKind {
    /// Stable name, used in logs and by insert policies
    pub fn name(&self) -> &'static str {
        match self {
            Self::SingleUpload => "SingleUpload",
            Self::CreateMultipartUpload => "CreateMultipartUpload",
            Self::UploadPart(_) => "UploadPart",
            Self::CopyPart(_) => "CopyPart",
            Self::CompleteMultipartUpload => "CompleteMultipartUpload",
            Self::AbortMultipartUpload => "AbortMultipartUpload",
            Self::Copy => "Copy",
            Self::Download => "Download",
            Self::CreateLocalFile => "CreateLocalFile",
            Self::DownloadPart(_) => "DownloadPart",
            Self::CompleteDownload => "CompleteDownload",
            Self::Delete => "Delete",
            Self::RemoveBucket => "RemoveBucket",
        }
    }
}

/// Everything the tasks of one logical operation share
pub struct Operation {
    record: TransferRecord,
    client: Arc<dyn ObjectStore>,
    source_client: Arc<dyn ObjectStore>,
    params: Arc<TransferParams>,
    upload: Option<MultipartUpload>,
    download: Option<MultipartDownload>,
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("record", &self.record)
            .field("upload", &self.upload)
            .field("download", &self.download)
            .finish_non_exhaustive()
    }
}

impl Operation {
    /// Create an operation. Clients on the record take precedence over the given defaults.
    pub fn new(
        record: TransferRecord,
        client: Arc<dyn ObjectStore>,
        source_client: Option<Arc<dyn ObjectStore>>,
        params: Arc<TransferParams>,
    ) -> Self {
        let client = record.client.clone().unwrap_or(client);
        let source_client = record
            .source_client
            .clone()
            .or(source_client)
            .unwrap_or_else(|| Arc::clone(&client));
        Self {
            record,
            client,
            source_client,
            params,
            upload: None,
            download: None,
        }
    }

    /// Attach multipart upload state
    pub fn with_multipart_upload(mut self, upload: MultipartUpload) -> Self {
        self.upload = Some(upload);
        self
    }

    /// Attach multipart download state
    pub fn with_multipart_download(mut self, download: MultipartDownload) -> Self {
        self.download = Some(download);
        self
    }

    pub fn record(&self) -> &TransferRecord {
        &self.record
    }

    pub fn multipart_upload(&self) -> Option<&MultipartUpload> {
        self.upload.as_ref()
    }

    pub fn multipart_download(&self) -> Option<&MultipartDownload> {
        self.download.as_ref()
    }

    /// Record the operation as succeeded
    pub(crate) fn succeed(&self, ctx: &WorkerContext) {
        info!("{}: {}", self.record.kind, self.record.describe());
        ctx.results.record_success();
        ctx.report(StatusMessage::Success {
            operation: self.record.kind.as_str(),
            description: self.record.describe(),
        });
    }

    /// Record the operation as failed
    pub(crate) fn fail(&self, ctx: &WorkerContext, error: impl fmt::Display) {
        warn!("{} failed: {}: {}", self.record.kind, self.record.describe(), error);
        ctx.results.record_failure();
        ctx.report(StatusMessage::Failure {
            operation: self.record.kind.as_str(),
            description: self.record.describe(),
            error: error.to_string(),
        });
    }

    /// Record the operation as skipped with a warning
    pub(crate) fn skip(&self, ctx: &WorkerContext, message: String) {
        warn!("{}", message);
        ctx.results.record_warning();
        ctx.report(StatusMessage::Warning { message });
    }

    /// Skip or fail the operation, depending on how severe `error` is
    pub(crate) fn reject(&self, ctx: &WorkerContext, error: TransferError) {
        if error.is_warning() {
            self.skip(ctx, error.to_string());
        } else {
            self.fail(ctx, error);
        }
    }

    /// The transfer part of the operation is done; moves still delete their source
    fn transfer_finished(self: &Arc<Self>, ctx: &WorkerContext) {
        if self.record.kind != OperationKind::Move {
            self.succeed(ctx);
            return;
        }
        let delete = Task::follow_up(Arc::clone(self), TaskKind::Delete);
        if let Err(e) = ctx.scheduler.follow_up(delete) {
            self.fail(ctx, e);
        }
    }

    fn finish_transfer(self: &Arc<Self>, ctx: &WorkerContext, result: Result<()>) {
        match result {
            Ok(()) => self.transfer_finished(ctx),
            Err(e) => self.fail(ctx, e),
        }
    }

    fn content_type(&self) -> Option<String> {
        if let Some(content_type) = &self.params.content_type {
            return Some(content_type.clone());
        }
        if !self.params.guess_mime_type {
            return None;
        }
        let name = self.record.source.file_name()?;
        guess_content_type(&name).map(str::to_string)
    }

    fn source_object(&self) -> Result<(&str, &str)> {
        self.record
            .source
            .as_remote()
            .ok_or_else(|| self.invalid("source is not remote"))
    }

    fn destination_object(&self) -> Result<(&str, &str)> {
        self.record
            .destination
            .as_ref()
            .and_then(|d| d.as_remote())
            .ok_or_else(|| self.invalid("destination is not remote"))
    }

    fn source_path(&self) -> Result<&Path> {
        self.record
            .source
            .as_local()
            .ok_or_else(|| self.invalid("source is not local"))
    }

    fn destination_path(&self) -> Result<&Path> {
        self.record
            .destination
            .as_ref()
            .and_then(|d| d.as_local())
            .ok_or_else(|| self.invalid("destination is not local"))
    }

    fn invalid(&self, reason: &str) -> TransferError {
        TransferError::InvalidRecord(format!("{}: {}", reason, self.record.describe()))
    }

    fn apply_mtime(&self, path: &Path) {
        if let Some(mtime) = self.record.last_modified {
            if let Err(e) = local::set_mtime(path, mtime) {
                warn!("Downloaded {} but could not set its modification time: {}", path.display(), e);
            }
        }
    }
}

/// One schedulable unit of work
#[derive(Debug)]
pub struct Task {
    pub priority: Priority,
    pub op: Arc<Operation>,
    pub kind: TaskKind,
}

impl Task {
    /// First task of an operation, admitted at normal priority
    pub fn new(op: Arc<Operation>, kind: TaskKind) -> Self {
        Self {
            priority: Priority::Normal,
            op,
            kind,
        }
    }

    /// Task continuing an operation already in flight
    pub fn follow_up(op: Arc<Operation>, kind: TaskKind) -> Self {
        Self {
            priority: Priority::Immediate,
            op,
            kind,
        }
    }

    /// Run the task on the calling worker
    pub fn execute(self, ctx: &WorkerContext) {
        let Task { op, kind, .. } = self;
        debug!(task = kind.name(), "{}", op.record.describe());

        match kind {
            TaskKind::SingleUpload => op.finish_transfer(ctx, single_upload(&op)),
            TaskKind::Copy => op.finish_transfer(ctx, copy_object(&op)),
            TaskKind::Download => op.finish_transfer(ctx, download(&op)),
            TaskKind::CreateMultipartUpload => create_multipart_upload(&op, ctx),
            TaskKind::UploadPart(range) => upload_part(&op, ctx, range, false),
            TaskKind::CopyPart(range) => upload_part(&op, ctx, range, true),
            TaskKind::CompleteMultipartUpload => complete_multipart_upload(&op, ctx),
            TaskKind::AbortMultipartUpload => abort_multipart_upload(&op, ctx),
            TaskKind::CreateLocalFile => create_local_file(&op, ctx),
            TaskKind::DownloadPart(range) => download_part(&op, ctx, range),
            TaskKind::CompleteDownload => complete_download(&op, ctx),
            TaskKind::Delete => match delete(&op) {
                Ok(()) => op.succeed(ctx),
                Err(e) => op.fail(ctx, e),
            },
            TaskKind::RemoveBucket => match remove_bucket(&op) {
                Ok(()) => op.succeed(ctx),
                Err(e) => op.fail(ctx, e),
            },
        }
    }
}

/// Items on the executor queue
#[derive(Debug)]
pub enum Job {
    Run(Task),
    /// Tells the worker that dequeues it to exit
    Shutdown,
}

impl Prioritized for Job {
    fn priority(&self) -> Priority {
        match self {
            Job::Run(task) => task.priority,
            Job::Shutdown => Priority::Shutdown,
        }
    }

    fn describe(&self) -> String {
        match self {
            Job::Run(task) => format!("{} task for {}", task.kind.name(), task.op.record.describe()),
            Job::Shutdown => "shutdown sentinel".to_string(),
        }
    }
}

fn single_upload(op: &Operation) -> Result<()> {
    let path = op.source_path()?;
    let (bucket, key) = op.destination_object()?;
    let body = local::read_file(path)?;
    op.client.put_object(PutObjectRequest {
        bucket: bucket.to_string(),
        key: key.to_string(),
        body,
        content_type: op.content_type(),
        acl: op.params.acl.clone(),
        storage_class: op.params.storage_class.clone(),
    })?;
    Ok(())
}

fn copy_object(op: &Operation) -> Result<()> {
    let (source_bucket, source_key) = op.source_object()?;
    let (bucket, key) = op.destination_object()?;
    op.client.copy_object(CopyObjectRequest {
        bucket: bucket.to_string(),
        key: key.to_string(),
        copy_source: encode_copy_source(source_bucket, source_key),
        content_type: op.content_type(),
        acl: op.params.acl.clone(),
        storage_class: op.params.storage_class.clone(),
    })
}

fn download(op: &Operation) -> Result<()> {
    let (bucket, key) = op.source_object()?;
    let path = op.destination_path()?;
    let output = op.source_client.get_object(GetObjectRequest {
        bucket: bucket.to_string(),
        key: key.to_string(),
        range: None,
    })?;
    let body = output.body.ok_or(TransferError::MissingField {
        operation: "GetObject",
        field: "Body",
    })?;

    if let Err(e) = local::write_stream(path, body) {
        local::discard_partial(path);
        return Err(e);
    }
    op.apply_mtime(path);
    Ok(())
}

fn delete(op: &Operation) -> Result<()> {
    if let Some(path) = op.record.source.as_local() {
        return local::remove_file(path);
    }
    let (bucket, key) = op.source_object()?;
    op.source_client.delete_object(DeleteObjectRequest {
        bucket: bucket.to_string(),
        key: key.to_string(),
    })
}

fn remove_bucket(op: &Operation) -> Result<()> {
    let (bucket, _) = op.source_object()?;
    op.client.delete_bucket(DeleteBucketRequest {
        bucket: bucket.to_string(),
    })
}

fn missing_state(op: &Operation, ctx: &WorkerContext, task: TaskKind) {
    op.fail(ctx, op.invalid(&format!("{} without multipart state", task.name())));
}

fn create_multipart_upload(op: &Arc<Operation>, ctx: &WorkerContext) {
    let Some(state) = op.multipart_upload() else {
        return missing_state(op, ctx, TaskKind::CreateMultipartUpload);
    };
    if !state.begin_create() {
        return;
    }

    match request_upload_id(op) {
        Ok(upload_id) => {
            debug!("Created multipart upload {} for {}", upload_id, op.record.describe());
            state.created(upload_id);
            schedule_upload_parts(op, ctx, state);
        }
        Err(e) => {
            state.create_failed(e.to_string());
            op.fail(ctx, e);
        }
    }
}

fn request_upload_id(op: &Operation) -> Result<String> {
    let (bucket, key) = op.destination_object()?;
    let output = op.client.create_multipart_upload(CreateMultipartUploadRequest {
        bucket: bucket.to_string(),
        key: key.to_string(),
        content_type: op.content_type(),
        acl: op.params.acl.clone(),
        storage_class: op.params.storage_class.clone(),
    })?;
    output.upload_id.ok_or(TransferError::MissingField {
        operation: "CreateMultipartUpload",
        field: "UploadId",
    })
}

/// Queue pending parts while the queue has room
fn feed_parts<S: PartCursor>(
    op: &Arc<Operation>,
    ctx: &WorkerContext,
    state: &S,
    kind: fn(PartRange) -> TaskKind,
) -> Result<()> {
    while let Some(index) = state.next_part() {
        let range = part_range(op.record.size, state.chunksize(), index);
        if ctx.scheduler.offer(Task::follow_up(Arc::clone(op), kind(range)))? {
            continue;
        }
        if !state.defer_part(index) {
            // Nothing else of this operation is queued or running
            ctx.scheduler.follow_up(Task::follow_up(Arc::clone(op), kind(range)))?;
        }
        break;
    }
    Ok(())
}

fn schedule_upload_parts(op: &Arc<Operation>, ctx: &WorkerContext, state: &MultipartUpload) {
    let kind: fn(PartRange) -> TaskKind = if op.record.source.is_remote() {
        TaskKind::CopyPart
    } else {
        TaskKind::UploadPart
    };
    if let Err(e) = feed_parts(op, ctx, state, kind) {
        warn!("Could not schedule parts of {}: {}", op.record.describe(), e);
        let step = state.schedule_failed(e.to_string());
        advance_upload(op, ctx, state, step);
    }
}

/// Schedule whatever the multipart state asked for next
fn advance_upload(op: &Arc<Operation>, ctx: &WorkerContext, state: &MultipartUpload, step: UploadStep) {
    match step {
        UploadStep::Wait => {}
        UploadStep::Complete => {
            let complete = Task::follow_up(Arc::clone(op), TaskKind::CompleteMultipartUpload);
            if let Err(e) = ctx.scheduler.follow_up(complete) {
                warn!("Could not schedule completion: {}", e);
                let step = state.complete_failed(e.to_string());
                advance_upload(op, ctx, state, step);
            }
        }
        UploadStep::Abort => {
            let abort = Task::follow_up(Arc::clone(op), TaskKind::AbortMultipartUpload);
            if let Err(e) = ctx.scheduler.follow_up(abort) {
                warn!("Could not schedule abort, aborting inline: {}", e);
                abort_multipart_upload(op, ctx);
            }
        }
    }
}

fn upload_part(op: &Arc<Operation>, ctx: &WorkerContext, range: PartRange, copy: bool) {
    let Some(state) = op.multipart_upload() else {
        return missing_state(op, ctx, TaskKind::UploadPart(range));
    };
    let Some(upload_id) = state.begin_part() else {
        debug!("Skipping part {} of {}", range.number, op.record.describe());
        return;
    };

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        if copy {
            send_copy_part(op, &upload_id, range)
        } else {
            send_upload_part(op, &upload_id, range)
        }
    }))
    .unwrap_or_else(|payload| Err(part_panicked(op, range, payload.as_ref())));
    let step = match result {
        Ok(e_tag) => {
            let step = state.part_succeeded(range.number, e_tag);
            if step == UploadStep::Wait {
                schedule_upload_parts(op, ctx, state);
            }
            step
        }
        Err(e) => {
            warn!("Part {} of {} failed: {}", range.number, op.record.describe(), e);
            state.part_failed(e.to_string())
        }
    };
    advance_upload(op, ctx, state, step);
}

fn part_panicked(op: &Operation, range: PartRange, payload: &(dyn std::any::Any + Send)) -> TransferError {
    let message = panic_message(payload);
    error!("Part {} of {} panicked: {}", range.number, op.record.describe(), message);
    TransferError::WorkerPanic(message)
}

fn send_upload_part(op: &Operation, upload_id: &str, range: PartRange) -> Result<String> {
    let path = op.source_path()?;
    let (bucket, key) = op.destination_object()?;
    let body = local::read_range(path, range.start, range.length())?;
    let output = op.client.upload_part(UploadPartRequest {
        bucket: bucket.to_string(),
        key: key.to_string(),
        upload_id: upload_id.to_string(),
        part_number: range.number,
        body,
    })?;
    output.e_tag.ok_or(TransferError::MissingField {
        operation: "UploadPart",
        field: "ETag",
    })
}

fn send_copy_part(op: &Operation, upload_id: &str, range: PartRange) -> Result<String> {
    let (source_bucket, source_key) = op.source_object()?;
    let (bucket, key) = op.destination_object()?;
    let output = op.client.upload_part_copy(UploadPartCopyRequest {
        bucket: bucket.to_string(),
        key: key.to_string(),
        upload_id: upload_id.to_string(),
        part_number: range.number,
        copy_source: encode_copy_source(source_bucket, source_key),
        copy_source_range: range.closed_header(),
    })?;
    output
        .copy_part_result
        .and_then(|result| result.e_tag)
        .ok_or(TransferError::MissingField {
            operation: "UploadPartCopy",
            field: "CopyPartResult.ETag",
        })
}

fn complete_multipart_upload(op: &Arc<Operation>, ctx: &WorkerContext) {
    let Some(state) = op.multipart_upload() else {
        return missing_state(op, ctx, TaskKind::CompleteMultipartUpload);
    };
    let Some((upload_id, parts)) = state.completion() else {
        return;
    };

    let result = op.destination_object().and_then(|(bucket, key)| {
        op.client.complete_multipart_upload(CompleteMultipartUploadRequest {
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id,
            parts,
        })
    });
    match result {
        Ok(()) => {
            state.completed();
            op.transfer_finished(ctx);
        }
        Err(e) => {
            warn!("Completing {} failed: {}", op.record.describe(), e);
            let step = state.complete_failed(e.to_string());
            advance_upload(op, ctx, state, step);
        }
    }
}

fn abort_multipart_upload(op: &Arc<Operation>, ctx: &WorkerContext) {
    let Some(state) = op.multipart_upload() else {
        return missing_state(op, ctx, TaskKind::AbortMultipartUpload);
    };
    let Some((upload_id, reason)) = state.abort_target() else {
        return;
    };

    let result = op.destination_object().and_then(|(bucket, key)| {
        op.client.abort_multipart_upload(AbortMultipartUploadRequest {
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id: upload_id.clone(),
        })
    });
    match result {
        Ok(()) => {
            debug!("Aborted multipart upload {}", upload_id);
            state.abort_finished(true);
        }
        Err(e) => {
            warn!("Aborting multipart upload {} failed: {}", upload_id, e);
            state.abort_finished(false);
        }
    }
    op.fail(ctx, reason);
}

fn create_local_file(op: &Arc<Operation>, ctx: &WorkerContext) {
    let Some(state) = op.multipart_download() else {
        return missing_state(op, ctx, TaskKind::CreateLocalFile);
    };
    let path = match op.destination_path() {
        Ok(path) => path,
        Err(e) => return op.fail(ctx, e),
    };

    match local::create_file(path) {
        Ok(file) => {
            state.opened(file);
            schedule_download_parts(op, ctx, state);
        }
        Err(e) => {
            local::discard_partial(path);
            op.fail(ctx, e);
        }
    }
}

fn schedule_download_parts(op: &Arc<Operation>, ctx: &WorkerContext, state: &MultipartDownload) {
    if let Err(e) = feed_parts(op, ctx, state, TaskKind::DownloadPart) {
        warn!("Could not schedule parts of {}: {}", op.record.describe(), e);
        if state.part_failed(e.to_string(), false) {
            schedule_complete_download(op, ctx);
        }
    }
}

fn schedule_complete_download(op: &Arc<Operation>, ctx: &WorkerContext) {
    let complete = Task::follow_up(Arc::clone(op), TaskKind::CompleteDownload);
    if let Err(e) = ctx.scheduler.follow_up(complete) {
        warn!("Could not schedule download completion, finishing inline: {}", e);
        complete_download(op, ctx);
    }
}

fn download_part(op: &Arc<Operation>, ctx: &WorkerContext, range: PartRange) {
    let Some(state) = op.multipart_download() else {
        return missing_state(op, ctx, TaskKind::DownloadPart(range));
    };
    let Some(file) = state.begin_part() else {
        debug!("Skipping part {} of {}", range.number, op.record.describe());
        return;
    };

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let (bucket, key) = op.source_object()?;
        let output = op.source_client.get_object(GetObjectRequest {
            bucket: bucket.to_string(),
            key: key.to_string(),
            range: Some(range.open_ended_header()),
        })?;
        let body = output.body.ok_or(TransferError::MissingField {
            operation: "GetObject",
            field: "Body",
        })?;
        let path = op.destination_path()?;
        local::write_stream_at(&file, path, range.start, body)
    }))
    .unwrap_or_else(|payload| Err(part_panicked(op, range, payload.as_ref())));
    drop(file);

    let finished = match result {
        Ok(written) => {
            debug!("Wrote {} bytes of part {}", written, range.number);
            let finished = state.part_succeeded();
            if !finished {
                schedule_download_parts(op, ctx, state);
            }
            finished
        }
        Err(e) => {
            warn!("Part {} of {} failed: {}", range.number, op.record.describe(), e);
            state.part_failed(e.to_string(), true)
        }
    };
    if finished {
        schedule_complete_download(op, ctx);
    }
}

fn complete_download(op: &Arc<Operation>, ctx: &WorkerContext) {
    let Some(state) = op.multipart_download() else {
        return missing_state(op, ctx, TaskKind::CompleteDownload);
    };
    let path = match op.destination_path() {
        Ok(path) => path,
        Err(e) => return op.fail(ctx, e),
    };

    match state.finish() {
        Ok(()) => {
            op.apply_mtime(path);
            op.transfer_finished(ctx);
        }
        Err(reason) => {
            local::discard_partial(path);
            op.fail(ctx, reason);
        }
    }
}
