//! Transfer handler
//!
//! Turns [`TransferRecord`]s into the first task of each logical operation,
//! runs them on an [`Executor`] and returns the aggregated [`RunResult`].

use super::record::{Action, TransferRecord};
use crate::config::{RuntimeConfig, TransferParams};
use crate::core::{
    AdmitAll, Executor, InsertPolicy, Job, MultipartDownload, MultipartUpload, Operation, RunResult,
    Task, TaskKind, TransferLimits, WorkerContext,
};
use crate::error::{Result, TransferError};
use crate::progress::StatusPrinter;
use crate::storage::ObjectStore;
use std::sync::Arc;
use tracing::{debug, error};

/// Runs batches of transfer records on a worker pool
pub struct TransferHandler {
    client: Arc<dyn ObjectStore>,
    source_client: Option<Arc<dyn ObjectStore>>,
    config: RuntimeConfig,
    params: Arc<TransferParams>,
    limits: TransferLimits,
    policy: Box<dyn InsertPolicy<Job>>,
    printer: Option<StatusPrinter>,
}

impl TransferHandler {
    /// Create a handler using `client` for every remote call
    pub fn new(client: Arc<dyn ObjectStore>, config: RuntimeConfig, params: TransferParams) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            client,
            source_client: None,
            config,
            params: Arc::new(params),
            limits: TransferLimits::default(),
            policy: Box::new(AdmitAll),
            printer: None,
        })
    }

    /// Use a different client for source-side calls
    pub fn with_source_client(mut self, client: Arc<dyn ObjectStore>) -> Self {
        self.source_client = Some(client);
        self
    }

    /// Override the provider limits
    pub fn with_limits(mut self, limits: TransferLimits) -> Result<Self> {
        limits.validate()?;
        self.limits = limits;
        Ok(self)
    }

    /// Admit tasks through `policy`
    pub fn with_insert_policy(mut self, policy: Box<dyn InsertPolicy<Job>>) -> Self {
        self.policy = policy;
        self
    }

    /// Print status lines with `printer` instead of stdout/stderr
    pub fn with_printer(mut self, printer: StatusPrinter) -> Self {
        self.printer = Some(printer);
        self
    }

    pub fn num_threads(&self) -> usize {
        self.config.max_concurrent_requests
    }

    pub fn max_queue_size(&self) -> usize {
        self.config.max_queue_size
    }

    pub fn chunksize(&self) -> u64 {
        self.config.multipart_chunksize
    }

    pub fn multipart_threshold(&self) -> u64 {
        self.config.multipart_threshold
    }

    /// Run every record to completion
    pub fn call(self, records: impl IntoIterator<Item = TransferRecord>) -> RunResult {
        let printer = self
            .printer
            .unwrap_or_else(|| StatusPrinter::new(self.params.quiet, self.params.only_show_errors));
        let mut executor = Executor::with_policy(
            self.config.max_concurrent_requests,
            self.config.max_queue_size,
            printer,
            self.policy,
        );

        if let Err(e) = executor.start() {
            error!("Could not start workers: {}", e);
            let mut result = executor.shutdown();
            result.tasks_failed += 1;
            return result;
        }

        let planner = Planner {
            client: self.client,
            source_client: self.source_client,
            config: self.config,
            params: self.params,
            limits: self.limits,
        };
        let ctx = executor.context();
        let mut planned = 0usize;
        for record in records {
            planner.plan(&executor, &ctx, record);
            planned += 1;
        }
        debug!("Planned {} operations", planned);
        drop(ctx);

        executor.shutdown()
    }
}

struct Planner {
    client: Arc<dyn ObjectStore>,
    source_client: Option<Arc<dyn ObjectStore>>,
    config: RuntimeConfig,
    params: Arc<TransferParams>,
    limits: TransferLimits,
}

impl Planner {
    fn operation(&self, record: TransferRecord) -> Operation {
        Operation::new(
            record,
            Arc::clone(&self.client),
            self.source_client.clone(),
            Arc::clone(&self.params),
        )
    }

    fn plan(&self, executor: &Executor, ctx: &WorkerContext, record: TransferRecord) {
        let action = record.action();
        let size = record.size;
        let op = self.operation(record);

        let action = match action {
            Ok(action) => action,
            Err(e) => return op.reject(ctx, e),
        };

        if matches!(action, Action::Upload | Action::Copy) && size > self.limits.max_object_size {
            let error = TransferError::FileTooLarge {
                name: op.record().source.to_string(),
                size,
                limit: self.limits.max_object_size,
            };
            return op.reject(ctx, error);
        }

        let multipart = matches!(action, Action::Upload | Action::Copy | Action::Download)
            && size > 0
            && size >= self.config.multipart_threshold;
        let split = if multipart { self.split(size) } else { Ok((0, 0)) };
        let (parts, chunksize) = match split {
            Ok(split) => split,
            Err(e) => return op.reject(ctx, e),
        };
        let (op, kind) = match action {
            Action::Upload | Action::Copy if multipart => (
                op.with_multipart_upload(MultipartUpload::new(parts, chunksize)),
                TaskKind::CreateMultipartUpload,
            ),
            Action::Download if multipart => (
                op.with_multipart_download(MultipartDownload::new(parts, chunksize)),
                TaskKind::CreateLocalFile,
            ),
            Action::Upload => (op, TaskKind::SingleUpload),
            Action::Copy => (op, TaskKind::Copy),
            Action::Download => (op, TaskKind::Download),
            Action::Delete => (op, TaskKind::Delete),
            Action::RemoveBucket => (op, TaskKind::RemoveBucket),
        };

        let op = Arc::new(op);
        if let Err(e) = executor.submit(Task::new(Arc::clone(&op), kind)) {
            op.reject(ctx, e);
        }
    }

    fn split(&self, size: u64) -> Result<(u32, u64)> {
        self.limits.split(self.config.multipart_chunksize, size)
    }
}
