//! Worker pool
//!
//! A fixed number of worker threads pull [`Job`]s from one shared
//! [`StablePriorityQueue`]. A separate printer thread owns all user-facing
//! output. Shutdown is cooperative: one sentinel per worker is queued at the
//! lowest priority, so every task queued before (and every follow-up queued
//! by a running task) is executed before the workers exit.

use super::queue::{AdmitAll, InsertPolicy, StablePriorityQueue};
use super::results::{ResultAggregator, RunResult};
use super::task::{Job, Task};
use crate::error::{Result, TransferError};
use crate::progress::{StatusMessage, StatusPrinter};
use crossbeam::channel::{self, Receiver, Sender};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, warn};

/// Enqueue handle given to running tasks
#[derive(Clone)]
pub struct Scheduler {
    queue: Arc<StablePriorityQueue<Job>>,
}

impl Scheduler {
    /// Admit a new task, blocking while the queue is full
    pub fn submit(&self, task: Task) -> Result<()> {
        self.queue.put(Job::Run(task))
    }

    /// Queue a task continuing an operation already in flight.
    ///
    /// Never waits for capacity, so a worker cannot deadlock on its own queue.
    /// Rejections are returned to the caller, which routes them into the
    /// operation's failure path.
    pub fn follow_up(&self, task: Task) -> Result<()> {
        self.queue.put_follow_up(Job::Run(task))
    }

    /// Queue a follow-up only if the queue has room. Returns false when it is full.
    pub fn offer(&self, task: Task) -> Result<bool> {
        self.queue.offer(Job::Run(task))
    }

    /// Number of jobs waiting in the queue
    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

/// Shared services available to every task
#[derive(Clone)]
pub struct WorkerContext {
    pub scheduler: Scheduler,
    pub results: Arc<ResultAggregator>,
    status: Sender<StatusMessage>,
}

impl WorkerContext {
    /// Send a status line to the printer thread
    pub fn report(&self, message: StatusMessage) {
        if self.status.send(message).is_err() {
            debug!("Status printer already stopped");
        }
    }
}

/// Insert policy refusing tasks of the named kinds
#[derive(Debug, Clone)]
pub struct RejectTaskKinds {
    kinds: Vec<&'static str>,
}

impl RejectTaskKinds {
    /// Reject every task whose [`TaskKind::name`](super::TaskKind::name) is listed
    pub fn new(kinds: impl IntoIterator<Item = &'static str>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
        }
    }
}

impl InsertPolicy<Job> for RejectTaskKinds {
    fn admit(&self, job: &Job) -> std::result::Result<(), String> {
        match job {
            Job::Run(task) if self.kinds.contains(&task.kind.name()) => {
                Err(format!("{} tasks are not allowed", task.kind.name()))
            }
            _ => Ok(()),
        }
    }
}

/// Fixed-size worker pool with a dedicated status printer
pub struct Executor {
    queue: Arc<StablePriorityQueue<Job>>,
    num_threads: usize,
    results: Arc<ResultAggregator>,
    status: Sender<StatusMessage>,
    status_receiver: Option<Receiver<StatusMessage>>,
    printer: Option<StatusPrinter>,
    stop_printer: Sender<()>,
    stop_receiver: Option<Receiver<()>>,
    workers: Vec<JoinHandle<()>>,
    printer_handle: Option<JoinHandle<()>>,
}

impl Executor {
    /// Create a pool of `num_threads` workers over a queue of `max_queue_size`
    pub fn new(num_threads: usize, max_queue_size: usize, printer: StatusPrinter) -> Self {
        Self::with_policy(num_threads, max_queue_size, printer, Box::new(AdmitAll))
    }

    /// Create a pool whose queue admits tasks through `policy`
    pub fn with_policy(
        num_threads: usize,
        max_queue_size: usize,
        printer: StatusPrinter,
        policy: Box<dyn InsertPolicy<Job>>,
    ) -> Self {
        let (status, status_receiver) = channel::unbounded();
        let (stop_printer, stop_receiver) = channel::bounded(1);
        Self {
            queue: Arc::new(StablePriorityQueue::with_policy(max_queue_size, policy)),
            num_threads: num_threads.max(1),
            results: Arc::new(ResultAggregator::new()),
            status,
            status_receiver: Some(status_receiver),
            printer: Some(printer),
            stop_printer,
            stop_receiver: Some(stop_receiver),
            workers: Vec::new(),
            printer_handle: None,
        }
    }

    /// Number of worker threads
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Task queue capacity
    pub fn queue_capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Spawn the printer and the workers. Calling it twice has no effect.
    pub fn start(&mut self) -> Result<()> {
        if let (Some(printer), Some(receiver), Some(stop)) = (
            self.printer.take(),
            self.status_receiver.take(),
            self.stop_receiver.take(),
        ) {
            let handle = printer
                .spawn(receiver, stop)
                .map_err(|source| TransferError::Spawn {
                    name: "status-printer".to_string(),
                    source,
                })?;
            self.printer_handle = Some(handle);
        }

        while self.workers.len() < self.num_threads {
            let id = self.workers.len();
            let queue = Arc::clone(&self.queue);
            let ctx = self.context();
            let name = format!("transfer-worker-{}", id);
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(id, queue, ctx))
                .map_err(|source| TransferError::Spawn { name, source })?;
            self.workers.push(handle);
        }

        debug!("Started {} workers", self.workers.len());
        Ok(())
    }

    /// Context for code outside the pool that reports outcomes or schedules tasks
    pub fn context(&self) -> WorkerContext {
        WorkerContext {
            scheduler: self.scheduler(),
            results: Arc::clone(&self.results),
            status: self.status.clone(),
        }
    }

    /// Enqueue handle
    pub fn scheduler(&self) -> Scheduler {
        Scheduler {
            queue: Arc::clone(&self.queue),
        }
    }

    /// Admit a task, blocking while the queue is full
    pub fn submit(&self, task: Task) -> Result<()> {
        self.scheduler().submit(task)
    }

    /// Drain the queue, stop every thread and return the run outcome
    pub fn shutdown(mut self) -> RunResult {
        for _ in 0..self.workers.len() {
            if let Err(e) = self.queue.put(Job::Shutdown) {
                warn!("Could not queue shutdown sentinel: {}", e);
                break;
            }
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("Worker thread exited with a panic");
            }
        }
        self.queue.close();

        if self.stop_printer.send(()).is_err() {
            debug!("Status printer already stopped");
        }
        if let Some(handle) = self.printer_handle.take() {
            if handle.join().is_err() {
                error!("Status printer exited with a panic");
            }
        }

        let result = self.results.snapshot();
        debug!(?result, "Executor shut down");
        result
    }
}

fn worker_loop(id: usize, queue: Arc<StablePriorityQueue<Job>>, ctx: WorkerContext) {
    while let Some(job) = queue.get() {
        let task = match job {
            Job::Run(task) => task,
            Job::Shutdown => break,
        };

        let op = Arc::clone(&task.op);
        let name = task.kind.name();
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| task.execute(&ctx))) {
            let message = panic_message(payload.as_ref());
            error!("Worker {} panicked running {}: {}", id, name, message);
            op.fail(&ctx, TransferError::WorkerPanic(message));
        }
    }
    debug!("Worker {} exiting", id);
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
