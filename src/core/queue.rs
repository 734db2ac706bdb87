//! Stable priority task queue
//!
//! A bounded, blocking queue with one FIFO lane per priority level. `get`
//! always serves the highest non-empty lane and preserves insertion order
//! inside a lane, so equal-priority items never overtake each other.
//!
//! Admission goes through an [`InsertPolicy`], which lets callers refuse
//! specific items without touching the queue itself.

use crate::error::{Result, TransferError};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Scheduling priority, highest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Work that finishes an operation already in flight
    Immediate = 0,
    /// Newly admitted work
    Normal = 1,
    /// Worker shutdown sentinels, served only once all other work is gone
    Shutdown = 2,
}

const LANES: usize = 3;

impl Priority {
    fn lane(self) -> usize {
        self as usize
    }
}

/// Items that can be placed on a [`StablePriorityQueue`]
pub trait Prioritized {
    /// Priority lane for this item
    fn priority(&self) -> Priority;

    /// Short name used in admission errors
    fn describe(&self) -> String;
}

/// Admission check run before an item is inserted
pub trait InsertPolicy<T>: Send + Sync {
    /// Return an error to refuse the item
    fn admit(&self, item: &T) -> std::result::Result<(), String>;
}

/// Policy that admits everything
#[derive(Debug, Default, Clone, Copy)]
pub struct AdmitAll;

impl<T> InsertPolicy<T> for AdmitAll {
    fn admit(&self, _item: &T) -> std::result::Result<(), String> {
        Ok(())
    }
}

struct Lanes<T> {
    lanes: [VecDeque<T>; LANES],
    len: usize,
    closed: bool,
}

impl<T> Lanes<T> {
    fn push(&mut self, priority: Priority, item: T) {
        self.lanes[priority.lane()].push_back(item);
        self.len += 1;
    }

    fn pop(&mut self) -> Option<T> {
        let item = self.lanes.iter_mut().find_map(VecDeque::pop_front)?;
        self.len -= 1;
        Some(item)
    }
}

/// Bounded multi-lane FIFO queue
pub struct StablePriorityQueue<T> {
    inner: Mutex<Lanes<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    policy: Box<dyn InsertPolicy<T>>,
}

impl<T: Prioritized> StablePriorityQueue<T> {
    /// Create a queue that blocks producers once `capacity` items are queued
    pub fn new(capacity: usize) -> Self {
        Self::with_policy(capacity, Box::new(AdmitAll))
    }

    /// Create a queue with a custom admission policy
    pub fn with_policy(capacity: usize, policy: Box<dyn InsertPolicy<T>>) -> Self {
        Self {
            inner: Mutex::new(Lanes {
                lanes: std::array::from_fn(|_| VecDeque::new()),
                len: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: capacity.max(1),
            policy,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Lanes<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self, item: &T) -> Result<()> {
        self.policy
            .admit(item)
            .map_err(|reason| TransferError::QueueRejected {
                task: item.describe(),
                reason,
            })
    }

    /// Insert an item, blocking while the queue is at capacity
    pub fn put(&self, item: T) -> Result<()> {
        self.check(&item)?;

        let mut inner = self.lock();
        while inner.len >= self.capacity && !inner.closed {
            inner = self
                .not_full
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if inner.closed {
            return Err(TransferError::QueueClosed);
        }

        inner.push(item.priority(), item);
        drop(inner);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Insert an item without waiting for capacity.
    ///
    /// Used by workers for follow-up work of operations already in flight;
    /// a worker blocking on its own queue could otherwise starve the pool.
    pub fn put_follow_up(&self, item: T) -> Result<()> {
        self.check(&item)?;

        let mut inner = self.lock();
        if inner.closed {
            return Err(TransferError::QueueClosed);
        }
        inner.push(item.priority(), item);
        drop(inner);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Insert an item only while the queue is below capacity.
    ///
    /// Returns `Ok(false)` and drops the item when the queue is full.
    pub fn offer(&self, item: T) -> Result<bool> {
        self.check(&item)?;

        let mut inner = self.lock();
        if inner.closed {
            return Err(TransferError::QueueClosed);
        }
        if inner.len >= self.capacity {
            return Ok(false);
        }
        inner.push(item.priority(), item);
        drop(inner);
        self.not_empty.notify_one();
        Ok(true)
    }

    /// Remove the highest-priority item, blocking until one is available.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub fn get(&self) -> Option<T> {
        let mut inner = self.lock();
        loop {
            if let Some(item) = inner.pop() {
                drop(inner);
                self.not_full.notify_one();
                return Some(item);
            }
            if inner.closed {
                return None;
            }
            inner = self
                .not_empty
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Close the queue, waking every blocked producer and consumer
    pub fn close(&self) {
        self.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.lock().len
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of items `put` admits before blocking
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
