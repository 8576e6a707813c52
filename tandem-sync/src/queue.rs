//! Bounded priority queue feeding the worker pool.
//!
//! Jobs leave the queue highest priority first and, within one priority,
//! in arrival order. Producers either fail fast when the queue is full
//! ([`JobQueue::try_enqueue`], used by the scheduler) or wait a bounded
//! time for a free slot ([`JobQueue::enqueue_timeout`], used for manual
//! requests). Closing the queue wakes every waiter.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tandem_types::{CrossServiceSyncRequest, Priority};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{Result, SyncError};

struct Entry {
    priority: Priority,
    seq: u64,
    job: CrossServiceSyncRequest,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Max-heap: higher priority first, then the lower sequence number.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct Inner {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
    closed: bool,
}

/// Bounded, priority-ordered job queue.
pub struct JobQueue {
    capacity: usize,
    inner: Mutex<Inner>,
    items: Notify,
    slots: Notify,
}

impl JobQueue {
    /// Creates a queue holding at most `capacity` jobs (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
            items: Notify::new(),
            slots: Notify::new(),
        }
    }

    /// Enqueues without waiting. Fails with `QueueFull` or `QueueClosed`.
    pub fn try_enqueue(&self, job: CrossServiceSyncRequest) -> Result<()> {
        let inner = self.lock();
        if inner.closed {
            return Err(SyncError::QueueClosed);
        }
        if inner.heap.len() >= self.capacity {
            return Err(SyncError::QueueFull);
        }
        self.push(inner, job);
        Ok(())
    }

    /// Enqueues, waiting up to `timeout` for a free slot.
    pub async fn enqueue_timeout(
        &self,
        job: CrossServiceSyncRequest,
        timeout: Duration,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.slots.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let inner = self.lock();
                if inner.closed {
                    return Err(SyncError::QueueClosed);
                }
                if inner.heap.len() < self.capacity {
                    self.push(inner, job);
                    return Ok(());
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(SyncError::QueueFull);
            }
        }
    }

    /// Waits for the next job. Returns `None` once the queue is closed.
    pub async fn dequeue(&self) -> Option<CrossServiceSyncRequest> {
        loop {
            let notified = self.items.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.lock();
                if inner.closed {
                    return None;
                }
                if let Some(entry) = inner.heap.pop() {
                    drop(inner);
                    self.slots.notify_one();
                    return Some(entry.job);
                }
            }

            notified.await;
        }
    }

    /// Stops accepting and handing out jobs. Jobs still queued are dropped.
    pub fn close(&self) {
        let mut inner = self.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;
        let dropped = inner.heap.len();
        inner.heap.clear();
        drop(inner);
        info!(dropped, "Job queue closed");
        self.items.notify_waiters();
        self.slots.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn free_slots(&self) -> usize {
        self.capacity.saturating_sub(self.len())
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn push(&self, mut inner: MutexGuard<'_, Inner>, job: CrossServiceSyncRequest) {
        let seq = inner.next_seq;
        inner.next_seq += 1;
        debug!(job_id = %job.job_id, priority = %job.priority, "Job enqueued");
        inner.heap.push(Entry {
            priority: job.priority,
            seq,
            job,
        });
        drop(inner);
        self.items.notify_one();
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
