//! Bounded FIFO between producers and the sender thread.
//!
//! All state lives behind one `parking_lot::Mutex`. Producers wait on
//! `not_full` under the `Block` policy; the single consumer waits on
//! `not_empty` for either a full batch, its deadline, closure, or an explicit
//! wake from [`RingBuffer::wake`].

mod policy;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::deadline;
use crate::log_record::LogRecord;
use crate::state::{DropReason, PipelineState};

pub use policy::{DEFAULT_BLOCK_TIMEOUT, OverflowPolicy, ParsePolicyError};

/// How an accepted record entered the buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    /// Accepted after a `Block` wait for space.
    AcceptedAfterWait,
    /// Accepted; the oldest queued record was evicted to make room.
    AcceptedEvictingOldest,
}

/// Producer-facing enqueue failure.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("buffer full; record dropped")]
    Overflow,
    #[error("timed out waiting for buffer space")]
    Timeout,
    #[error("pipeline is shut down")]
    Closed,
}

impl EnqueueError {
    pub fn drop_reason(self) -> DropReason {
        match self {
            Self::Overflow => DropReason::Overflow,
            Self::Timeout => DropReason::Timeout,
            Self::Closed => DropReason::Closed,
        }
    }
}

struct Inner {
    queue: VecDeque<LogRecord>,
    closed: bool,
    /// Records the consumer is waiting for; zero when it is not waiting.
    wanted: usize,
    /// Set by `wake`, consumed by the next `dequeue_batch`.
    woken: bool,
}

pub struct RingBuffer {
    inner: Mutex<Inner>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    policy: OverflowPolicy,
    state: Arc<PipelineState>,
}

impl RingBuffer {
    /// `capacity` is clamped to at least one slot.
    pub fn new(capacity: usize, policy: OverflowPolicy, state: Arc<PipelineState>) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::with_capacity(capacity),
                closed: false,
                wanted: 0,
                woken: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            policy,
            state,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Admit `record` according to the overflow policy.
    ///
    /// Evictions are counted in [`PipelineState`] by the caller, which also
    /// owns the diagnostics sinks.
    pub fn enqueue(&self, record: LogRecord) -> Result<Admission, EnqueueError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(EnqueueError::Closed);
        }

        let admission = if inner.queue.len() < self.capacity {
            Admission::Accepted
        } else {
            match self.policy {
                OverflowPolicy::DropNewest => return Err(EnqueueError::Overflow),
                OverflowPolicy::DropOldest => {
                    inner.queue.pop_front();
                    Admission::AcceptedEvictingOldest
                }
                OverflowPolicy::Block(timeout) => {
                    if timeout.is_zero() {
                        return Err(EnqueueError::Timeout);
                    }
                    let deadline = deadline::after(Instant::now(), timeout);
                    while inner.queue.len() >= self.capacity && !inner.closed {
                        if deadline::wait(&self.not_full, &mut inner, deadline) {
                            break;
                        }
                    }
                    if inner.closed {
                        return Err(EnqueueError::Closed);
                    }
                    if inner.queue.len() >= self.capacity {
                        return Err(EnqueueError::Timeout);
                    }
                    Admission::AcceptedAfterWait
                }
            }
        };

        inner.queue.push_back(record);
        self.state.record_accepted();
        self.state.set_queue_depth(inner.queue.len());
        if inner.wanted > 0 && inner.queue.len() >= inner.wanted {
            self.not_empty.notify_one();
        }
        Ok(admission)
    }

    /// Remove up to `max_n` records in FIFO order.
    ///
    /// Returns once `max_n` records are queued, `max_wait` elapses, the buffer
    /// is closed, or [`wake`](Self::wake) is called. A wake that arrives
    /// while no dequeue is waiting ends the next one. May return an empty
    /// vector.
    pub fn dequeue_batch(&self, max_n: usize, max_wait: Duration) -> Vec<LogRecord> {
        if max_n == 0 {
            return Vec::new();
        }
        let deadline = deadline::after(Instant::now(), max_wait);
        let mut inner = self.inner.lock();
        while inner.queue.len() < max_n && !inner.closed && !inner.woken {
            inner.wanted = max_n;
            if deadline::wait(&self.not_empty, &mut inner, deadline) {
                break;
            }
        }
        inner.wanted = 0;
        inner.woken = false;
        let take = max_n.min(inner.queue.len());
        let batch: Vec<LogRecord> = inner.queue.drain(..take).collect();
        self.state.set_queue_depth(inner.queue.len());
        drop(inner);
        if !batch.is_empty() {
            self.not_full.notify_all();
        }
        batch
    }

    /// Interrupt a pending [`dequeue_batch`](Self::dequeue_batch) so it
    /// returns whatever is queued.
    pub fn wake(&self) {
        let mut inner = self.inner.lock();
        inner.woken = true;
        self.not_empty.notify_all();
    }

    /// Refuse further records and release every waiter.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Take every queued record.
    pub fn drain(&self) -> Vec<LogRecord> {
        let mut inner = self.inner.lock();
        let all: Vec<LogRecord> = inner.queue.drain(..).collect();
        self.state.set_queue_depth(0);
        drop(inner);
        self.not_full.notify_all();
        all
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .field("len", &self.len())
            .finish()
    }
}
