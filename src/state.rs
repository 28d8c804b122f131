//! Shared counters describing the health of one pipeline instance.
//!
//! [`PipelineState`] is created with the pipeline and dropped with it. Every
//! enqueue, dequeue, and transport outcome updates it with atomic operations,
//! so producers and the sender thread never contend on a lock to report
//! progress. Flush waiters block on a condition variable that is signalled
//! whenever accepted records settle (are delivered or dropped).

use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::deadline;

/// Circuit-breaker status as published to observers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BreakerStatus {
    #[default]
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl BreakerStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Open,
            2 => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for BreakerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        })
    }
}

/// Why a record left the pipeline without being delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// Rejected at enqueue: buffer full under `DropNewest`.
    Overflow,
    /// Rejected at enqueue: `Block` wait timed out.
    Timeout,
    /// Rejected at enqueue: pipeline already closed.
    Closed,
    /// Queued record evicted by `DropOldest`.
    Evicted,
    /// Encoded record larger than the batch byte limit.
    Oversize,
    /// Retry budget spent on retryable failures.
    RetriesExhausted,
    /// Backend refused the batch in a way retrying cannot fix.
    Permanent,
    /// Backend accepted the request but rejected the document.
    Rejected,
    /// Still queued when the shutdown grace period ended.
    Shutdown,
}

impl DropReason {
    pub const ALL: [DropReason; 9] = [
        DropReason::Overflow,
        DropReason::Timeout,
        DropReason::Closed,
        DropReason::Evicted,
        DropReason::Oversize,
        DropReason::RetriesExhausted,
        DropReason::Permanent,
        DropReason::Rejected,
        DropReason::Shutdown,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Whether the dropped record had previously been admitted to the buffer.
    pub fn after_admission(self) -> bool {
        !matches!(self, Self::Overflow | Self::Timeout | Self::Closed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Overflow => "overflow",
            Self::Timeout => "timeout",
            Self::Closed => "closed",
            Self::Evicted => "evicted",
            Self::Oversize => "oversize",
            Self::RetriesExhausted => "retries_exhausted",
            Self::Permanent => "permanent_failure",
            Self::Rejected => "rejected",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time copy of [`PipelineState`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub queue_depth: usize,
    pub breaker: BreakerStatus,
    pub consecutive_failures: u32,
    pub accepted: u64,
    pub filtered: u64,
    pub delivered: u64,
    pub retries: u64,
    /// Requests in which the backend accepted at least one record.
    pub batches_sent: u64,
    pub processor_faults: u64,
    pub serialization_fallbacks: u64,
    pub dropped: Vec<(DropReason, u64)>,
}

impl PipelineStats {
    pub fn dropped(&self, reason: DropReason) -> u64 {
        self.dropped
            .iter()
            .find(|(r, _)| *r == reason)
            .map_or(0, |(_, n)| *n)
    }

    pub fn total_dropped(&self) -> u64 {
        self.dropped.iter().map(|(_, n)| n).sum()
    }
}

#[derive(Default)]
pub struct PipelineState {
    queue_depth: AtomicUsize,
    breaker: AtomicU8,
    consecutive_failures: AtomicU32,
    accepted: AtomicU64,
    filtered: AtomicU64,
    delivered: AtomicU64,
    retries: AtomicU64,
    batches_sent: AtomicU64,
    processor_faults: AtomicU64,
    serialization_fallbacks: AtomicU64,
    dropped: [AtomicU64; DropReason::ALL.len()],
    settled: AtomicU64,
    flush_target: AtomicU64,
    progress_lock: Mutex<()>,
    progress: Condvar,
}

impl PipelineState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::Acquire)
    }

    pub(crate) fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.store(depth, Ordering::Release);
    }

    pub fn breaker(&self) -> BreakerStatus {
        BreakerStatus::from_u8(self.breaker.load(Ordering::Acquire))
    }

    pub(crate) fn set_breaker(&self, status: BreakerStatus, consecutive_failures: u32) {
        self.breaker.store(status as u8, Ordering::Release);
        self.consecutive_failures
            .store(consecutive_failures, Ordering::Release);
    }

    pub(crate) fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn record_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_processor_fault(&self) {
        self.processor_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_serialization_fallback(&self) {
        self.serialization_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self, count: u64) {
        self.delivered.fetch_add(count, Ordering::Relaxed);
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
        self.settle(count);
    }

    pub(crate) fn record_dropped(&self, reason: DropReason, count: u64) {
        if count == 0 {
            return;
        }
        self.dropped[reason.index()].fetch_add(count, Ordering::Relaxed);
        if reason.after_admission() {
            self.settle(count);
        }
    }

    fn settle(&self, count: u64) {
        self.settled.fetch_add(count, Ordering::AcqRel);
        let _guard = self.progress_lock.lock();
        self.progress.notify_all();
    }

    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Acquire)
    }

    /// Accepted records that have since been delivered or dropped.
    pub fn settled(&self) -> u64 {
        self.settled.load(Ordering::Acquire)
    }

    /// Register a flush covering everything accepted so far and return the
    /// settle count that satisfies it.
    pub(crate) fn request_flush(&self) -> u64 {
        let target = self.accepted();
        self.flush_target.fetch_max(target, Ordering::AcqRel);
        target
    }

    /// True while a requested flush has not yet been satisfied.
    pub(crate) fn flush_pending(&self) -> bool {
        self.flush_target.load(Ordering::Acquire) > self.settled()
    }

    /// Wait until at least `target` accepted records have settled.
    pub(crate) fn wait_settled(&self, target: u64, deadline: Option<Instant>) -> bool {
        let mut guard = self.progress_lock.lock();
        while self.settled() < target {
            if deadline::wait(&self.progress, &mut guard, deadline) {
                return self.settled() >= target;
            }
        }
        true
    }

    pub fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            queue_depth: self.queue_depth(),
            breaker: self.breaker(),
            consecutive_failures: self.consecutive_failures.load(Ordering::Acquire),
            accepted: self.accepted(),
            filtered: self.filtered.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            processor_faults: self.processor_faults.load(Ordering::Relaxed),
            serialization_fallbacks: self.serialization_fallbacks.load(Ordering::Relaxed),
            dropped: DropReason::ALL
                .iter()
                .map(|r| (*r, self.dropped[r.index()].load(Ordering::Relaxed)))
                .filter(|(_, n)| *n > 0)
                .collect(),
        }
    }
}

impl fmt::Debug for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineState")
            .field("queue_depth", &self.queue_depth())
            .field("breaker", &self.breaker())
            .field("accepted", &self.accepted())
            .field("settled", &self.settled())
            .finish()
    }
}
