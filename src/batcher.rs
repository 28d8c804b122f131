//! Assembles bounded batches from the ring buffer.
//!
//! The [`Batcher`] runs on the sender thread. It pulls records from the
//! [`RingBuffer`], measures each one with the bulk formatter, and seals a
//! [`Batch`] when the record bound or byte bound is reached, or when the
//! linger window, which opens with the first collected record, closes.
//! Records that do not fit are carried, in order, into the next batch.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::deadline;
use crate::diagnostics::Diagnostics;
use crate::formatter::BulkFormatter;
use crate::log_record::LogRecord;
use crate::ring_buffer::RingBuffer;
use crate::state::DropReason;

pub const DEFAULT_MAX_RECORDS: usize = 500;
pub const DEFAULT_MAX_BYTES: usize = 5 * 1024 * 1024;
pub const DEFAULT_LINGER: Duration = Duration::from_millis(200);
/// Longest wait for a first record before [`Batcher::next_batch`] gives up.
pub const IDLE_WAIT: Duration = Duration::from_millis(100);

/// Bounds applied to every batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_records: usize,
    /// Upper bound on the encoded size of a batch, in bytes.
    pub max_bytes: usize,
    /// How long a batch stays open after its first record. A duration too
    /// large for a deadline (e.g. `Duration::MAX`) means batches only seal
    /// on a size bound, a flush, or shutdown.
    pub linger: Duration,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_records: DEFAULT_MAX_RECORDS,
            max_bytes: DEFAULT_MAX_BYTES,
            linger: DEFAULT_LINGER,
        }
    }
}

/// Ordered group of records sent in one request.
#[derive(Clone, Debug, PartialEq)]
pub struct Batch {
    sequence: u64,
    records: Vec<LogRecord>,
    encoded_bytes: usize,
}

impl Batch {
    pub fn new(sequence: u64, records: Vec<LogRecord>, encoded_bytes: usize) -> Self {
        Self {
            sequence,
            records,
            encoded_bytes,
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn encoded_bytes(&self) -> usize {
        self.encoded_bytes
    }

    pub fn into_records(self) -> Vec<LogRecord> {
        self.records
    }

    /// Batch holding only the records at `indices`, keeping this batch's
    /// sequence number. Out-of-range indices are ignored.
    pub fn retain_indices(&self, indices: &[usize], formatter: &BulkFormatter) -> Self {
        let records: Vec<LogRecord> = self
            .records
            .iter()
            .enumerate()
            .filter(|(i, _)| indices.contains(i))
            .map(|(_, r)| r.clone())
            .collect();
        let encoded_bytes = records.iter().map(|r| formatter.encoded_len(r)).sum();
        Self::new(self.sequence, records, encoded_bytes)
    }
}

pub struct Batcher {
    limits: BatchLimits,
    formatter: BulkFormatter,
    buffer: Arc<RingBuffer>,
    diagnostics: Diagnostics,
    carry: VecDeque<(LogRecord, usize)>,
    next_sequence: u64,
}

impl Batcher {
    pub fn new(
        limits: BatchLimits,
        formatter: BulkFormatter,
        buffer: Arc<RingBuffer>,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            limits: BatchLimits {
                max_records: limits.max_records.max(1),
                ..limits
            },
            formatter,
            buffer,
            diagnostics,
            carry: VecDeque::new(),
            next_sequence: 0,
        }
    }

    pub fn limits(&self) -> BatchLimits {
        self.limits
    }

    /// Records dequeued but not yet placed in a batch.
    pub fn pending(&self) -> usize {
        self.carry.len()
    }

    /// Hand back carried records, e.g. to count them as discarded.
    pub fn take_pending(&mut self) -> Vec<LogRecord> {
        self.carry.drain(..).map(|(r, _)| r).collect()
    }

    /// Collect the next batch.
    ///
    /// Waits up to [`IDLE_WAIT`] for a first record, then at most the linger
    /// time for more. Both waits are skipped while a flush is pending or the
    /// buffer is closed. Returns `None` when nothing was collected.
    pub fn next_batch(&mut self) -> Option<Batch> {
        let mut until = deadline::after(Instant::now(), IDLE_WAIT);
        let mut lingering = false;
        let mut sealing = false;
        let mut records = Vec::new();
        let mut bytes = 0usize;

        loop {
            while let Some((record, size)) = self.carry.pop_front() {
                if !self.fits(&records, bytes, size) {
                    self.carry.push_front((record, size));
                    return self.seal(records, bytes);
                }
                records.push(record);
                bytes += size;
            }
            if sealing || records.len() >= self.limits.max_records {
                return self.seal(records, bytes);
            }

            let now = Instant::now();
            if !records.is_empty() && !lingering {
                lingering = true;
                until = deadline::after(now, self.limits.linger);
            }
            let hurry = self.diagnostics.state().flush_pending() || self.buffer.is_closed();
            // Past the deadline, take only what is already queued.
            sealing = hurry || deadline::passed(until, now);
            let wait = if sealing {
                Duration::ZERO
            } else {
                deadline::remaining(until, now)
            };
            let want = if records.is_empty() && !sealing {
                1
            } else {
                self.limits.max_records - records.len()
            };

            for record in self.buffer.dequeue_batch(want, wait) {
                let size = self.formatter.encoded_len(&record);
                if size > self.limits.max_bytes {
                    self.diagnostics.dropped(DropReason::Oversize, 1);
                    continue;
                }
                self.carry.push_back((record, size));
            }
        }
    }

    fn fits(&self, records: &[LogRecord], bytes: usize, size: usize) -> bool {
        if records.len() >= self.limits.max_records {
            return false;
        }
        records.is_empty() || bytes + size <= self.limits.max_bytes
    }

    fn seal(&mut self, records: Vec<LogRecord>, bytes: usize) -> Option<Batch> {
        if records.is_empty() {
            return None;
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        Some(Batch::new(sequence, records, bytes))
    }
}
