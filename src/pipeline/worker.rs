//! Sender thread: batches, encodes, sends, retries.
//!
//! The worker owns every consumer-side component. It only drains the ring
//! buffer when it has no batch in hand, so an open breaker, which holds the
//! current batch, stops consumption and lets the overflow policy push back on
//! producers.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use log::debug;

use crate::batcher::{Batch, Batcher};
use crate::deadline;
use crate::diagnostics::Diagnostics;
use crate::formatter::BulkFormatter;
use crate::ring_buffer::RingBuffer;
use crate::state::{BreakerStatus, DropReason};
use crate::transport::{Backoff, CircuitBreaker, DeliveryResult, Permit, Transport};

pub(super) struct Worker {
    pub(super) batcher: Batcher,
    pub(super) formatter: BulkFormatter,
    pub(super) transport: Box<dyn Transport>,
    pub(super) breaker: CircuitBreaker,
    pub(super) backoff: Backoff,
    pub(super) diagnostics: Diagnostics,
    pub(super) buffer: Arc<RingBuffer>,
    pub(super) shutdown_rx: Receiver<()>,
    pub(super) grace: Duration,
    pub(super) draining: bool,
    /// Set when draining starts. `None` while draining means no limit.
    pub(super) grace_deadline: Option<Instant>,
}

impl Worker {
    pub(super) fn run(mut self) {
        while !self.shutdown_requested() {
            if let Some(batch) = self.batcher.next_batch() {
                self.deliver(batch);
            }
        }

        debug!("logship sender draining for up to {:?}", self.grace);
        while !self.past_grace() {
            match self.batcher.next_batch() {
                Some(batch) => self.deliver(batch),
                None => break,
            }
        }

        let leftover = self.batcher.take_pending().len() + self.buffer.drain().len();
        self.diagnostics
            .dropped(DropReason::Shutdown, leftover as u64);
    }

    fn shutdown_requested(&mut self) -> bool {
        if self.draining {
            return true;
        }
        let signalled = !matches!(self.shutdown_rx.try_recv(), Err(TryRecvError::Empty));
        if signalled || self.buffer.is_closed() {
            self.begin_shutdown();
            return true;
        }
        false
    }

    fn begin_shutdown(&mut self) {
        if !self.draining {
            self.draining = true;
            self.grace_deadline = deadline::after(Instant::now(), self.grace);
        }
    }

    fn past_grace(&self) -> bool {
        self.draining && deadline::passed(self.grace_deadline, Instant::now())
    }

    /// Sleep for `delay`, waking early on shutdown. Returns `false` once the
    /// shutdown grace period is over.
    fn pause(&mut self, delay: Duration) -> bool {
        if !self.draining {
            return match self.shutdown_rx.recv_timeout(delay) {
                Err(RecvTimeoutError::Timeout) => true,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    self.begin_shutdown();
                    !self.past_grace()
                }
            };
        }
        if self.past_grace() {
            return false;
        }
        thread::sleep(delay.min(deadline::remaining(self.grace_deadline, Instant::now())));
        !self.past_grace()
    }

    /// Run `f` against the breaker and publish any state change.
    fn observe<R>(&mut self, f: impl FnOnce(&mut CircuitBreaker) -> R) -> R {
        let before = self.breaker.status();
        let out = f(&mut self.breaker);
        let after = self.breaker.status();
        self.diagnostics
            .state()
            .set_breaker(after, self.breaker.consecutive_failures());
        if before != after {
            self.diagnostics.breaker_transition(before, after);
        }
        out
    }

    fn abandon(&self, batch: &Batch) {
        self.diagnostics
            .dropped(DropReason::Shutdown, batch.len() as u64);
    }

    fn settle(&self, delivered: usize, rejected: usize) {
        if delivered > 0 {
            self.diagnostics.state().record_delivered(delivered as u64);
        }
        self.diagnostics
            .dropped(DropReason::Rejected, rejected as u64);
    }

    fn deliver(&mut self, mut batch: Batch) {
        self.backoff.reset();
        loop {
            loop {
                match self.observe(|b| b.permit(Instant::now())) {
                    Permit::Send | Permit::Probe => break,
                    Permit::Wait(delay) => {
                        if !self.pause(delay) {
                            return self.abandon(&batch);
                        }
                    }
                }
            }
            if self.past_grace() {
                return self.abandon(&batch);
            }

            let payload = self.formatter.serialize(&batch, &self.diagnostics);
            match self.transport.send(&payload) {
                DeliveryResult::Delivered { rejected } => {
                    self.observe(CircuitBreaker::on_success);
                    let rejected = rejected.min(batch.len());
                    self.settle(batch.len() - rejected, rejected);
                    return;
                }
                DeliveryResult::PermanentFailure { status, reason } => {
                    self.observe(CircuitBreaker::on_success);
                    self.diagnostics.permanent_failure(status, reason);
                    self.diagnostics
                        .dropped(DropReason::Permanent, batch.len() as u64);
                    return;
                }
                DeliveryResult::RetryableFailure {
                    reason,
                    retry_items,
                } => {
                    self.observe(|b| b.on_failure(Instant::now()));
                    if let Some(items) = retry_items {
                        let retry: Vec<usize> = items
                            .retry
                            .into_iter()
                            .filter(|i| *i < batch.len())
                            .collect();
                        let rejected = items.rejected.min(batch.len() - retry.len());
                        self.settle(batch.len() - retry.len() - rejected, rejected);
                        batch = batch.retain_indices(&retry, &self.formatter);
                        if batch.is_empty() {
                            return;
                        }
                    }
                    let Some(delay) = self.backoff.next_delay() else {
                        self.diagnostics
                            .dropped(DropReason::RetriesExhausted, batch.len() as u64);
                        return;
                    };
                    self.diagnostics
                        .retry_scheduled(self.backoff.attempts(), delay, reason);
                    if self.breaker.status() == BreakerStatus::Open {
                        continue;
                    }
                    if !self.pause(delay) {
                        return self.abandon(&batch);
                    }
                }
            }
        }
    }
}
