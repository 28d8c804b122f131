//! In-memory transport replaying a script of delivery results.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::deadline;
use crate::formatter::{Payload, parse};
use crate::log_record::LogRecord;
use crate::transport::{DeliveryResult, Transport};

/// One recorded send attempt.
#[derive(Clone, Debug)]
pub struct SentPayload {
    pub at: Instant,
    pub sequence: u64,
    pub body: Vec<u8>,
    pub result: DeliveryResult,
}

impl SentPayload {
    /// Decode the bulk body back into records.
    pub fn records(&self) -> Vec<LogRecord> {
        parse(&self.body).unwrap_or_default()
    }
}

#[derive(Default)]
struct Script {
    steps: VecDeque<DeliveryResult>,
    otherwise: Option<DeliveryResult>,
    sent: Vec<SentPayload>,
}

/// Transport whose answers are scripted up front. Clones share the script and
/// the log of sent payloads, so a test can keep one clone for assertions.
///
/// Once the script runs out every send gets `otherwise`, or success when it is
/// unset.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
    sent_signal: Arc<Condvar>,
    latency: Duration,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport answering every send with `result`.
    pub fn always(result: DeliveryResult) -> Self {
        Self::new().otherwise(result)
    }

    pub fn then(self, result: DeliveryResult) -> Self {
        self.script.lock().steps.push_back(result);
        self
    }

    pub fn then_repeat(self, result: DeliveryResult, times: usize) -> Self {
        self.script
            .lock()
            .steps
            .extend(std::iter::repeat_n(result, times));
        self
    }

    pub fn otherwise(self, result: DeliveryResult) -> Self {
        self.script.lock().otherwise = Some(result);
        self
    }

    /// Sleep this long inside every send.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queue more answers while the pipeline is running.
    pub fn push(&self, result: DeliveryResult) {
        self.script.lock().steps.push_back(result);
    }

    pub fn sent(&self) -> Vec<SentPayload> {
        self.script.lock().sent.clone()
    }

    pub fn send_count(&self) -> usize {
        self.script.lock().sent.len()
    }

    /// Records from every attempt that was answered with success, in order.
    pub fn delivered_records(&self) -> Vec<LogRecord> {
        self.sent()
            .iter()
            .filter(|p| matches!(p.result, DeliveryResult::Delivered { .. }))
            .flat_map(SentPayload::records)
            .collect()
    }

    /// Block until at least `count` sends happened or `timeout` elapsed.
    pub fn wait_for_sends(&self, count: usize, timeout: Duration) -> bool {
        let deadline = deadline::after(Instant::now(), timeout);
        let mut script = self.script.lock();
        while script.sent.len() < count {
            if deadline::wait(&self.sent_signal, &mut script, deadline) {
                return script.sent.len() >= count;
            }
        }
        true
    }
}

impl Transport for ScriptedTransport {
    fn send(&mut self, payload: &Payload) -> DeliveryResult {
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        let mut script = self.script.lock();
        let result = script
            .steps
            .pop_front()
            .or_else(|| script.otherwise.clone())
            .unwrap_or_else(DeliveryResult::delivered);
        script.sent.push(SentPayload {
            at: Instant::now(),
            sequence: payload.sequence(),
            body: payload.body().to_vec(),
            result: result.clone(),
        });
        self.sent_signal.notify_all();
        result
    }
}

impl std::fmt::Debug for ScriptedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let script = self.script.lock();
        f.debug_struct("ScriptedTransport")
            .field("remaining", &script.steps.len())
            .field("sent", &script.sent.len())
            .finish()
    }
}
