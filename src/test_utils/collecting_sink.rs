//! A diagnostic sink that accumulates events in memory for test assertions.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::diagnostics::{DiagnosticEvent, DiagnosticSink};
use crate::state::{BreakerStatus, DropReason};

/// Sink that stores every event it receives for later inspection.
#[derive(Clone, Default)]
pub struct CollectingSink {
    events: Arc<Mutex<Vec<DiagnosticEvent>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a snapshot of all events received so far.
    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.events.lock().clone()
    }

    /// Breaker transitions in the order they happened.
    pub fn transitions(&self) -> Vec<(BreakerStatus, BreakerStatus)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                DiagnosticEvent::BreakerTransition { from, to } => Some((*from, *to)),
                _ => None,
            })
            .collect()
    }

    /// Total records reported dropped for `reason`.
    pub fn dropped(&self, reason: DropReason) -> u64 {
        self.events
            .lock()
            .iter()
            .map(|event| match event {
                DiagnosticEvent::Dropped { reason: r, count } if *r == reason => *count,
                _ => 0,
            })
            .sum()
    }

    pub fn as_sink(&self) -> Arc<dyn DiagnosticSink> {
        Arc::new(self.clone())
    }
}

impl DiagnosticSink for CollectingSink {
    fn emit(&self, event: &DiagnosticEvent) {
        self.events.lock().push(event.clone());
    }
}
