//! Delivery of encoded batches to the backend.
//!
//! # Retry semantics
//!
//! - **2xx**: The bulk response is inspected item by item. Items rejected
//!   with 429 or 5xx are retried alone; other rejected items are counted and
//!   dropped.
//! - **408, 429, 5xx, network errors**: Retryable. The sender applies jittered
//!   exponential backoff and feeds the failure to the circuit breaker.
//! - **Other 4xx**: Permanent. The batch is dropped without retrying.

pub mod backoff;
pub mod breaker;
mod http;
mod response;

use crate::formatter::Payload;

pub use backoff::{Backoff, RetryPolicy};
pub use breaker::{BreakerPolicy, CircuitBreaker, Permit};
pub use http::HttpTransport;
pub use response::{ResponseClass, classify_status, interpret_bulk_response};

/// Per-item outcome of a bulk request that was only partly accepted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ItemFailures {
    /// Zero-based indices of items worth sending again.
    pub retry: Vec<usize>,
    /// Items the backend refused permanently.
    pub rejected: usize,
}

/// Outcome of one send attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryResult {
    /// Every item was settled by the backend; `rejected` of them were refused.
    Delivered { rejected: usize },
    /// Worth retrying. `retry_items` narrows the retry to specific bulk items;
    /// `None` means the whole payload.
    RetryableFailure {
        reason: String,
        retry_items: Option<ItemFailures>,
    },
    /// Retrying cannot succeed.
    PermanentFailure { status: Option<u16>, reason: String },
}

impl DeliveryResult {
    pub fn delivered() -> Self {
        Self::Delivered { rejected: 0 }
    }

    pub fn retryable(reason: impl Into<String>) -> Self {
        Self::RetryableFailure {
            reason: reason.into(),
            retry_items: None,
        }
    }

    pub fn permanent(status: Option<u16>, reason: impl Into<String>) -> Self {
        Self::PermanentFailure {
            status,
            reason: reason.into(),
        }
    }
}

/// Sends payloads. Owned by the sender thread, so implementations need not be
/// `Sync`.
pub trait Transport: Send {
    fn send(&mut self, payload: &Payload) -> DeliveryResult;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, payload: &Payload) -> DeliveryResult {
        (**self).send(payload)
    }
}
