//! HTTP status classification and bulk response interpretation.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use super::{DeliveryResult, ItemFailures};

/// Classification of an HTTP status for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    Success,
    Retryable,
    Permanent,
}

/// Classifies an HTTP status code.
///
/// * **2xx** → [`ResponseClass::Success`]
/// * **408, 429, 5xx** → [`ResponseClass::Retryable`]
/// * **Other** → [`ResponseClass::Permanent`]
pub fn classify_status(status: u16) -> ResponseClass {
    match status {
        200..=299 => ResponseClass::Success,
        408 | 429 => ResponseClass::Retryable,
        500..=599 => ResponseClass::Retryable,
        _ => ResponseClass::Permanent,
    }
}

#[derive(Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<HashMap<String, BulkItem>>,
}

#[derive(Deserialize)]
struct BulkItem {
    status: u16,
    #[serde(default)]
    error: Option<Value>,
}

/// Turn a 2xx bulk response body into a [`DeliveryResult`].
///
/// Bodies that are not bulk responses (e.g. from an ingest proxy that only
/// answers `ok`) count as full delivery.
pub fn interpret_bulk_response(body: &str) -> DeliveryResult {
    let Ok(response) = serde_json::from_str::<BulkResponse>(body) else {
        return DeliveryResult::delivered();
    };
    if !response.errors {
        return DeliveryResult::delivered();
    }

    let mut failures = ItemFailures::default();
    let mut reason = None;
    for (index, item) in response
        .items
        .iter()
        .enumerate()
        .filter_map(|(i, op)| op.values().next().map(|item| (i, item)))
    {
        match classify_status(item.status) {
            ResponseClass::Success => continue,
            ResponseClass::Retryable => failures.retry.push(index),
            ResponseClass::Permanent => failures.rejected += 1,
        }
        if reason.is_none() {
            reason = Some(describe_item_error(item));
        }
    }

    if failures.retry.is_empty() {
        return DeliveryResult::Delivered {
            rejected: failures.rejected,
        };
    }
    DeliveryResult::RetryableFailure {
        reason: reason.unwrap_or_else(|| "bulk items rejected".to_owned()),
        retry_items: Some(failures),
    }
}

fn describe_item_error(item: &BulkItem) -> String {
    let detail = item.error.as_ref().and_then(|e| {
        e.get("reason")
            .and_then(Value::as_str)
            .or_else(|| e.get("type").and_then(Value::as_str))
            .or_else(|| e.as_str())
    });
    match detail {
        Some(detail) => format!("bulk item status {}: {detail}", item.status),
        None => format!("bulk item status {}", item.status),
    }
}
