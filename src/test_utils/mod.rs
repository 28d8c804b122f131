//! Test doubles shared by unit and integration tests.
//!
//! Compiled for `cfg(test)` and behind the `test-util` feature.

mod collecting_sink;
mod scripted_transport;

pub use collecting_sink::CollectingSink;
pub use scripted_transport::{ScriptedTransport, SentPayload};
