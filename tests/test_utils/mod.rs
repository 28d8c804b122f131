//! Helpers shared by the integration tests.

pub mod bulk_server;

pub use bulk_server::{CapturedRequest, MockReply, spawn_bulk_server};
