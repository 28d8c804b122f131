//! Overflow policy definition and parsing.
//!
//! Shared by the builder and the INI loader so both accept the same
//! spellings.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Wait applied by a bare `block` policy string.
pub const DEFAULT_BLOCK_TIMEOUT: Duration = Duration::from_millis(250);

const VALID_POLICIES: &str = "block, block:N, drop_newest, drop_oldest";

/// Determines how the ring buffer reacts when it is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Suspend the producer until space frees or the timeout elapses. A zero
    /// timeout fails immediately.
    Block(Duration),
    /// Discard the incoming record.
    DropNewest,
    /// Evict the oldest queued record to make room.
    DropOldest,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        Self::DropNewest
    }
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Block(timeout) => write!(f, "block:{}", timeout.as_millis()),
            Self::DropNewest => f.write_str("drop_newest"),
            Self::DropOldest => f.write_str("drop_oldest"),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ParsePolicyError {
    #[error("block timeout must be a non-negative integer (N in 'block:N')")]
    InvalidTimeout,
    #[error("invalid overflow policy '{0}'. Valid options are: {VALID_POLICIES}")]
    Unknown(String),
}

/// Parses a policy string into an [`OverflowPolicy`].
///
/// # Accepted input formats
/// - "block": Block for [`DEFAULT_BLOCK_TIMEOUT`].
/// - "block:N": Block for up to N milliseconds (0 fails immediately).
/// - "drop_newest" or "drop": Drop the incoming record.
/// - "drop_oldest": Evict the oldest queued record.
impl FromStr for OverflowPolicy {
    type Err = ParsePolicyError;

    fn from_str(policy: &str) -> Result<Self, Self::Err> {
        let normalized = policy.trim().to_ascii_lowercase().replace('-', "_");

        if let Some(rest) = normalized.strip_prefix("block:") {
            let ms: u64 = rest
                .trim()
                .parse()
                .map_err(|_| ParsePolicyError::InvalidTimeout)?;
            return Ok(Self::Block(Duration::from_millis(ms)));
        }

        match normalized.as_str() {
            "block" => Ok(Self::Block(DEFAULT_BLOCK_TIMEOUT)),
            "drop" | "drop_newest" => Ok(Self::DropNewest),
            "drop_oldest" => Ok(Self::DropOldest),
            _ => Err(ParsePolicyError::Unknown(normalized)),
        }
    }
}
