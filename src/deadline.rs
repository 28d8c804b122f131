//! Deadlines for waits whose timeout may not fit in an [`Instant`].
//!
//! A deadline of `None` means "no deadline": the timeout overflowed, so the
//! wait only ends on notification.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, MutexGuard};

pub(crate) fn after(now: Instant, timeout: Duration) -> Option<Instant> {
    now.checked_add(timeout)
}

/// Time left before `deadline`, saturating at zero.
pub(crate) fn remaining(deadline: Option<Instant>, now: Instant) -> Duration {
    deadline.map_or(Duration::MAX, |d| d.saturating_duration_since(now))
}

pub(crate) fn passed(deadline: Option<Instant>, now: Instant) -> bool {
    deadline.is_some_and(|d| now >= d)
}

/// Block on `condvar` until notified or `deadline` passes. Returns `true`
/// when the wait timed out.
pub(crate) fn wait<T>(
    condvar: &Condvar,
    guard: &mut MutexGuard<'_, T>,
    deadline: Option<Instant>,
) -> bool {
    match deadline {
        Some(deadline) => condvar.wait_until(guard, deadline).timed_out(),
        None => {
            condvar.wait(guard);
            false
        }
    }
}
