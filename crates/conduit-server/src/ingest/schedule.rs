//! Start-time gating and child spacing
//!
//! A job that is not yet due is never slept on. [`gate`] yields
//! [`Dispatch::RescheduleAfter`], the runner turns it into
//! [`JobOutcome::RescheduleAfter`](crate::ingest::framework::types::JobOutcome::RescheduleAfter),
//! and the consumer hides the message for that long.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Longest visibility extension the queue accepts (12 hours)
pub const MAX_VISIBILITY_TIMEOUT_SECS: u64 = 43_200;

pub const MAX_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(MAX_VISIBILITY_TIMEOUT_SECS);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Proceed,
    RescheduleAfter(Duration),
}

/// Decide whether a job with `start_timestamp` may run at `now`
///
/// Sub-second remainders round up so a rescheduled job never wakes early.
pub fn gate(start_timestamp: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Dispatch {
    let Some(start) = start_timestamp else {
        return Dispatch::Proceed;
    };
    if start <= now {
        return Dispatch::Proceed;
    }

    let wait_ms = (start - now).num_milliseconds().max(0) as u64;
    let wait_secs = wait_ms.div_ceil(1000).max(1);
    Dispatch::RescheduleAfter(cap_visibility(Duration::from_secs(wait_secs)))
}

pub fn cap_visibility(delay: Duration) -> Duration {
    delay.min(MAX_VISIBILITY_TIMEOUT)
}

/// Start timestamps for `count` children spaced `per_batch_delay` apart
///
/// The first child runs immediately and carries no start timestamp. Offsets
/// that overflow saturate at the latest representable time.
pub fn child_start_times(
    base: DateTime<Utc>,
    count: usize,
    per_batch_delay: Duration,
) -> Vec<Option<DateTime<Utc>>> {
    let step = chrono::Duration::from_std(per_batch_delay).unwrap_or(chrono::Duration::MAX);
    (0..count)
        .map(|index| {
            if index == 0 {
                return None;
            }
            let start = i32::try_from(index)
                .ok()
                .and_then(|index| step.checked_mul(index))
                .and_then(|offset| base.checked_add_signed(offset))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            Some(start)
        })
        .collect()
}
