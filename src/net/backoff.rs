//! Exponential backoff for repeated accept failures.

use std::time::Duration;

/// First delay after an accept failure.
pub const ACCEPT_BACKOFF_BASE_MS: u64 = 5;

/// Longest delay between accept attempts.
pub const ACCEPT_BACKOFF_MAX_MS: u64 = 1000;

/// Delay before the next accept after `failures` consecutive errors.
///
/// Doubles from the base up to the cap; zero failures means no delay.
pub fn accept_backoff(failures: u32) -> Duration {
    if failures == 0 {
        return Duration::ZERO;
    }

    let factor = 2u64.saturating_pow(failures - 1);
    let delay_ms = ACCEPT_BACKOFF_BASE_MS.saturating_mul(factor);
    Duration::from_millis(delay_ms.min(ACCEPT_BACKOFF_MAX_MS))
}
