//! Exponential backoff policy.
//!
//! The delay after the n-th consecutive failure is
//! `min(BASE * 2^min(n - 1, CAP_EXPONENT), MAX)`. The constants are fixed:
//! jobs and their tests depend on the exact sequence.

use chrono::Duration;

pub const BASE_DELAY_SECS: i64 = 60;
pub const CAP_EXPONENT: u32 = 10;
pub const MAX_DELAY_SECS: i64 = 3600;

/// Delay to wait after `attempts` consecutive failures (`attempts >= 1`).
///
/// `attempts == 0` is treated like the first failure.
pub fn delay_for_attempt(attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(CAP_EXPONENT);
    let secs = BASE_DELAY_SECS
        .saturating_mul(1_i64 << exponent)
        .min(MAX_DELAY_SECS);
    Duration::seconds(secs)
}
