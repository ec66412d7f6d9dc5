//! Exponential retry backoff with ±20% jitter.

use rand::Rng;

/// Fraction of the delay used as jitter on either side, as a divisor.
const JITTER_DIVISOR: u64 = 5;

/// Unjittered delay in milliseconds: `base_seconds * 2^(attempt - 1)`.
///
/// `attempt` is the post-increment attempt count; zero is treated as one.
/// Saturates instead of overflowing for very large attempts.
pub fn unjittered_delay_ms(attempt: u32, base_seconds: u64) -> u64 {
    let exponent = attempt.max(1) - 1;
    let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
    base_seconds.saturating_mul(1000).saturating_mul(factor)
}

/// Jittered retry delay in milliseconds using the thread-local RNG.
pub fn backoff_delay(attempt: u32, base_seconds: u64) -> u64 {
    backoff_delay_with(attempt, base_seconds, &mut rand::rng())
}

/// Jittered retry delay drawn from `rng`.
///
/// The result lies in `[delay - floor(delay / 5), delay + floor(delay / 5)]`.
pub fn backoff_delay_with<R: Rng + ?Sized>(attempt: u32, base_seconds: u64, rng: &mut R) -> u64 {
    let delay = unjittered_delay_ms(attempt, base_seconds);
    let delta = delay / JITTER_DIVISOR;
    if delta == 0 {
        return delay;
    }
    (delay - delta).saturating_add(rng.random_range(0..=delta.saturating_mul(2)))
}
