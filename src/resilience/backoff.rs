//! Backoff arithmetic: exponential growth, cap, jitter and deadline clamp.

use std::time::Duration;

use rand::Rng;

use crate::policy::RetryPolicy;

/// Source of uniform randomness for jitter.
///
/// Injected so backoff behavior is deterministic under test; the default
/// implementation draws from the thread RNG.
pub trait JitterSource: Send + Sync {
    /// A uniform sample in `[0.0, 1.0)`.
    fn sample(&self) -> f64;
}

/// Default jitter source backed by the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRngJitter;

impl JitterSource for ThreadRngJitter {
    fn sample(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// Compute the delay before the attempt after `attempt` (1-based, the attempt
/// that just failed).
///
/// `base * 2^(attempt-1)` capped at `max_delay`, then scaled by a uniform
/// factor in `1 - jitter ..= 1 + jitter` and clamped to the cap again so
/// jitter never pushes past it. A `server_hint` (`Retry-After`) larger than
/// the computed delay wins, even past the cap.
///
/// Returns `None` when the delay cannot fit in the remaining deadline: the
/// caller must not retry rather than sleep a truncated interval.
pub(crate) fn delay_for(
    policy: &RetryPolicy,
    attempt: u32,
    server_hint: Option<Duration>,
    remaining: Option<Duration>,
    jitter: &dyn JitterSource,
) -> Option<Duration> {
    let exponent = attempt.saturating_sub(1);
    let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
    let exponential = policy
        .base_delay
        .saturating_mul(factor)
        .min(policy.max_delay);

    let mut delay = if policy.jitter_factor > 0.0 {
        let spread = 1.0 - policy.jitter_factor + 2.0 * policy.jitter_factor * jitter.sample();
        Duration::from_secs_f64(exponential.as_secs_f64() * spread).min(policy.max_delay)
    } else {
        exponential
    };

    if let Some(hint) = server_hint {
        if hint > delay {
            delay = hint;
        }
    }

    match remaining {
        Some(left) if delay >= left => None,
        _ => Some(delay),
    }
}
