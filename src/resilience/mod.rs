//! Resilience primitives shared by every request to one upstream target.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`backoff`] | Exponential backoff with cap, jitter and deadline clamp |
//! | [`breaker`] | Circuit breaker state machine for failure isolation |
//! | [`throttle`] | Concurrency and per-window admission control |
//!
//! The throttle and breaker are per-target state objects looked up in the
//! client's synchronized registry and shared across all concurrent requests
//! to that target; neither is owned by a single request.

pub mod backoff;
pub mod breaker;
pub mod throttle;

pub use backoff::{JitterSource, ThreadRngJitter};
pub use breaker::{BreakerConfig, BreakerSnapshot, CircuitBreaker};
pub use throttle::{Throttle, ThrottleConfig, ThrottleError, ThrottlePermit};
