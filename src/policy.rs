//! Retry policy configuration.
//!
//! A [`RetryPolicy`] is immutable configuration attached per client or per
//! logical request. The declarative client-definition layer supplies these
//! values; this crate only consumes them, which is why everything here
//! derives serde.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::classify::FailureKind;
use crate::error::{Error, Result};

/// Which classified failure kinds are eligible for retry.
///
/// `ClientError` and the terminal kinds (`CircuitOpen`, `DeadlineExceeded`,
/// `Cancelled`) are never retryable and have no toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOn {
    pub network: bool,
    pub timeout: bool,
    pub rate_limited: bool,
    pub server_error: bool,
    /// Off by default: an unclassified outcome is treated as fatal.
    pub unknown: bool,
}

impl RetryOn {
    /// The standard transient set: network, timeout, 429 and 5xx.
    pub const fn standard() -> Self {
        Self {
            network: true,
            timeout: true,
            rate_limited: true,
            server_error: true,
            unknown: false,
        }
    }

    /// No kind is retryable; every failure is terminal on first occurrence.
    pub const fn none() -> Self {
        Self {
            network: false,
            timeout: false,
            rate_limited: false,
            server_error: false,
            unknown: false,
        }
    }

    pub(crate) fn allows(&self, kind: &FailureKind) -> bool {
        match kind {
            FailureKind::Network => self.network,
            FailureKind::Timeout => self.timeout,
            FailureKind::RateLimited { .. } => self.rate_limited,
            FailureKind::ServerError { .. } => self.server_error,
            FailureKind::Unknown => self.unknown,
            FailureKind::ClientError { .. }
            | FailureKind::CircuitOpen
            | FailureKind::DeadlineExceeded
            | FailureKind::Cancelled => false,
        }
    }
}

impl Default for RetryOn {
    fn default() -> Self {
        Self::standard()
    }
}

/// Retry limits, backoff parameters and deadline for a logical request type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Must be at least 1.
    pub max_attempts: u32,
    /// First-retry delay; doubles per attempt.
    pub base_delay: Duration,
    /// Upper bound on the computed backoff delay.
    pub max_delay: Duration,
    /// Jitter spread in `0.0..=1.0`; the computed delay is scaled by a
    /// uniform factor in `1 - jitter_factor ..= 1 + jitter_factor`.
    pub jitter_factor: f64,
    /// Which failure kinds are eligible for retry.
    pub retry_on: RetryOn,
    /// Default overall deadline for requests that don't set their own.
    pub timeout: Option<Duration>,
    /// Opt-in: retry ambiguous post-send failures even for non-idempotent
    /// requests. Off by default because the server may have partially
    /// executed the request.
    pub retry_ambiguous: bool,
}

impl RetryPolicy {
    pub const fn standard() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            jitter_factor: 0.2,
            retry_on: RetryOn::standard(),
            timeout: None,
            retry_ambiguous: false,
        }
    }

    pub const fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub const fn base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub const fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn jitter_factor(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor.clamp(0.0, 1.0);
        self
    }

    pub const fn retry_on(mut self, retry_on: RetryOn) -> Self {
        self.retry_on = retry_on;
        self
    }

    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub const fn retry_ambiguous(mut self, retry_ambiguous: bool) -> Self {
        self.retry_ambiguous = retry_ambiguous;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::config("max_attempts must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(Error::config("jitter_factor must be within 0.0..=1.0"));
        }
        if self.base_delay > self.max_delay {
            return Err(Error::config("base_delay must not exceed max_delay"));
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}
