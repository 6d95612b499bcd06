//! Error classification: maps raw transport outcomes and HTTP statuses to a
//! typed [`FailureKind`] plus a retryability verdict.
//!
//! Classification is a pure function of the outcome and the policy's
//! configured retryable set; it has no side effects. The circuit breaker and
//! retry executor both consume the classified kind, never the raw error, so
//! classification policy and breaker policy stay decoupled.

use std::fmt;
use std::time::Duration;

use reqwest::header::HeaderMap;

use crate::policy::RetryOn;
use crate::transport::TransportError;

/// Typed failure taxonomy for a logical request.
///
/// The classifier emits the first six variants. `CircuitOpen`,
/// `DeadlineExceeded` and `Cancelled` are produced by the retry executor
/// itself and are always terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// Connection-level error (refused, reset, DNS failure).
    Network,
    /// The attempt exceeded its per-attempt timeout.
    Timeout,
    /// HTTP 429; `retry_after` carries the server's `Retry-After` hint.
    RateLimited { retry_after: Option<Duration> },
    /// HTTP 5xx.
    ServerError { status: u16 },
    /// HTTP 4xx other than 429.
    ClientError { status: u16 },
    /// The circuit breaker short-circuited the attempt; no network call made.
    CircuitOpen,
    /// The logical request's deadline elapsed.
    DeadlineExceeded,
    /// The caller cancelled the logical request.
    Cancelled,
    /// Unclassifiable outcome. Not retryable by default (fail safe).
    Unknown,
}

impl FailureKind {
    /// Stable label for logs and diagnostics.
    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::Network => "network",
            FailureKind::Timeout => "timeout",
            FailureKind::RateLimited { .. } => "rate_limited",
            FailureKind::ServerError { .. } => "server_error",
            FailureKind::ClientError { .. } => "client_error",
            FailureKind::CircuitOpen => "circuit_open",
            FailureKind::DeadlineExceeded => "deadline_exceeded",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Unknown => "unknown",
        }
    }

    /// Server-provided delay hint, if this failure carries one.
    pub fn server_hint(&self) -> Option<Duration> {
        match self {
            FailureKind::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::ServerError { status } | FailureKind::ClientError { status } => {
                write!(f, "{} (HTTP {})", self.label(), status)
            }
            _ => f.write_str(self.label()),
        }
    }
}

/// Verdict for one failed attempt.
#[derive(Debug, Clone)]
pub struct Classified {
    pub kind: FailureKind,
    /// Retryable under the policy's configured retryable set.
    pub retryable: bool,
    /// Whether the request may have executed on the server. Ambiguous
    /// failures are not retried for non-idempotent requests unless the
    /// policy opts in.
    pub ambiguous: bool,
}

/// Classify a transport-level error (no HTTP response was received).
///
/// Connection failures are provably pre-send; timeouts and post-send network
/// errors are ambiguous because the server may have executed the request.
pub fn classify_transport_error(err: &TransportError, retry_on: &RetryOn) -> Classified {
    let (kind, ambiguous) = match err {
        TransportError::Connect { .. } => (FailureKind::Network, false),
        TransportError::Timeout => (FailureKind::Timeout, true),
        TransportError::Network { .. } => (FailureKind::Network, true),
        TransportError::Other { .. } => (FailureKind::Unknown, true),
    };
    let retryable = retry_on.allows(&kind);
    Classified {
        kind,
        retryable,
        ambiguous,
    }
}

/// Classify an HTTP response status. Returns `None` for success statuses
/// (anything below 400), which pass through to the caller unchanged.
///
/// A received response proves the server finished processing and answered,
/// so status-classified failures are never ambiguous.
pub fn classify_status(status: u16, headers: &HeaderMap, retry_on: &RetryOn) -> Option<Classified> {
    let kind = match status {
        0..=399 => return None,
        429 => FailureKind::RateLimited {
            retry_after: retry_after(headers),
        },
        400..=499 => FailureKind::ClientError { status },
        500..=599 => FailureKind::ServerError { status },
        _ => FailureKind::Unknown,
    };
    let retryable = retry_on.allows(&kind);
    Some(Classified {
        kind,
        retryable,
        ambiguous: false,
    })
}

/// Best-effort parsing of the `Retry-After` header.
///
/// Only the common `Retry-After: <seconds>` form is supported; the HTTP-date
/// form would pull in a date-parsing dependency for little gain.
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get("retry-after")?.to_str().ok()?.trim();
    let secs: u64 = raw.parse().ok()?;
    Some(Duration::from_secs(secs))
}
