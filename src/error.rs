use std::fmt;

use thiserror::Error;

use crate::classify::FailureKind;
use crate::executor::Attempt;
use crate::transport::TransportError;

/// Terminal outcome of a logical request that did not succeed.
///
/// Carries the full per-attempt history so callers can distinguish
/// "never reached the network" from "exhausted retries" from "circuit
/// protection engaged".
#[derive(Debug, Clone)]
pub struct Failure {
    /// Classification of the failure that ended the request.
    pub kind: FailureKind,
    /// Ordered history of every attempt made for this logical request.
    pub attempts: Vec<Attempt>,
    /// Human-readable detail (upstream body excerpt, deadline note, ...).
    pub message: String,
}

impl Failure {
    pub(crate) fn new(
        kind: FailureKind,
        attempts: Vec<Attempt>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            attempts,
            message: message.into(),
        }
    }

    /// Number of attempts recorded before the request gave up.
    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "request failed ({}) after {} attempt(s)",
            self.kind,
            self.attempts.len()
        )?;
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

/// Unified error type for the toolkit.
///
/// Every failure is a returned value; nothing in this crate aborts the
/// process.
#[derive(Debug, Error)]
pub enum Error {
    /// The logical request ended in a terminal, classified failure.
    #[error("{0}")]
    Failed(Failure),

    /// A policy or resilience configuration was rejected up front.
    #[error("invalid configuration: {message}")]
    Config { message: String },

    /// The logical request itself was malformed (bad URL, missing host).
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// The base transport could not be constructed.
    #[error("transport setup failed: {0}")]
    Transport(#[from] TransportError),
}

impl Error {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_request(message: impl Into<String>) -> Self {
        Error::InvalidRequest {
            message: message.into(),
        }
    }

    /// The terminal failure, if this error is one.
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Error::Failed(f) => Some(f),
            _ => None,
        }
    }

    /// The failure kind, if this error carries a classified failure.
    pub fn kind(&self) -> Option<&FailureKind> {
        self.failure().map(|f| &f.kind)
    }
}

/// Result type alias for the library.
pub type Result<T> = std::result::Result<T, Error>;
