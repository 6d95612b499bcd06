//! # reqshield
//!
//! Toolkit for constructing resilient, production-grade HTTP API clients on
//! top of a base HTTP transport. Define a client for a third-party or
//! internal REST API once and get correct handling of transient failures,
//! rate limiting and consistent error semantics, instead of re-implementing
//! them by hand in every client.
//!
//! ## Core Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`Client`] | Entry point: submit logical requests, per-target state registry |
//! | [`executor`] | Retry state machine with backoff, jitter and idempotency awareness |
//! | [`resilience::throttle`] | Concurrency / per-window throttle shared per upstream target |
//! | [`resilience::breaker`] | Circuit breaker protecting caller and upstream |
//! | [`classify`] | Typed failure taxonomy and retryability verdicts |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use reqshield::{Client, LogicalRequest, RetryPolicy};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> reqshield::Result<()> {
//!     let client = Client::builder()
//!         .with_policy(
//!             RetryPolicy::standard()
//!                 .max_attempts(4)
//!                 .base_delay(Duration::from_millis(250)),
//!         )
//!         .with_attempt_timeout(Duration::from_secs(10))
//!         .build()?;
//!
//!     let request = LogicalRequest::get("https://api.example.com/v1/users")?
//!         .timeout(Duration::from_secs(30))
//!         .build();
//!
//!     let response = client.submit(request).await?;
//!     println!("HTTP {} after {} attempt(s)", response.status, response.attempts.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Failure Semantics
//!
//! Transient failures (network, timeout, 429, 5xx) are retried up to policy
//! limits with exponential backoff and jitter; client errors, circuit-open
//! short-circuits, deadline expiry and cancellation surface immediately.
//! Every terminal [`Failure`] carries the full attempt history. Nothing in
//! this crate is fatal to the process; all failures are returned values.

pub mod classify;
pub mod client;
pub mod executor;
pub mod policy;
pub mod request;
pub mod resilience;
pub mod transport;

mod error;

pub use classify::FailureKind;
pub use client::{Client, ClientBuilder, TargetSnapshot};
pub use error::{Error, Failure, Result};
pub use executor::{Attempt, AttemptOutcome, Response};
pub use policy::{RetryOn, RetryPolicy};
pub use request::{LogicalRequest, RequestBuilder};
pub use resilience::backoff::{JitterSource, ThreadRngJitter};
pub use resilience::breaker::{BreakerConfig, BreakerSnapshot, CircuitBreaker};
pub use resilience::throttle::{Throttle, ThrottleConfig, ThrottleError, ThrottlePermit};
pub use transport::{HttpTransport, RawResponse, Transport, TransportError};
