//! Retry executor: drives one logical request end-to-end as a bounded
//! sequence of attempts.
//!
//! Single-attempt execution stays in the transport; every policy loop lives
//! here. Exactly one executor drives one logical request and owns its attempt
//! history exclusively. No lock is held across a network call or a sleep.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::HeaderMap;
use tokio::time::Instant;
use tracing::debug;

use crate::classify::{classify_status, classify_transport_error, Classified, FailureKind};
use crate::error::Failure;
use crate::policy::RetryPolicy;
use crate::request::LogicalRequest;
use crate::resilience::backoff::{delay_for, JitterSource};
use crate::resilience::breaker::CircuitBreaker;
use crate::resilience::throttle::{Throttle, ThrottleError};
use crate::transport::Transport;

/// Record of one issued attempt.
#[derive(Debug, Clone)]
pub struct Attempt {
    /// 1-based sequence number.
    pub number: u32,
    /// Offset from request submit to attempt start.
    pub at: Duration,
    /// Time the attempt took.
    pub elapsed: Duration,
    pub outcome: AttemptOutcome,
}

/// Exactly one outcome is recorded per attempt.
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    Success { status: u16 },
    Failure { kind: FailureKind },
}

/// Successful response, passed through from the transport together with the
/// attempt history that produced it.
#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub attempts: Vec<Attempt>,
}

pub(crate) struct Executor<'a> {
    pub transport: &'a dyn Transport,
    pub throttle: &'a Throttle,
    pub breaker: &'a Arc<CircuitBreaker>,
    pub policy: &'a RetryPolicy,
    pub jitter: &'a dyn JitterSource,
    /// Client-wide per-attempt timeout; a per-request value overrides it.
    pub default_attempt_timeout: Option<Duration>,
}

impl Executor<'_> {
    pub(crate) async fn run(&self, request: &LogicalRequest) -> Result<Response, Failure> {
        let submitted = Instant::now();
        let deadline = request
            .timeout
            .or(self.policy.timeout)
            .map(|t| submitted + t);
        let attempt_timeout = request.attempt_timeout.or(self.default_attempt_timeout);
        let target = request.target();
        let max_attempts = self.policy.max_attempts.max(1);

        let mut attempts: Vec<Attempt> = Vec::new();

        for number in 1..=max_attempts {
            if request.cancel.is_cancelled() {
                return Err(Failure::new(
                    FailureKind::Cancelled,
                    attempts,
                    "cancelled before attempt",
                ));
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(Failure::new(
                    FailureKind::DeadlineExceeded,
                    attempts,
                    "deadline elapsed before attempt",
                ));
            }

            // Breaker gate: short-circuit without any network activity.
            let passage = match self.breaker.try_pass() {
                Ok(p) => p,
                Err(retry_in) => {
                    return Err(Failure::new(
                        FailureKind::CircuitOpen,
                        attempts,
                        format!("circuit open for {target}, retry in {retry_in:?}"),
                    ));
                }
            };

            // Throttle admission, bounded by deadline and cancellation.
            // The permit is scoped to this attempt; capacity is returned on
            // drop no matter how the attempt ends.
            let permit = match self.throttle.acquire(deadline, &request.cancel).await {
                Ok(p) => p,
                Err(ThrottleError::DeadlineExceeded) => {
                    drop(passage);
                    return Err(Failure::new(
                        FailureKind::DeadlineExceeded,
                        attempts,
                        format!("deadline elapsed waiting for capacity on {target}"),
                    ));
                }
                Err(ThrottleError::Cancelled) => {
                    drop(passage);
                    return Err(Failure::new(
                        FailureKind::Cancelled,
                        attempts,
                        "cancelled waiting for throttle capacity",
                    ));
                }
            };

            let at = submitted.elapsed();
            let attempt_started = Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = request.cancel.cancelled() => {
                    attempts.push(Attempt {
                        number,
                        at,
                        elapsed: attempt_started.elapsed(),
                        outcome: AttemptOutcome::Failure { kind: FailureKind::Cancelled },
                    });
                    // Dropping the unrecorded passage releases any probe slot
                    // without feeding a caller-side outcome to the breaker.
                    drop(passage);
                    return Err(Failure::new(
                        FailureKind::Cancelled,
                        attempts,
                        "cancelled during attempt",
                    ));
                }
                _ = sleep_until_opt(deadline) => {
                    attempts.push(Attempt {
                        number,
                        at,
                        elapsed: attempt_started.elapsed(),
                        outcome: AttemptOutcome::Failure { kind: FailureKind::DeadlineExceeded },
                    });
                    drop(passage);
                    return Err(Failure::new(
                        FailureKind::DeadlineExceeded,
                        attempts,
                        "deadline elapsed during attempt",
                    ));
                }
                outcome = self.transport.send(request, attempt_timeout) => outcome,
            };
            let elapsed = attempt_started.elapsed();
            drop(permit);

            let (classified, message) = match outcome {
                Ok(response) => {
                    match classify_status(response.status, &response.headers, &self.policy.retry_on)
                    {
                        None => {
                            passage.record_success();
                            attempts.push(Attempt {
                                number,
                                at,
                                elapsed,
                                outcome: AttemptOutcome::Success {
                                    status: response.status,
                                },
                            });
                            return Ok(Response {
                                status: response.status,
                                headers: response.headers,
                                body: response.body,
                                attempts,
                            });
                        }
                        Some(classified) => {
                            let message = body_excerpt(&response.body);
                            (classified, message)
                        }
                    }
                }
                Err(err) => {
                    let classified = classify_transport_error(&err, &self.policy.retry_on);
                    (classified, err.to_string())
                }
            };

            passage.record_failure();
            attempts.push(Attempt {
                number,
                at,
                elapsed,
                outcome: AttemptOutcome::Failure {
                    kind: classified.kind.clone(),
                },
            });

            if !self.may_retry(request, &classified) {
                return Err(Failure::new(classified.kind, attempts, message));
            }
            if number == max_attempts {
                return Err(Failure::new(
                    classified.kind,
                    attempts,
                    format!("retries exhausted: {message}"),
                ));
            }

            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            let delay = match delay_for(
                self.policy,
                number,
                classified.kind.server_hint(),
                remaining,
                self.jitter,
            ) {
                Some(d) => d,
                None => {
                    return Err(Failure::new(
                        classified.kind,
                        attempts,
                        format!("deadline would elapse before next retry: {message}"),
                    ));
                }
            };

            debug!(
                target_key = target.as_str(),
                attempt = number,
                kind = classified.kind.label(),
                delay_ms = delay.as_millis() as u64,
                "retrying after backoff"
            );
            if delay > Duration::ZERO {
                tokio::select! {
                    biased;
                    _ = request.cancel.cancelled() => {
                        return Err(Failure::new(
                            FailureKind::Cancelled,
                            attempts,
                            "cancelled during backoff",
                        ));
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        unreachable!("loop returns on success, terminal failure or exhaustion")
    }

    /// A failure is retried when the policy allows its kind and the
    /// idempotency rules permit another try. Ambiguous post-send failures
    /// are terminal for non-idempotent requests unless the policy opts in.
    fn may_retry(&self, request: &LogicalRequest, classified: &Classified) -> bool {
        if !classified.retryable {
            return false;
        }
        if classified.ambiguous && !request.idempotent && !self.policy.retry_ambiguous {
            return false;
        }
        true
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn body_excerpt(body: &Bytes) -> String {
    const LIMIT: usize = 256;
    let text = String::from_utf8_lossy(body);
    let trimmed = text.trim();
    if trimmed.len() <= LIMIT {
        trimmed.to_string()
    } else {
        let mut end = LIMIT;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &trimmed[..end])
    }
}
