//! Caller-facing client: per-target resilience state plus the submit path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::executor::{Executor, Response};
use crate::policy::RetryPolicy;
use crate::request::LogicalRequest;
use crate::resilience::backoff::{JitterSource, ThreadRngJitter};
use crate::resilience::breaker::{BreakerConfig, BreakerSnapshot, CircuitBreaker};
use crate::resilience::throttle::{Throttle, ThrottleConfig};
use crate::transport::{HttpTransport, Transport};

/// Shared resilience state for one upstream target. All concurrent requests
/// to the target go through the same throttle and breaker.
struct TargetState {
    throttle: Arc<Throttle>,
    breaker: Arc<CircuitBreaker>,
}

/// Point-in-time view of one target's resilience state.
#[derive(Debug, Clone)]
pub struct TargetSnapshot {
    pub breaker: BreakerSnapshot,
    /// Available in-flight capacity, if a concurrency limit is configured.
    pub available_in_flight: Option<usize>,
}

/// A resilient HTTP API client.
///
/// Holds the default retry policy, the per-target throttle/breaker registry
/// and the base transport. All state is in-memory and process-scoped; nothing
/// survives a restart.
pub struct Client {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    throttle_cfg: ThrottleConfig,
    breaker_cfg: BreakerConfig,
    jitter: Arc<dyn JitterSource>,
    /// Default per-attempt timeout; a per-request value overrides it, and
    /// neither set means attempts are bounded only by the overall deadline.
    attempt_timeout: Option<Duration>,
    targets: Mutex<HashMap<String, Arc<TargetState>>>,
}

impl Client {
    /// A client with the standard policy over the default HTTP transport.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Execute a logical request under the client's default policy.
    pub async fn submit(&self, request: LogicalRequest) -> Result<Response> {
        let policy = self.policy.clone();
        self.submit_with_policy(request, &policy).await
    }

    /// Execute a logical request under a per-request policy.
    pub async fn submit_with_policy(
        &self,
        request: LogicalRequest,
        policy: &RetryPolicy,
    ) -> Result<Response> {
        policy.validate()?;
        let state = self.target_state(&request.target());
        let executor = Executor {
            transport: self.transport.as_ref(),
            throttle: state.throttle.as_ref(),
            breaker: &state.breaker,
            policy,
            jitter: self.jitter.as_ref(),
            default_attempt_timeout: self.attempt_timeout,
        };
        executor.run(&request).await.map_err(Error::Failed)
    }

    /// Snapshot the resilience state of one target, if the client has talked
    /// to it. Facts only, for application-layer orchestration.
    pub fn signals(&self, target: &str) -> Option<TargetSnapshot> {
        let targets = self.targets.lock().unwrap_or_else(|e| e.into_inner());
        let state = targets.get(target)?;
        Some(TargetSnapshot {
            breaker: state.breaker.snapshot(),
            available_in_flight: state.throttle.available_in_flight(),
        })
    }

    /// Default per-attempt timeout currently in effect.
    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout
    }

    fn target_state(&self, target: &str) -> Arc<TargetState> {
        let mut targets = self.targets.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(targets.entry(target.to_string()).or_insert_with(|| {
            Arc::new(TargetState {
                throttle: Arc::new(Throttle::new(self.throttle_cfg.clone())),
                breaker: Arc::new(CircuitBreaker::new(self.breaker_cfg.clone())),
            })
        }))
    }
}

/// Builder for [`Client`].
pub struct ClientBuilder {
    transport: Option<Arc<dyn Transport>>,
    policy: RetryPolicy,
    throttle_cfg: ThrottleConfig,
    breaker_cfg: BreakerConfig,
    jitter: Arc<dyn JitterSource>,
    attempt_timeout: Option<Duration>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            transport: None,
            policy: RetryPolicy::standard(),
            throttle_cfg: ThrottleConfig::unlimited(),
            breaker_cfg: BreakerConfig::standard(),
            jitter: Arc::new(ThreadRngJitter),
            attempt_timeout: None,
        }
    }

    /// Default retry policy for requests submitted via [`Client::submit`].
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Throttle limits applied to every upstream target.
    pub fn with_throttle(mut self, throttle: ThrottleConfig) -> Self {
        self.throttle_cfg = throttle;
        self
    }

    /// Breaker thresholds applied to every upstream target.
    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker_cfg = breaker;
        self
    }

    /// Default per-attempt timeout, overridable per request.
    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = Some(attempt_timeout);
        self
    }

    /// Replace the jitter source (tests pin this for determinism).
    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    /// Replace the base transport (tests inject scripted transports).
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<Client> {
        self.policy.validate()?;
        let transport = match self.transport {
            Some(t) => t,
            None => Arc::new(HttpTransport::new()?),
        };
        Ok(Client {
            transport,
            policy: self.policy,
            throttle_cfg: self.throttle_cfg,
            breaker_cfg: self.breaker_cfg,
            jitter: self.jitter,
            attempt_timeout: self.attempt_timeout,
            targets: Mutex::new(HashMap::new()),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_rejects_invalid_policy() {
        let res = Client::builder()
            .with_policy(RetryPolicy::standard().max_attempts(0))
            .build();
        assert!(matches!(res, Err(Error::Config { .. })));
    }

    #[test]
    fn attempt_timeout_defaults_to_none() {
        let client = Client::new().unwrap();
        assert_eq!(client.attempt_timeout(), None);
    }

    #[test]
    fn attempt_timeout_set_on_builder() {
        let client = Client::builder()
            .with_attempt_timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        assert_eq!(client.attempt_timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn signals_unknown_target_is_none() {
        let client = Client::new().unwrap();
        assert!(client.signals("https://api.example.com:443").is_none());
    }

    #[test]
    fn target_state_is_shared_per_target() {
        let client = Client::new().unwrap();
        let a = client.target_state("https://api.example.com:443");
        let b = client.target_state("https://api.example.com:443");
        assert!(Arc::ptr_eq(&a, &b));
        let other = client.target_state("https://other.example.com:443");
        assert!(!Arc::ptr_eq(&a, &other));
    }
}
