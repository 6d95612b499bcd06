//! Circuit breaker: per-upstream-target failure isolation.
//!
//! The state machine is an explicit tagged variant with a total transition
//! function. Transitions are driven solely by classified outcome feedback
//! from the retry executor, never by raw transport errors.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

/// Breaker thresholds for one upstream target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Failure-rate threshold over the rolling window, `0.0..=1.0`.
    pub failure_rate_threshold: f64,
    /// Minimum outcomes observed before the rate can trip the breaker,
    /// so a handful of early errors does not open it.
    pub min_samples: usize,
    /// Number of most-recent outcomes kept in the rolling window.
    pub sample_window: usize,
    /// How long the breaker stays open after tripping.
    pub open_timeout: Duration,
    /// Cap for the doubled open timeout on consecutive re-opens.
    pub max_open_timeout: Duration,
    /// Probes admitted in half-open; the same count of consecutive probe
    /// successes closes the breaker.
    pub half_open_probes: usize,
}

impl BreakerConfig {
    pub const fn standard() -> Self {
        Self {
            failure_rate_threshold: 0.5,
            min_samples: 10,
            sample_window: 32,
            open_timeout: Duration::from_secs(10),
            max_open_timeout: Duration::from_secs(120),
            half_open_probes: 2,
        }
    }

    pub fn failure_rate_threshold(mut self, threshold: f64) -> Self {
        self.failure_rate_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub const fn min_samples(mut self, min_samples: usize) -> Self {
        self.min_samples = min_samples;
        self
    }

    pub const fn sample_window(mut self, sample_window: usize) -> Self {
        self.sample_window = sample_window;
        self
    }

    pub const fn open_timeout(mut self, open_timeout: Duration) -> Self {
        self.open_timeout = open_timeout;
        self
    }

    pub const fn max_open_timeout(mut self, max_open_timeout: Duration) -> Self {
        self.max_open_timeout = max_open_timeout;
        self
    }

    pub const fn half_open_probes(mut self, half_open_probes: usize) -> Self {
        self.half_open_probes = half_open_probes;
        self
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self::standard()
    }
}

#[derive(Debug)]
enum BreakerState {
    Closed {
        /// Rolling window of recent outcomes; `true` marks a failure.
        outcomes: VecDeque<bool>,
    },
    Open {
        until: Instant,
    },
    HalfOpen {
        probes_in_flight: usize,
        successes: usize,
    },
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    /// Consecutive opens without an intervening close; drives the doubled
    /// open timeout.
    open_streak: u32,
}

/// Point-in-time view of a breaker, for signals and diagnostics.
#[derive(Debug, Clone)]
pub struct BreakerSnapshot {
    pub state: &'static str,
    /// Remaining open time, if currently open.
    pub open_remaining: Option<Duration>,
    /// Failure rate over the rolling window, if currently closed.
    pub failure_rate: Option<f64>,
    pub open_streak: u32,
}

/// Circuit breaker shared by all requests to one upstream target.
#[derive(Debug)]
pub struct CircuitBreaker {
    cfg: BreakerConfig,
    inner: Mutex<Inner>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassKind {
    Closed,
    Probe,
}

/// Grant to issue one attempt through the breaker.
///
/// The holder must report the classified outcome via [`Passage::record_success`]
/// or [`Passage::record_failure`]. Dropping an unrecorded probe releases its
/// half-open slot without counting an outcome, so a cancelled attempt never
/// skews the health estimate.
#[derive(Debug)]
pub struct Passage {
    breaker: Arc<CircuitBreaker>,
    kind: PassKind,
    recorded: bool,
}

impl Passage {
    pub fn record_success(mut self) {
        self.recorded = true;
        self.breaker.on_outcome(self.kind, true);
    }

    pub fn record_failure(mut self) {
        self.recorded = true;
        self.breaker.on_outcome(self.kind, false);
    }
}

impl Drop for Passage {
    fn drop(&mut self) {
        if !self.recorded && self.kind == PassKind::Probe {
            self.breaker.abandon_probe();
        }
    }
}

impl CircuitBreaker {
    pub fn new(cfg: BreakerConfig) -> Self {
        Self {
            cfg,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed {
                    outcomes: VecDeque::new(),
                },
                open_streak: 0,
            }),
        }
    }

    /// Ask to issue one attempt. `Err` carries the remaining open time; the
    /// caller must fail the attempt as `CircuitOpen` without any network
    /// activity.
    pub fn try_pass(self: &Arc<Self>) -> Result<Passage, Duration> {
        let mut inner = self.lock();
        let now = Instant::now();
        match &mut inner.state {
            BreakerState::Closed { .. } => Ok(self.passage(PassKind::Closed)),
            BreakerState::Open { until } => {
                let remaining = until.saturating_duration_since(now);
                if remaining > Duration::ZERO {
                    return Err(remaining);
                }
                // Open timer elapsed: admit the first probe.
                inner.state = BreakerState::HalfOpen {
                    probes_in_flight: 1,
                    successes: 0,
                };
                Ok(self.passage(PassKind::Probe))
            }
            BreakerState::HalfOpen {
                probes_in_flight, ..
            } => {
                if *probes_in_flight >= self.cfg.half_open_probes.max(1) {
                    return Err(Duration::ZERO);
                }
                *probes_in_flight += 1;
                Ok(self.passage(PassKind::Probe))
            }
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        let now = Instant::now();
        match &inner.state {
            BreakerState::Closed { outcomes } => BreakerSnapshot {
                state: "closed",
                open_remaining: None,
                failure_rate: Some(failure_rate(outcomes)),
                open_streak: inner.open_streak,
            },
            BreakerState::Open { until } => BreakerSnapshot {
                state: "open",
                open_remaining: Some(until.saturating_duration_since(now)),
                failure_rate: None,
                open_streak: inner.open_streak,
            },
            BreakerState::HalfOpen { .. } => BreakerSnapshot {
                state: "half_open",
                open_remaining: None,
                failure_rate: None,
                open_streak: inner.open_streak,
            },
        }
    }

    fn passage(self: &Arc<Self>, kind: PassKind) -> Passage {
        Passage {
            breaker: Arc::clone(self),
            kind,
            recorded: false,
        }
    }

    fn on_outcome(&self, kind: PassKind, success: bool) {
        let mut inner = self.lock();
        match (&mut inner.state, kind) {
            (BreakerState::Closed { outcomes }, PassKind::Closed) => {
                outcomes.push_back(!success);
                while outcomes.len() > self.cfg.sample_window.max(1) {
                    outcomes.pop_front();
                }
                if outcomes.len() >= self.cfg.min_samples.max(1)
                    && failure_rate(outcomes) >= self.cfg.failure_rate_threshold
                {
                    self.trip(&mut inner);
                }
            }
            (
                BreakerState::HalfOpen {
                    probes_in_flight,
                    successes,
                },
                PassKind::Probe,
            ) => {
                *probes_in_flight = probes_in_flight.saturating_sub(1);
                if success {
                    *successes += 1;
                    if *successes >= self.cfg.half_open_probes.max(1) {
                        info!("circuit breaker closed after successful probes");
                        inner.state = BreakerState::Closed {
                            outcomes: VecDeque::new(),
                        };
                        inner.open_streak = 0;
                    }
                } else {
                    self.trip(&mut inner);
                }
            }
            // The breaker moved on while this attempt was in flight
            // (e.g. tripped by a concurrent request); stale feedback is
            // intentionally dropped.
            _ => {}
        }
    }

    fn abandon_probe(&self) {
        let mut inner = self.lock();
        if let BreakerState::HalfOpen {
            probes_in_flight, ..
        } = &mut inner.state
        {
            *probes_in_flight = probes_in_flight.saturating_sub(1);
        }
    }

    /// Transition to `Open`, doubling the timeout per consecutive open.
    fn trip(&self, inner: &mut Inner) {
        inner.open_streak = inner.open_streak.saturating_add(1);
        let factor = 1u32
            .checked_shl(inner.open_streak.saturating_sub(1))
            .unwrap_or(u32::MAX);
        let timeout = self
            .cfg
            .open_timeout
            .saturating_mul(factor)
            .min(self.cfg.max_open_timeout);
        warn!(
            open_ms = timeout.as_millis() as u64,
            open_streak = inner.open_streak,
            "circuit breaker opened"
        );
        inner.state = BreakerState::Open {
            until: Instant::now() + timeout,
        };
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn failure_rate(outcomes: &VecDeque<bool>) -> f64 {
    if outcomes.is_empty() {
        return 0.0;
    }
    let failures = outcomes.iter().filter(|&&f| f).count();
    failures as f64 / outcomes.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(cfg: BreakerConfig) -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(cfg))
    }

    fn trip_cfg() -> BreakerConfig {
        BreakerConfig::standard()
            .failure_rate_threshold(0.5)
            .min_samples(4)
            .sample_window(8)
            .open_timeout(Duration::from_secs(5))
            .half_open_probes(2)
    }

    fn record_failures(b: &Arc<CircuitBreaker>, n: usize) {
        for _ in 0..n {
            b.try_pass().unwrap().record_failure();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stays_closed_below_min_samples() {
        let b = breaker(trip_cfg());
        record_failures(&b, 3);
        assert!(b.try_pass().is_ok());
        assert_eq!(b.snapshot().state, "closed");
    }

    #[tokio::test(start_paused = true)]
    async fn opens_at_threshold_with_min_samples() {
        let b = breaker(trip_cfg());
        record_failures(&b, 4);
        let err = b.try_pass().unwrap_err();
        assert!(err > Duration::ZERO);
        assert_eq!(b.snapshot().state, "open");
    }

    #[tokio::test(start_paused = true)]
    async fn successes_keep_failure_rate_below_threshold() {
        let b = breaker(trip_cfg());
        // Alternate success/failure: rate stays at 0.5 of mixed outcomes,
        // but successes dilute the window before failures accumulate.
        for _ in 0..3 {
            b.try_pass().unwrap().record_success();
        }
        record_failures(&b, 2);
        // 2 failures out of 5 outcomes: 0.4 < 0.5 threshold.
        assert!(b.try_pass().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_after_timeout_then_closes_on_probe_successes() {
        let b = breaker(trip_cfg());
        record_failures(&b, 4);
        assert!(b.try_pass().is_err());

        tokio::time::advance(Duration::from_secs(6)).await;

        let p1 = b.try_pass().expect("first probe admitted");
        let p2 = b.try_pass().expect("second probe admitted");
        assert!(b.try_pass().is_err(), "probe concurrency is bounded");

        p1.record_success();
        p2.record_success();
        assert_eq!(b.snapshot().state, "closed");
        assert_eq!(b.snapshot().open_streak, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_failure_reopens_with_longer_timeout() {
        let b = breaker(trip_cfg());
        record_failures(&b, 4);
        let first_open = b.try_pass().unwrap_err();
        assert!(first_open <= Duration::from_secs(5));

        tokio::time::advance(Duration::from_secs(6)).await;
        b.try_pass().unwrap().record_failure();

        let snap = b.snapshot();
        assert_eq!(snap.state, "open");
        assert_eq!(snap.open_streak, 2);
        // Second open doubles the timeout.
        assert!(snap.open_remaining.unwrap() > Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_probe_releases_slot_without_outcome() {
        let b = breaker(trip_cfg().half_open_probes(1));
        record_failures(&b, 4);
        tokio::time::advance(Duration::from_secs(6)).await;

        let probe = b.try_pass().unwrap();
        assert!(b.try_pass().is_err());
        drop(probe);

        // Slot is free again and the breaker is still half-open.
        assert_eq!(b.snapshot().state, "half_open");
        let retry = b.try_pass().unwrap();
        retry.record_success();
        assert_eq!(b.snapshot().state, "closed");
    }

    #[tokio::test(start_paused = true)]
    async fn rolling_window_evicts_old_outcomes() {
        let b = breaker(trip_cfg().sample_window(4).min_samples(4));
        record_failures(&b, 2);
        for _ in 0..4 {
            b.try_pass().unwrap().record_success();
        }
        // Window now holds 4 successes; old failures evicted.
        let snap = b.snapshot();
        assert_eq!(snap.failure_rate, Some(0.0));
        assert!(b.try_pass().is_ok());
    }
}
