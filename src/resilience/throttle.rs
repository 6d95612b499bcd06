//! Per-upstream-target throttle: bounds concurrent in-flight requests and
//! requests per time window, shared by every caller addressing that target.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Throttle limits for one upstream target.
///
/// Both gates are optional; an unset gate admits freely.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Maximum concurrent in-flight requests.
    pub max_in_flight: Option<usize>,
    /// Maximum admissions per `window`.
    pub max_per_window: Option<u32>,
    /// Length of the admission window.
    pub window: Duration,
}

impl ThrottleConfig {
    pub const fn unlimited() -> Self {
        Self {
            max_in_flight: None,
            max_per_window: None,
            window: Duration::from_secs(1),
        }
    }

    pub const fn max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = Some(max_in_flight);
        self
    }

    pub const fn max_per_window(mut self, max_per_window: u32) -> Self {
        self.max_per_window = Some(max_per_window);
        self
    }

    pub const fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// Why an acquisition gave up before capacity became available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ThrottleError {
    #[error("deadline elapsed while waiting for throttle capacity")]
    DeadlineExceeded,
    #[error("request cancelled while waiting for throttle capacity")]
    Cancelled,
}

#[derive(Debug)]
struct WindowState {
    started_at: Instant,
    admitted: u32,
}

/// Shared admission gate for one upstream target.
///
/// The concurrency gate is a semaphore, so waiters are admitted FIFO; window
/// waiters are woken at rollover and re-admitted in lock order, which makes
/// overall admission approximately FIFO but not strictly ordered.
#[derive(Debug)]
pub struct Throttle {
    cfg: ThrottleConfig,
    in_flight: Option<Arc<Semaphore>>,
    window: Option<Mutex<WindowState>>,
}

/// Scoped admission: capacity is returned when the permit drops, regardless
/// of how the attempt ends. The window count is an admission count and is
/// deliberately not returned.
#[derive(Debug)]
pub struct ThrottlePermit {
    _in_flight: Option<OwnedSemaphorePermit>,
}

impl Throttle {
    pub fn new(cfg: ThrottleConfig) -> Self {
        let in_flight = cfg
            .max_in_flight
            .map(|n| Arc::new(Semaphore::new(n.max(1))));
        let window = cfg.max_per_window.map(|_| {
            Mutex::new(WindowState {
                started_at: Instant::now(),
                admitted: 0,
            })
        });
        Self {
            cfg,
            in_flight,
            window,
        }
    }

    /// Wait for admission, bounded by the request's deadline and cancellation
    /// token. On deadline or cancel no capacity is consumed and no network
    /// call may be issued by the caller.
    pub async fn acquire(
        &self,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
    ) -> Result<ThrottlePermit, ThrottleError> {
        let in_flight = match &self.in_flight {
            Some(sem) => {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(ThrottleError::Cancelled),
                    _ = sleep_until_opt(deadline) => return Err(ThrottleError::DeadlineExceeded),
                    permit = sem.clone().acquire_owned() => {
                        // The semaphore is never closed while the throttle lives.
                        permit.map_err(|_| ThrottleError::Cancelled)?
                    }
                };
                Some(permit)
            }
            None => None,
        };

        if self.window.is_some() {
            loop {
                match self.try_admit_window() {
                    None => break,
                    Some(wait) => {
                        debug!(wait_ms = wait.as_millis() as u64, "throttle window full");
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return Err(ThrottleError::Cancelled),
                            _ = sleep_until_opt(deadline) => {
                                return Err(ThrottleError::DeadlineExceeded)
                            }
                            _ = tokio::time::sleep(wait) => {}
                        }
                    }
                }
            }
        }

        Ok(ThrottlePermit {
            _in_flight: in_flight,
        })
    }

    /// `None` when admitted; otherwise the time until the window rolls over.
    fn try_admit_window(&self) -> Option<Duration> {
        let state = self.window.as_ref()?;
        let limit = self.cfg.max_per_window.unwrap_or(u32::MAX).max(1);
        let window = self.cfg.window.max(Duration::from_millis(1));

        let mut st = state.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(st.started_at);
        if elapsed >= window {
            st.started_at = now;
            st.admitted = 0;
        }
        if st.admitted < limit {
            st.admitted = st.admitted.saturating_add(1);
            None
        } else {
            Some(window.saturating_sub(now.saturating_duration_since(st.started_at)))
        }
    }

    /// Currently available in-flight capacity, if a concurrency gate is set.
    pub fn available_in_flight(&self) -> Option<usize> {
        self.in_flight.as_ref().map(|s| s.available_permits())
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
