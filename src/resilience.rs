//! Circuit breaker isolating the backing store
//!
//! A three-state failure isolator: closed (normal operation), open (requests
//! rejected without touching the upstream), half-open (a single serialized
//! probe). One breaker guards one logical upstream; all coordinator store
//! calls pass through it.

use std::future::Future;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::BreakerConfig;
use crate::metrics;

/// Error surfaced by a breaker-protected call.
#[derive(Error, Debug)]
pub enum BreakerError<E> {
    /// The breaker is open; the upstream was not invoked.
    #[error("circuit breaker is open")]
    Open,

    /// The upstream was invoked and failed.
    #[error("upstream operation failed")]
    Upstream(E),
}

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Operations execute normally; failures are counted.
    Closed,
    /// Operations are rejected immediately.
    Open,
    /// A single probe operation is in flight.
    HalfOpen,
}

impl BreakerState {
    fn as_str(self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Process-wide circuit breaker around the backing store.
///
/// State transitions happen atomically under a single guard. Callers never
/// see raw counters; the only surface is [`try_call`](Self::try_call).
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

enum Admission {
    Normal,
    Probe,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Run `operation` under breaker protection.
    ///
    /// While open, returns [`BreakerError::Open`] without invoking the
    /// operation, except that the first call after `recovery_timeout` runs as
    /// the half-open probe. Concurrent callers during a probe are rejected.
    pub async fn try_call<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let admission = self.admit()?;
        match operation().await {
            Ok(value) => {
                self.on_success(&admission);
                Ok(value)
            }
            Err(error) => {
                self.on_failure(&admission);
                Err(BreakerError::Upstream(error))
            }
        }
    }

    /// Current state, for observability surfaces.
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    fn admit<E>(&self) -> Result<Admission, BreakerError<E>> {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => Ok(Admission::Normal),
            BreakerState::HalfOpen => Err(BreakerError::Open),
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.recovery_timeout() {
                    Self::transition(&mut inner, BreakerState::HalfOpen);
                    Ok(Admission::Probe)
                } else {
                    Err(BreakerError::Open)
                }
            }
        }
    }

    fn on_success(&self, admission: &Admission) {
        let mut inner = self.inner.lock();
        match admission {
            Admission::Probe => {
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                Self::transition(&mut inner, BreakerState::Closed);
            }
            Admission::Normal => {
                inner.consecutive_failures = 0;
            }
        }
    }

    fn on_failure(&self, admission: &Admission) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures += 1;
        match admission {
            Admission::Probe => {
                inner.opened_at = Some(Instant::now());
                Self::transition(&mut inner, BreakerState::Open);
            }
            Admission::Normal => {
                if inner.state == BreakerState::Closed
                    && inner.consecutive_failures >= self.config.failure_threshold
                {
                    inner.opened_at = Some(Instant::now());
                    Self::transition(&mut inner, BreakerState::Open);
                }
            }
        }
    }

    fn transition(inner: &mut BreakerInner, to: BreakerState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        metrics::record_breaker_transition(from.as_str(), to.as_str());
        match to {
            BreakerState::Open => {
                warn!(failures = inner.consecutive_failures, "circuit breaker opened")
            }
            BreakerState::HalfOpen => debug!("circuit breaker half-open, probing upstream"),
            BreakerState::Closed => debug!("circuit breaker closed"),
        }
    }
}
