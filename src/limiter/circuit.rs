// =============================================================================
// Circuit Breaker — per-provider failure isolation
// =============================================================================
//
// State machine:
//
//   CLOSED ──(failure_threshold consecutive failures)──▶ OPEN
//   OPEN   ──(cooldown elapsed)──▶ HALF-OPEN
//   HALF-OPEN ──(success_threshold consecutive successes)──▶ CLOSED
//   HALF-OPEN ──(any failure)──▶ OPEN
//
// The open-state cooldown is supplied per trip by the caller — the provider
// limiter derives it from daily-budget utilization, so a nearly exhausted
// provider cools down for longer.
// =============================================================================

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::errors::ScanError;

/// Externally observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    open_until: Option<Instant>,
}

pub struct CircuitBreaker {
    venue: String,
    failure_threshold: u32,
    success_threshold: u32,
    /// Upper bound on any single cooldown.
    max_cooldown: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(
        venue: impl Into<String>,
        failure_threshold: u32,
        success_threshold: u32,
        max_cooldown: Duration,
    ) -> Self {
        Self {
            venue: venue.into(),
            failure_threshold: failure_threshold.max(1),
            success_threshold: success_threshold.max(1),
            max_cooldown,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                open_until: None,
            }),
        }
    }

    /// Gate a request. `Ok` in closed or half-open state; `CircuitOpen` with
    /// the remaining cooldown while open. An open breaker whose cooldown has
    /// elapsed transitions to half-open and admits the probe.
    pub fn preflight(&self) -> Result<(), ScanError> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let until = inner.open_until.unwrap_or_else(Instant::now);
                let now = Instant::now();
                if now >= until {
                    info!(venue = %self.venue, "circuit half-open, admitting probe");
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_successes = 0;
                    Ok(())
                } else {
                    Err(ScanError::CircuitOpen {
                        venue: self.venue.clone(),
                        cooldown_ms: until.duration_since(now).as_millis() as u64,
                    })
                }
            }
        }
    }

    /// Record a successful request.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.success_threshold {
                    info!(venue = %self.venue, "circuit closed after successful probes");
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.half_open_successes = 0;
                    inner.open_until = None;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed request. `cooldown` is how long to stay open if this
    /// failure trips (or re-trips) the breaker.
    pub fn record_failure(&self, cooldown: Duration) {
        let cooldown = cooldown.min(self.max_cooldown);
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    warn!(
                        venue = %self.venue,
                        failures = inner.consecutive_failures,
                        ?cooldown,
                        "circuit opened"
                    );
                    inner.state = CircuitState::Open;
                    inner.open_until = Some(Instant::now() + cooldown);
                }
            }
            CircuitState::HalfOpen => {
                warn!(venue = %self.venue, ?cooldown, "probe failed, circuit re-opened");
                inner.state = CircuitState::Open;
                inner.half_open_successes = 0;
                inner.open_until = Some(Instant::now() + cooldown);
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }
}
