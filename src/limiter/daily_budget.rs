// =============================================================================
// Daily Budget — hard request cap per provider, reset at a UTC hour
// =============================================================================
//
// Each provider carries an integer daily cap. The accounting window starts at
// the configured UTC hour (default 00:00) and rolls forward exactly 24 h
// later. Crossing the warn threshold logs once per window; exhausting the cap
// returns `BudgetExhausted`, which the fabric treats as fatal for the venue
// until the next reset.
//
// Counters can also be synchronised from upstream `X-RateLimit-Used` headers
// so that out-of-process spend is reflected locally.
// =============================================================================

use chrono::{DateTime, Datelike, Duration as ChronoDuration, TimeZone, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::errors::ScanError;

struct BudgetState {
    used: u32,
    window_start: DateTime<Utc>,
    warned: bool,
}

/// Daily request budget for one provider.
pub struct DailyBudget {
    venue: String,
    cap: u32,
    reset_hour_utc: u32,
    warn_threshold: f64,
    state: Mutex<BudgetState>,
}

impl DailyBudget {
    pub fn new(venue: impl Into<String>, cap: u32, reset_hour_utc: u32, warn_threshold: f64) -> Self {
        Self::new_at(venue, cap, reset_hour_utc, warn_threshold, Utc::now())
    }

    pub(crate) fn new_at(
        venue: impl Into<String>,
        cap: u32,
        reset_hour_utc: u32,
        warn_threshold: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            venue: venue.into(),
            cap,
            reset_hour_utc,
            warn_threshold,
            state: Mutex::new(BudgetState {
                used: 0,
                window_start: window_start_for(now, reset_hour_utc),
                warned: false,
            }),
        }
    }

    /// Spend one request from the budget, rolling the window first.
    pub fn try_spend(&self) -> Result<(), ScanError> {
        self.try_spend_at(Utc::now())
    }

    pub(crate) fn try_spend_at(&self, now: DateTime<Utc>) -> Result<(), ScanError> {
        let mut state = self.state.lock();
        self.roll(&mut state, now);

        if state.used >= self.cap {
            return Err(ScanError::BudgetExhausted {
                venue: self.venue.clone(),
            });
        }

        state.used += 1;

        let utilization = state.used as f64 / self.cap as f64;
        if !state.warned && utilization >= self.warn_threshold {
            state.warned = true;
            warn!(
                venue = %self.venue,
                used = state.used,
                cap = self.cap,
                utilization = format!("{:.2}", utilization),
                "daily budget crossed warn threshold"
            );
        }

        Ok(())
    }

    /// Fraction of the daily cap already spent, in [0, 1].
    pub fn utilization(&self) -> f64 {
        self.utilization_at(Utc::now())
    }

    pub(crate) fn utilization_at(&self, now: DateTime<Utc>) -> f64 {
        let mut state = self.state.lock();
        self.roll(&mut state, now);
        state.used as f64 / self.cap as f64
    }

    /// Requests spent in the current window. Pure read — the window rolls
    /// on the next spend.
    pub fn used(&self) -> u32 {
        self.state.lock().used
    }

    /// Synchronise the local counter with an upstream `X-RateLimit-Used`
    /// value. Only ever moves the counter forward.
    pub fn sync_used(&self, upstream_used: u32) {
        let mut state = self.state.lock();
        if upstream_used > state.used {
            debug!(
                venue = %self.venue,
                local = state.used,
                upstream = upstream_used,
                "budget counter synced from response headers"
            );
            state.used = upstream_used.min(self.cap);
        }
    }

    /// Start of the next accounting window.
    pub fn next_reset(&self) -> DateTime<Utc> {
        let state = self.state.lock();
        state.window_start + ChronoDuration::hours(24)
    }

    fn roll(&self, state: &mut BudgetState, now: DateTime<Utc>) {
        if now >= state.window_start + ChronoDuration::hours(24) {
            debug!(venue = %self.venue, used = state.used, "daily budget window reset");
            state.used = 0;
            state.warned = false;
            state.window_start = window_start_for(now, self.reset_hour_utc);
        }
    }
}

/// Most recent instant at `reset_hour` UTC that is not after `now`.
fn window_start_for(now: DateTime<Utc>, reset_hour: u32) -> DateTime<Utc> {
    let candidate = Utc
        .with_ymd_and_hms(now.year(), now.month(), now.day(), reset_hour, 0, 0)
        .single()
        .expect("valid UTC date");
    if candidate <= now {
        candidate
    } else {
        candidate - ChronoDuration::hours(24)
    }
}
