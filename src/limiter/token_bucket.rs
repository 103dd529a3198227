// =============================================================================
// Token Bucket — per-provider request admission
// =============================================================================
//
// Classic token bucket: `rate` tokens per second refilled continuously up to
// a `burst` capacity. Admission is FIFO across tasks because waiters queue on
// a fair async mutex and hold it through their sleep; a later arrival can
// never overtake an earlier one.
//
// Upstream `Retry-After` handling can temporarily lower the effective refill
// rate (e.g. to 0.5 r/s); the provider default is restored automatically once
// the override window passes.
// =============================================================================

use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::ScanError;

/// Longest a caller will queue for a token before being told to back off.
const MAX_ADMISSION_WAIT: Duration = Duration::from_secs(10);

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Per-provider token bucket with burst capacity and a temporary rate
/// override channel.
pub struct TokenBucket {
    venue: String,
    default_rate: f64,
    capacity: f64,
    state: Mutex<BucketState>,
    /// `(rate, until)` — active while `until` is in the future.
    rate_override: SyncMutex<Option<(f64, Instant)>>,
}

impl TokenBucket {
    pub fn new(venue: impl Into<String>, rate: f64, burst: u32) -> Self {
        let capacity = (burst as f64).max(rate);
        Self {
            venue: venue.into(),
            default_rate: rate,
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            rate_override: SyncMutex::new(None),
        }
    }

    /// The refill rate currently in force.
    pub fn effective_rate(&self) -> f64 {
        let mut guard = self.rate_override.lock();
        if let Some((rate, until)) = *guard {
            if Instant::now() < until {
                return rate;
            }
            *guard = None;
        }
        self.default_rate
    }

    /// Lower the refill rate to `rate` for `duration`, then restore the
    /// provider default.
    pub fn set_rate_override(&self, rate: f64, duration: Duration) {
        debug!(venue = %self.venue, rate, ?duration, "token rate override applied");
        *self.rate_override.lock() = Some((rate, Instant::now() + duration));
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.effective_rate()).min(self.capacity);
        state.last_refill = now;
    }

    /// Take a token if one is available right now.
    pub async fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Wait for a token, FIFO. Fails with `RateLimited` when the projected
    /// wait exceeds [`MAX_ADMISSION_WAIT`], or `CancelledOrTimeout` when the
    /// scan context is cancelled while queued.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), ScanError> {
        let mut state = self.state.lock().await;
        self.refill(&mut state);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            return Ok(());
        }

        let rate = self.effective_rate();
        let deficit = 1.0 - state.tokens;
        let wait = Duration::from_secs_f64(deficit / rate.max(1e-9));

        if wait > MAX_ADMISSION_WAIT {
            return Err(ScanError::RateLimited {
                venue: self.venue.clone(),
                retry_after_ms: wait.as_millis() as u64,
            });
        }

        // Sleeping while holding the lock is what serialises admission FIFO.
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = cancel.cancelled() => return Err(ScanError::CancelledOrTimeout),
        }

        self.refill(&mut state);
        state.tokens = (state.tokens - 1.0).max(0.0);
        Ok(())
    }
}
