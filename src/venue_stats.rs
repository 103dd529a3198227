// =============================================================================
// Execution Quality Tracker — rolling per-venue fill statistics
// =============================================================================
//
// Process-wide state, mutated only under this tracker's exclusive lock.
// Every recorded execution is classified by absolute slippage:
//
//   good        ≤ 10 bps
//   acceptable  ≤ 30 bps
//   bad         >  30 bps
//
// A bad fill resets the consecutive-good counter. A venue is flagged
// tightened after two consecutive bad fills, or once its average slippage
// exceeds 25 bps over at least five executions; eight consecutive good fills
// clear the flag. The microstructure gate consults the flag and halves its
// spread ceiling for tightened venues.
// =============================================================================

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Slippage classification boundaries (bps).
const GOOD_SLIPPAGE_BPS: f64 = 10.0;
const ACCEPTABLE_SLIPPAGE_BPS: f64 = 30.0;

/// Tighten after this many consecutive bad fills...
const TIGHTEN_CONSECUTIVE_BAD: u32 = 2;
/// ...or when average slippage exceeds this over enough fills.
const TIGHTEN_AVG_SLIPPAGE_BPS: f64 = 25.0;
const TIGHTEN_MIN_EXECUTIONS: u64 = 5;
/// Consecutive good fills required to clear the flag.
const UNTIGHTEN_CONSECUTIVE_GOOD: u32 = 8;

/// Quality bucket for one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionQuality {
    Good,
    Acceptable,
    Bad,
}

impl ExecutionQuality {
    fn classify(slippage_bps: f64) -> Self {
        let abs = slippage_bps.abs();
        if abs <= GOOD_SLIPPAGE_BPS {
            Self::Good
        } else if abs <= ACCEPTABLE_SLIPPAGE_BPS {
            Self::Acceptable
        } else {
            Self::Bad
        }
    }
}

/// Rolling counters for one venue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VenueStats {
    pub total_executions: u64,
    pub good: u64,
    pub acceptable: u64,
    pub bad: u64,
    pub consecutive_good: u32,
    consecutive_bad: u32,
    pub avg_slippage_bps: f64,
    pub worst_slippage_bps: f64,
    pub last_execution_ms: i64,
    pub tightened: bool,
    pub tightened_at_ms: Option<i64>,
}

/// Process-wide execution quality state.
#[derive(Default)]
pub struct ExecutionQualityTracker {
    stats: Mutex<HashMap<String, VenueStats>>,
}

impl ExecutionQualityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one execution for `venue`.
    pub fn record_execution(&self, venue: &str, slippage_bps: f64, timestamp_ms: i64) {
        let quality = ExecutionQuality::classify(slippage_bps);
        let mut stats = self.stats.lock();
        let entry = stats.entry(venue.to_string()).or_default();

        entry.total_executions += 1;
        entry.last_execution_ms = timestamp_ms;

        // Cumulative mean keeps the rolling average cheap.
        let n = entry.total_executions as f64;
        entry.avg_slippage_bps += (slippage_bps.abs() - entry.avg_slippage_bps) / n;
        entry.worst_slippage_bps = entry.worst_slippage_bps.max(slippage_bps.abs());

        match quality {
            ExecutionQuality::Good => {
                entry.good += 1;
                entry.consecutive_good += 1;
                entry.consecutive_bad = 0;
            }
            ExecutionQuality::Acceptable => {
                entry.acceptable += 1;
                entry.consecutive_good += 1;
                entry.consecutive_bad = 0;
            }
            ExecutionQuality::Bad => {
                entry.bad += 1;
                entry.consecutive_good = 0;
                entry.consecutive_bad += 1;
            }
        }

        debug!(
            venue,
            slippage_bps = format!("{:.1}", slippage_bps),
            quality = ?quality,
            "execution recorded"
        );

        // Tighten / relax transitions.
        if !entry.tightened {
            let by_streak = entry.consecutive_bad >= TIGHTEN_CONSECUTIVE_BAD;
            let by_average = entry.total_executions >= TIGHTEN_MIN_EXECUTIONS
                && entry.avg_slippage_bps > TIGHTEN_AVG_SLIPPAGE_BPS;
            if by_streak || by_average {
                entry.tightened = true;
                entry.tightened_at_ms = Some(timestamp_ms);
                warn!(
                    venue,
                    avg_slippage_bps = format!("{:.1}", entry.avg_slippage_bps),
                    consecutive_bad = entry.consecutive_bad,
                    "venue tightened — execution quality degraded"
                );
            }
        } else if entry.consecutive_good >= UNTIGHTEN_CONSECUTIVE_GOOD {
            entry.tightened = false;
            entry.tightened_at_ms = None;
            info!(venue, "venue tightening cleared after sustained good fills");
        }
    }

    /// Whether the venue currently has the tightened flag.
    pub fn is_tightened(&self, venue: &str) -> bool {
        self.stats
            .lock()
            .get(venue)
            .map(|s| s.tightened)
            .unwrap_or(false)
    }

    pub fn stats_for(&self, venue: &str) -> Option<VenueStats> {
        self.stats.lock().get(venue).cloned()
    }

    /// Serialisable snapshot of every venue.
    pub fn snapshot(&self) -> HashMap<String, VenueStats> {
        self.stats.lock().clone()
    }
}
