// =============================================================================
// Attribution — per-record provenance for every candidate
// =============================================================================
//
// Each candidate carries where its data came from (venue, cache tier, fetch
// latency, sequence, source tag), the factor row snapshot, the score
// breakdown, and the gate outcomes. Attribution is append-only during a scan
// and serialised only after the scan completes.
// =============================================================================

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::CacheTier;
use crate::gates::CascadeResult;
use crate::pipeline::orthogonal::OrthogonalRow;
use crate::pipeline::weights::ScoreBreakdown;

/// Provenance of one fetched record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchAttribution {
    /// Venue that served the data.
    pub venue: String,

    /// Cache tier that satisfied the read; `None` means a live fetch (miss).
    pub cache_tier: Option<CacheTier>,

    /// Round-trip latency of the live fetch; 0 for cache hits.
    pub latency_ms: u64,

    /// Exchange sequence number of the snapshot.
    pub sequence: u64,

    /// Human-readable origin tag, e.g. `kraken_l2_14:03:22`.
    pub source_tag: String,
}

impl FetchAttribution {
    pub fn tier_label(&self) -> &'static str {
        match self.cache_tier {
            Some(CacheTier::Hot) => "hot",
            Some(CacheTier::Warm) => "warm",
            Some(CacheTier::Cold) => "cold",
            None => "miss",
        }
    }
}

/// Build the `{venue}_{kind}_{HH:MM:SS}` source tag from a wall-clock
/// timestamp in milliseconds.
pub fn source_tag(venue: &str, kind: &str, timestamp_ms: i64) -> String {
    let time = Utc
        .timestamp_millis_opt(timestamp_ms)
        .single()
        .unwrap_or_else(Utc::now);
    format!("{venue}_{kind}_{}", time.format("%H:%M:%S"))
}

/// One venue attempt made while routing a fetch, successful or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub venue: String,
    pub ok: bool,
    /// Error kind tag for failed attempts.
    pub error_kind: Option<String>,
}

/// A fully attributed, scored, gated scan result for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub symbol: String,

    /// Regime-weighted composite score.
    pub composite_score: f64,

    /// 1-based position after the deterministic sort.
    pub rank: u32,

    /// Passed every gate and cleared the minimum score.
    pub selected: bool,

    /// Orthogonalized factor row snapshot.
    pub row: OrthogonalRow,

    /// Per-factor contributions to the composite.
    pub breakdown: ScoreBreakdown,

    /// Gate cascade outcome (evaluated gates only; the cascade
    /// short-circuits on the first block).
    pub gates: CascadeResult,

    /// Data provenance for the order book behind this record.
    pub attribution: FetchAttribution,
}
