// =============================================================================
// Shared types used across the Borealis scanner
// =============================================================================

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Regime
// ---------------------------------------------------------------------------

/// Market regime tag, supplied externally per scan request.
///
/// The scanner does not detect regimes itself; the tag selects the active
/// weight vector and the guard profiles. The alternate naming scheme
/// (`calm` / `normal` / `volatile`) is accepted on deserialisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    /// Persistent directional market — momentum carries further.
    #[serde(alias = "calm")]
    Trending,
    /// Sideways chop — the default, most conservative weighting.
    #[serde(alias = "normal")]
    Choppy,
    /// Volatility expansion — quality and liquidity matter more.
    #[serde(alias = "volatile")]
    HighVol,
}

impl Regime {
    /// Trending-profile guards and the 7d momentum horizon are only
    /// considered in this regime.
    pub fn is_trending(self) -> bool {
        matches!(self, Self::Trending)
    }
}

impl Default for Regime {
    fn default() -> Self {
        Self::Choppy
    }
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trending => write!(f, "trending"),
            Self::Choppy => write!(f, "choppy"),
            Self::HighVol => write!(f, "high_vol"),
        }
    }
}

// ---------------------------------------------------------------------------
// Scan request / summary
// ---------------------------------------------------------------------------

fn default_max_symbols() -> usize {
    50
}

fn default_timeout_seconds() -> u64 {
    120
}

fn default_true() -> bool {
    true
}

/// A single scan invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    /// Free-form strategy tag carried through to the summary.
    #[serde(default)]
    pub strategy: String,

    /// Maximum number of symbols to scan after filtering (0 = no cap).
    #[serde(default = "default_max_symbols")]
    pub max_symbols: usize,

    /// Tier filter — empty means all tiers.
    #[serde(default)]
    pub tiers: Vec<String>,

    /// Venue filter — empty means any configured venue.
    #[serde(default)]
    pub exchanges: Vec<String>,

    /// Overall scan deadline in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Active market regime for this scan.
    #[serde(default)]
    pub regime: Regime,

    /// Minimum composite score for a candidate to be selected.
    #[serde(default)]
    pub min_score: f64,

    /// When true, selected candidates are not recorded into the execution
    /// quality tracker.
    #[serde(default = "default_true")]
    pub dry_run: bool,
}

impl Default for ScanRequest {
    fn default() -> Self {
        Self {
            strategy: "momentum".to_string(),
            max_symbols: default_max_symbols(),
            tiers: Vec::new(),
            exchanges: Vec::new(),
            timeout_seconds: default_timeout_seconds(),
            regime: Regime::Choppy,
            min_score: 0.0,
            dry_run: true,
        }
    }
}

/// Per-venue fetch counters accumulated over one scan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VenueFetchStats {
    pub attempted: u32,
    pub succeeded: u32,
    pub failed: u32,
}

/// Aggregate outcome of one scan, returned alongside the candidate list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSummary {
    /// Unique id for this scan run.
    pub scan_id: String,

    /// Strategy tag echoed from the request.
    pub strategy: String,

    /// Regime the scan ran under.
    pub regime: Regime,

    /// Symbols in the resolved universe.
    pub total_symbols: usize,

    /// Symbols that produced a complete factor row.
    pub successful_scans: usize,

    /// Candidates that passed gating and the minimum score.
    pub candidates_found: usize,

    /// Wall-clock duration of the scan.
    pub duration_ms: u64,

    /// Fetch counters per venue.
    pub per_venue_stats: HashMap<String, VenueFetchStats>,

    /// Scanned symbol counts per tier.
    pub per_tier_counts: HashMap<String, u32>,

    /// Error counts keyed by [`crate::errors::ScanError::kind_tag`].
    pub per_error_counts: HashMap<String, u32>,

    /// Human-readable error lines for dropped symbols.
    pub errors: Vec<String>,
}
