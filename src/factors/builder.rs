// =============================================================================
// Raw Factor Builder — technical / volume / quality / social composition
// =============================================================================
//
// Each non-momentum factor is a weighted composition of sub-signals remapped
// to [0, 100]; a missing sub-signal contributes its neutral midpoint (50)
// rather than poisoning the factor. MomentumCore stays in its natural
// percent units — it is the protected axis and is never rescaled.
//
// The reserved catalyst factor has no builder; its configured weight is
// folded into quality.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::errors::ScanError;
use crate::factors::{momentum_core, remap};
use crate::indicators::{ema, roc};
use crate::market_data::{MarketSeries, OrderBook};
use crate::types::Regime;

/// Raw (pre-orthogonalization) factor row for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFactorRow {
    pub symbol: String,
    pub timestamp_ms: i64,

    /// Protected momentum composite, percent units.
    pub momentum_core: f64,

    /// Trend / positioning / thrust composite, ~[0, 100].
    pub technical: f64,

    /// Volume surge and turnover composite, ~[0, 100].
    pub volume: f64,

    /// Market-cap, depth, and spread composite, ~[0, 100].
    pub quality: f64,

    /// Social activity, [0, 100].
    pub social: f64,
}

impl RawFactorRow {
    /// No NaN/Inf anywhere; composed factors within their documented range.
    pub fn validate(&self) -> Result<(), ScanError> {
        let fields = [
            ("momentum_core", self.momentum_core),
            ("technical", self.technical),
            ("volume", self.volume),
            ("quality", self.quality),
            ("social", self.social),
        ];
        for &(name, value) in &fields {
            if !value.is_finite() {
                return Err(ScanError::ValidationFailure(format!(
                    "{}: non-finite factor {name}",
                    self.symbol
                )));
            }
        }
        for (name, value) in &fields[1..] {
            if !(0.0..=100.0).contains(value) {
                return Err(ScanError::ValidationFailure(format!(
                    "{}: factor {name} = {value} outside [0, 100]",
                    self.symbol
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sub-signal weights
// ---------------------------------------------------------------------------

const TECHNICAL_TREND_W: f64 = 0.40;
const TECHNICAL_RSI_W: f64 = 0.35;
const TECHNICAL_THRUST_W: f64 = 0.25;

const VOLUME_SURGE_W: f64 = 0.60;
const VOLUME_TURNOVER_W: f64 = 0.40;

// Quality carries the reserved catalyst weight folded in.
const QUALITY_CAP_W: f64 = 0.50;
const QUALITY_DEPTH_W: f64 = 0.30;
const QUALITY_SPREAD_W: f64 = 0.20;

const NEUTRAL: f64 = 50.0;

/// Build the raw factor row for one symbol from its series and current
/// order book.
pub fn build_row(
    series: &MarketSeries,
    book: &OrderBook,
    regime: Regime,
    timestamp_ms: i64,
) -> Result<RawFactorRow, ScanError> {
    series.validate()?;

    let closes: Vec<f64> = series.hourly_candles.iter().map(|c| c.close).collect();

    // ── Technical ────────────────────────────────────────────────────────
    let trend = ema::ema_gap_pct(&closes)
        .map(|gap| remap(gap, -2.0, 2.0, 0.0, 100.0))
        .unwrap_or(NEUTRAL);
    let rsi_position = series
        .rsi_4h()
        .map(|rsi| remap(rsi, 30.0, 70.0, 0.0, 100.0))
        .unwrap_or(NEUTRAL);
    let thrust = roc::latest_roc(&closes, 24)
        .map(|r| remap(r, -10.0, 10.0, 0.0, 100.0))
        .unwrap_or(NEUTRAL);
    let technical =
        TECHNICAL_TREND_W * trend + TECHNICAL_RSI_W * rsi_position + TECHNICAL_THRUST_W * thrust;

    // ── Volume ───────────────────────────────────────────────────────────
    let baseline_volume = if series.daily_volume_usd.len() > 1 {
        let prior = &series.daily_volume_usd[..series.daily_volume_usd.len() - 1];
        prior.iter().sum::<f64>() / prior.len() as f64
    } else {
        series.volume_24h_usd
    };
    let surge = if baseline_volume > 0.0 {
        remap(series.volume_24h_usd / baseline_volume, 0.5, 3.0, 0.0, 100.0)
    } else {
        NEUTRAL
    };
    let turnover = series
        .market_cap_usd
        .filter(|&cap| cap > 0.0)
        .map(|cap| remap(series.volume_24h_usd / cap, 0.0, 0.5, 0.0, 100.0))
        .unwrap_or(NEUTRAL);
    let volume = VOLUME_SURGE_W * surge + VOLUME_TURNOVER_W * turnover;

    // ── Quality ──────────────────────────────────────────────────────────
    let cap_quality = series
        .market_cap_usd
        .filter(|&cap| cap > 0.0)
        .map(|cap| remap(cap.log10(), 7.0, 11.0, 0.0, 100.0))
        .unwrap_or(NEUTRAL);
    let depth_quality = remap(book.depth_usd_within_2pct(), 0.0, 500_000.0, 0.0, 100.0);
    let spread_quality = book
        .spread_bps()
        .map(|bps| remap(bps, 100.0, 0.0, 0.0, 100.0))
        .unwrap_or(0.0);
    let quality = QUALITY_CAP_W * cap_quality
        + QUALITY_DEPTH_W * depth_quality
        + QUALITY_SPREAD_W * spread_quality;

    // ── Social ───────────────────────────────────────────────────────────
    let social = if series.social_score.is_finite() {
        series.social_score.clamp(0.0, 100.0)
    } else {
        return Err(ScanError::ValidationFailure(format!(
            "{}: non-finite social score",
            series.symbol
        )));
    };

    // ── Momentum (protected) ─────────────────────────────────────────────
    let momentum = momentum_core(series, regime)?;

    let row = RawFactorRow {
        symbol: series.symbol.clone(),
        timestamp_ms,
        momentum_core: momentum,
        technical,
        volume,
        quality,
        social,
    };
    row.validate()?;

    trace!(
        symbol = %row.symbol,
        momentum = format!("{:.2}", row.momentum_core),
        technical = format!("{:.1}", row.technical),
        volume = format!("{:.1}", row.volume),
        quality = format!("{:.1}", row.quality),
        social = format!("{:.1}", row.social),
        "raw factor row built"
    );

    Ok(row)
}
