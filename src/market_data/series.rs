// =============================================================================
// Market Series — per-symbol history consumed by the factor builder and gates
// =============================================================================
//
// A `MarketSeries` bundles everything the factor pipeline needs for one
// symbol: closed hourly bars (latest last), daily USD volumes, pre-computed
// indicator values where a venue supplies them, and the slow-moving scalars
// (market cap, 24h volume, social score, VADR).
//
// Return horizons are expressed in hours against the hourly bar series; the
// 7d horizon (168h) is only consulted in the trending regime.
// =============================================================================

use async_trait::async_trait;

use crate::config::SymbolEntry;
use crate::errors::ScanError;
use crate::indicators::{atr, rsi};
use crate::market_data::Candle;

/// Per-symbol input series for one scan pass.
#[derive(Debug, Clone, Default)]
pub struct MarketSeries {
    pub symbol: String,

    /// Closed hourly bars, oldest first.
    pub hourly_candles: Vec<Candle>,

    /// Daily USD volumes, oldest first.
    pub daily_volume_usd: Vec<f64>,

    pub market_cap_usd: Option<f64>,
    pub volume_24h_usd: f64,

    /// Social activity score, normalised to [0, 100] upstream.
    pub social_score: f64,

    /// Volume-adjusted daily range when the data source provides it.
    pub vadr: Option<f64>,

    /// Closed bars since the signal bar (0 = signal bar is the latest).
    pub bars_age: u32,

    /// Pre-computed indicator values, preferred over local recomputation
    /// when present.
    pub rsi_4h: Option<f64>,
    pub atr_1h: Option<f64>,
}

impl MarketSeries {
    /// Latest close.
    pub fn last_price(&self) -> Option<f64> {
        self.hourly_candles.last().map(|c| c.close)
    }

    /// Percentage return over the trailing `hours` bars.
    pub fn return_pct(&self, hours: usize) -> Option<f64> {
        let n = self.hourly_candles.len();
        if hours == 0 || n <= hours {
            return None;
        }
        let now = self.hourly_candles[n - 1].close;
        let then = self.hourly_candles[n - 1 - hours].close;
        if then <= 0.0 {
            return None;
        }
        Some((now / then - 1.0) * 100.0)
    }

    /// 4h momentum acceleration: the change in the 4h return between now and
    /// four bars ago, in percentage points.
    pub fn accel_4h(&self) -> Option<f64> {
        let n = self.hourly_candles.len();
        if n < 9 {
            return None;
        }
        let r_now = self.return_pct(4)?;
        let now_prev = self.hourly_candles[n - 5].close;
        let then_prev = self.hourly_candles[n - 9].close;
        if then_prev <= 0.0 {
            return None;
        }
        let r_prev = (now_prev / then_prev - 1.0) * 100.0;
        Some(r_now - r_prev)
    }

    /// RSI on the 4h timeframe. Uses the pre-computed value when present,
    /// otherwise resamples the hourly closes to 4h bars and computes RSI(14).
    pub fn rsi_4h(&self) -> Option<f64> {
        if let Some(v) = self.rsi_4h {
            return Some(v);
        }
        let closes: Vec<f64> = self
            .hourly_candles
            .iter()
            .map(|c| c.close)
            .collect::<Vec<_>>()
            .chunks(4)
            .filter(|chunk| chunk.len() == 4)
            .map(|chunk| chunk[3])
            .collect();
        rsi::latest_rsi(&closes, 14)
    }

    /// ATR on the hourly timeframe. Uses the pre-computed value when
    /// present, otherwise ATR(14) over the hourly bars.
    pub fn atr_1h(&self) -> Option<f64> {
        if let Some(v) = self.atr_1h {
            return Some(v);
        }
        atr::latest_atr(&self.hourly_candles, 14)
    }

    /// Absolute close-to-close move of the latest hourly bar.
    pub fn last_bar_move_abs(&self) -> Option<f64> {
        let n = self.hourly_candles.len();
        if n < 2 {
            return None;
        }
        Some((self.hourly_candles[n - 1].close - self.hourly_candles[n - 2].close).abs())
    }

    /// VADR, falling back to a depth heuristic when no external value is
    /// available: daily turnover relative to standing two-percent depth,
    /// amortised per hour.
    pub fn vadr_or_estimate(&self, depth_usd: f64) -> f64 {
        if let Some(v) = self.vadr {
            return v;
        }
        if depth_usd <= 0.0 {
            return 0.0;
        }
        self.volume_24h_usd / (depth_usd * 24.0)
    }

    /// Reject series that cannot feed the factor pipeline.
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.hourly_candles.len() < 25 {
            return Err(ScanError::ValidationFailure(format!(
                "{}: need at least 25 hourly bars, have {}",
                self.symbol,
                self.hourly_candles.len()
            )));
        }
        for candle in &self.hourly_candles {
            if !candle.close.is_finite() || candle.close <= 0.0 {
                return Err(ScanError::ValidationFailure(format!(
                    "{}: non-finite or non-positive close in hourly series",
                    self.symbol
                )));
            }
        }
        if !self.volume_24h_usd.is_finite() || self.volume_24h_usd < 0.0 {
            return Err(ScanError::ValidationFailure(format!(
                "{}: invalid 24h volume",
                self.symbol
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SeriesSource
// ---------------------------------------------------------------------------

/// Supplier of per-symbol series data. The live implementation fetches
/// exchange-native klines; tests inject synthetic panels.
#[async_trait]
pub trait SeriesSource: Send + Sync {
    async fn fetch_series(&self, symbol: &SymbolEntry) -> Result<MarketSeries, ScanError>;
}
