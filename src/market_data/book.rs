// =============================================================================
// Market Data Records — order book snapshots, tickers, trades, candles
// =============================================================================
//
// Every venue client normalises exchange-native JSON into these records; no
// downstream code ever sees venue-specific payloads. An `OrderBook` is an
// immutable snapshot: fetched once, validated once, then shared read-only via
// the tiered cache.
// =============================================================================

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::errors::ScanError;

/// Half-width of the depth window around mid, as a fraction (±2%).
pub const DEPTH_WINDOW_PCT: f64 = 0.02;

// ---------------------------------------------------------------------------
// Levels and books
// ---------------------------------------------------------------------------

/// One price level of an order book side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
}

/// Immutable L2 order book snapshot.
///
/// Invariants (enforced by [`OrderBook::validate`]):
/// - both sides non-empty, all prices positive
/// - bids sorted descending, asks ascending
/// - `best_bid < best_ask`
#[derive(Debug, Clone)]
pub struct OrderBook {
    pub symbol: String,
    pub venue: String,

    /// Monotonic clock reading taken at fetch start.
    pub fetched_at: Instant,

    /// Wall-clock milliseconds at fetch start, for source tagging.
    pub fetched_at_ms: i64,

    /// Exchange sequence number, or the exchange timestamp in milliseconds
    /// when the venue has no native sequence field.
    pub sequence: u64,

    /// Bid levels, best first (descending price).
    pub bids: Vec<BookLevel>,

    /// Ask levels, best first (ascending price).
    pub asks: Vec<BookLevel>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<&BookLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&BookLevel> {
        self.asks.first()
    }

    /// Mid price = (best_bid + best_ask) / 2.
    pub fn mid(&self) -> Option<f64> {
        let bid = self.best_bid()?.price;
        let ask = self.best_ask()?.price;
        Some((bid + ask) / 2.0)
    }

    /// Spread in basis points relative to mid.
    pub fn spread_bps(&self) -> Option<f64> {
        let bid = self.best_bid()?.price;
        let ask = self.best_ask()?.price;
        let mid = (bid + ask) / 2.0;
        if mid <= 0.0 {
            return None;
        }
        Some((ask - bid) / mid * 10_000.0)
    }

    /// USD notional resting within ±2% of mid, summed across both sides.
    pub fn depth_usd_within_2pct(&self) -> f64 {
        let Some(mid) = self.mid() else {
            return 0.0;
        };
        let lo = mid * (1.0 - DEPTH_WINDOW_PCT);
        let hi = mid * (1.0 + DEPTH_WINDOW_PCT);

        let bid_usd: f64 = self
            .bids
            .iter()
            .filter(|l| l.price >= lo)
            .map(|l| l.price * l.size)
            .sum();
        let ask_usd: f64 = self
            .asks
            .iter()
            .filter(|l| l.price <= hi)
            .map(|l| l.price * l.size)
            .sum();

        bid_usd + ask_usd
    }

    /// Enforce the snapshot invariants. Called by every venue client before
    /// the book is cached or handed to the factor pipeline.
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.bids.is_empty() || self.asks.is_empty() {
            return Err(ScanError::EmptyBook {
                venue: self.venue.clone(),
                symbol: self.symbol.clone(),
            });
        }

        let invalid = |detail: String| ScanError::InvalidResponse {
            venue: self.venue.clone(),
            detail,
        };

        for level in self.bids.iter().chain(self.asks.iter()) {
            if !(level.price > 0.0) || !level.price.is_finite() || !level.size.is_finite() {
                return Err(invalid(format!(
                    "non-positive or non-finite level in {} book",
                    self.symbol
                )));
            }
        }

        if self.bids.windows(2).any(|w| w[0].price < w[1].price) {
            return Err(invalid("bids not sorted descending".to_string()));
        }
        if self.asks.windows(2).any(|w| w[0].price > w[1].price) {
            return Err(invalid("asks not sorted ascending".to_string()));
        }

        let best_bid = self.bids[0].price;
        let best_ask = self.asks[0].price;
        if best_bid >= best_ask {
            return Err(invalid(format!(
                "crossed book: best_bid {best_bid} >= best_ask {best_ask}"
            )));
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tickers and trades
// ---------------------------------------------------------------------------

/// Normalised 24h ticker.
#[derive(Debug, Clone)]
pub struct Ticker {
    pub symbol: String,
    pub venue: String,
    pub last_price: f64,
    pub volume_24h_usd: f64,
    pub market_cap_usd: Option<f64>,
    pub fetched_at: Instant,
    pub sequence: u64,
}

/// One public trade print.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub price: f64,
    pub size: f64,
    /// Taker side was a buy.
    pub is_buy: bool,
    pub timestamp_ms: i64,
}

// ---------------------------------------------------------------------------
// Candles
// ---------------------------------------------------------------------------

/// A single closed OHLCV bar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn new(
        open_time: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
        close_time: i64,
    ) -> Self {
        Self {
            open_time,
            close_time,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}
