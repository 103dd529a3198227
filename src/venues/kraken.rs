// =============================================================================
// Kraken REST client — public market data
// =============================================================================
//
// Endpoints:
//   GET /0/public/Depth?pair={pair}&count=500
//   GET /0/public/Ticker?pair={pair}
//   GET /0/public/Trades?pair={pair}
//
// Kraken wraps every payload in `{ "error": [...], "result": {...} }` and
// keys the result by its own pair spelling, which may differ from the
// requested one (e.g. XBTUSD → XXBTZUSD) — we therefore take the first entry
// of the result object. Depth has no sequence field; the newest level
// timestamp (seconds) serves as the sequence in milliseconds.
// =============================================================================

use async_trait::async_trait;
use serde_json::Value;

use crate::config::SymbolEntry;
use crate::errors::ScanError;
use crate::market_data::{BookLevel, OrderBook, Ticker, Trade};
use crate::venues::{
    finish_book, finish_ticker, pair_or_err, parse_level, trades_sorted, value_f64, VenueClient,
    VenueTransport, BOOK_DEPTH_LEVELS,
};

pub const VENUE: &str = "kraken";

pub struct KrakenClient {
    transport: VenueTransport,
}

impl KrakenClient {
    pub fn new(transport: VenueTransport) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl VenueClient for KrakenClient {
    fn name(&self) -> &'static str {
        VENUE
    }

    async fn fetch_order_book(&self, symbol: &SymbolEntry) -> Result<OrderBook, ScanError> {
        let pair = pair_or_err(symbol, VENUE)?;
        let body = self
            .transport
            .get_json(&format!("/0/public/Depth?pair={pair}&count={BOOK_DEPTH_LEVELS}"))
            .await?;
        parse_depth(symbol, &body)
    }

    async fn fetch_ticker(&self, symbol: &SymbolEntry) -> Result<Ticker, ScanError> {
        let pair = pair_or_err(symbol, VENUE)?;
        let body = self
            .transport
            .get_json(&format!("/0/public/Ticker?pair={pair}"))
            .await?;
        parse_ticker(symbol, &body)
    }

    async fn fetch_trades(
        &self,
        symbol: &SymbolEntry,
        since_ms: i64,
    ) -> Result<Vec<Trade>, ScanError> {
        let pair = pair_or_err(symbol, VENUE)?;
        // Kraken's `since` cursor is in nanoseconds.
        let since_ns = (since_ms as i128) * 1_000_000;
        let body = self
            .transport
            .get_json(&format!("/0/public/Trades?pair={pair}&since={since_ns}"))
            .await?;
        parse_trades(&body, since_ms)
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

fn invalid(detail: impl Into<String>) -> ScanError {
    ScanError::InvalidResponse {
        venue: VENUE.to_string(),
        detail: detail.into(),
    }
}

/// Unwrap Kraken's `{error, result}` envelope and return the first entry of
/// the result object.
fn unwrap_result(body: &Value) -> Result<&Value, ScanError> {
    if let Some(errors) = body["error"].as_array() {
        if !errors.is_empty() {
            return Err(invalid(format!("API error: {errors:?}")));
        }
    }
    body["result"]
        .as_object()
        .and_then(|obj| obj.values().next())
        .ok_or_else(|| invalid("missing result object"))
}

pub(crate) fn parse_depth(symbol: &SymbolEntry, body: &Value) -> Result<OrderBook, ScanError> {
    let result = unwrap_result(body)?;

    let parse_side = |side: &str| -> Result<(Vec<BookLevel>, u64), ScanError> {
        let levels = result[side]
            .as_array()
            .ok_or_else(|| invalid(format!("missing {side} array")))?;
        let mut out = Vec::with_capacity(levels.len());
        let mut newest_ts = 0u64;
        for entry in levels {
            out.push(parse_level(entry, VENUE)?);
            // Entry shape: [price, volume, timestamp_seconds]
            if let Some(ts) = entry.get(2).and_then(value_f64) {
                newest_ts = newest_ts.max((ts * 1000.0) as u64);
            }
        }
        Ok((out, newest_ts))
    };

    let (bids, bid_ts) = parse_side("bids")?;
    let (asks, ask_ts) = parse_side("asks")?;

    finish_book(symbol, VENUE, bid_ts.max(ask_ts), bids, asks)
}

pub(crate) fn parse_ticker(symbol: &SymbolEntry, body: &Value) -> Result<Ticker, ScanError> {
    let result = unwrap_result(body)?;

    // c = [last trade price, lot volume]; v = [today, last 24h] in base units.
    let last = result["c"]
        .get(0)
        .and_then(value_f64)
        .ok_or_else(|| invalid("missing last price"))?;
    let vol_base = result["v"].get(1).and_then(value_f64).unwrap_or(0.0);

    finish_ticker(symbol, VENUE, last, vol_base * last, None, 0)
}

pub(crate) fn parse_trades(body: &Value, since_ms: i64) -> Result<Vec<Trade>, ScanError> {
    if let Some(errors) = body["error"].as_array() {
        if !errors.is_empty() {
            return Err(invalid(format!("API error: {errors:?}")));
        }
    }
    // The result object holds the pair entry (an array) alongside the `last`
    // cursor string — take the array.
    let entries = body["result"]
        .as_object()
        .and_then(|obj| obj.values().find_map(Value::as_array))
        .ok_or_else(|| invalid("trades result has no pair array"))?;

    let mut trades = Vec::with_capacity(entries.len());
    for entry in entries {
        let arr = entry.as_array().ok_or_else(|| invalid("trade entry not an array"))?;
        if arr.len() < 4 {
            continue;
        }
        let price = value_f64(&arr[0]).ok_or_else(|| invalid("unparseable trade price"))?;
        let size = value_f64(&arr[1]).ok_or_else(|| invalid("unparseable trade size"))?;
        let ts_secs = value_f64(&arr[2]).ok_or_else(|| invalid("unparseable trade time"))?;
        let is_buy = arr[3].as_str() == Some("b");
        trades.push(Trade {
            price,
            size,
            is_buy,
            timestamp_ms: (ts_secs * 1000.0) as i64,
        });
    }

    Ok(trades_sorted(trades, since_ms))
}
