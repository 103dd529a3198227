// =============================================================================
// OKX REST client — public market data
// =============================================================================
//
// Endpoints:
//   GET /api/v5/market/books?instId={pair}&sz=400
//   GET /api/v5/market/ticker?instId={pair}
//   GET /api/v5/market/trades?instId={pair}&limit=100
//
// OKX wraps payloads in `{ "code": "0", "msg": "", "data": [...] }`; any
// non-zero code is an API-level rejection. Book levels arrive as
// `[px, sz, liquidated, orderCount]`; the book timestamp (ms) serves as the
// sequence number.
// =============================================================================

use async_trait::async_trait;
use serde_json::Value;

use crate::config::SymbolEntry;
use crate::errors::ScanError;
use crate::market_data::{BookLevel, OrderBook, Ticker, Trade};
use crate::venues::{
    finish_book, finish_ticker, pair_or_err, parse_level, trades_sorted, value_f64, VenueClient,
    VenueTransport,
};

pub const VENUE: &str = "okx";

/// OKX caps the books endpoint at 400 levels per side.
const OKX_BOOK_LEVELS: u32 = 400;

pub struct OkxClient {
    transport: VenueTransport,
}

impl OkxClient {
    pub fn new(transport: VenueTransport) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl VenueClient for OkxClient {
    fn name(&self) -> &'static str {
        VENUE
    }

    async fn fetch_order_book(&self, symbol: &SymbolEntry) -> Result<OrderBook, ScanError> {
        let pair = pair_or_err(symbol, VENUE)?;
        let body = self
            .transport
            .get_json(&format!("/api/v5/market/books?instId={pair}&sz={OKX_BOOK_LEVELS}"))
            .await?;
        parse_books(symbol, &body)
    }

    async fn fetch_ticker(&self, symbol: &SymbolEntry) -> Result<Ticker, ScanError> {
        let pair = pair_or_err(symbol, VENUE)?;
        let body = self
            .transport
            .get_json(&format!("/api/v5/market/ticker?instId={pair}"))
            .await?;
        parse_ticker(symbol, &body)
    }

    async fn fetch_trades(
        &self,
        symbol: &SymbolEntry,
        since_ms: i64,
    ) -> Result<Vec<Trade>, ScanError> {
        let pair = pair_or_err(symbol, VENUE)?;
        let body = self
            .transport
            .get_json(&format!("/api/v5/market/trades?instId={pair}&limit=100"))
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

/// Unwrap the `{code, data}` envelope and return the first data element.
fn first_data(body: &Value) -> Result<&Value, ScanError> {
    let code = body["code"].as_str().unwrap_or("");
    if code != "0" {
        let msg = body["msg"].as_str().unwrap_or("unknown");
        return Err(invalid(format!("API error code {code}: {msg}")));
    }
    body["data"]
        .as_array()
        .and_then(|arr| arr.first())
        .ok_or_else(|| invalid("empty data array"))
}

pub(crate) fn parse_books(symbol: &SymbolEntry, body: &Value) -> Result<OrderBook, ScanError> {
    let data = first_data(body)?;

    let parse_side = |side: &str| -> Result<Vec<BookLevel>, ScanError> {
        data[side]
            .as_array()
            .ok_or_else(|| invalid(format!("missing {side} array")))?
            .iter()
            .map(|entry| parse_level(entry, VENUE))
            .collect()
    };

    let bids = parse_side("bids")?;
    let asks = parse_side("asks")?;

    let sequence = data["ts"]
        .as_str()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    finish_book(symbol, VENUE, sequence, bids, asks)
}

pub(crate) fn parse_ticker(symbol: &SymbolEntry, body: &Value) -> Result<Ticker, ScanError> {
    let data = first_data(body)?;

    let last = value_f64(&data["last"]).ok_or_else(|| invalid("missing last price"))?;
    // vol24h is in base units; notional = base volume × last.
    let vol_base = value_f64(&data["vol24h"]).unwrap_or(0.0);
    let sequence = data["ts"]
        .as_str()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    finish_ticker(symbol, VENUE, last, vol_base * last, None, sequence)
}

pub(crate) fn parse_trades(body: &Value, since_ms: i64) -> Result<Vec<Trade>, ScanError> {
    let code = body["code"].as_str().unwrap_or("");
    if code != "0" {
        return Err(invalid(format!("API error code {code}")));
    }
    let entries = body["data"]
        .as_array()
        .ok_or_else(|| invalid("missing data array"))?;

    let mut trades = Vec::with_capacity(entries.len());
    for entry in entries {
        let price = value_f64(&entry["px"]).ok_or_else(|| invalid("unparseable trade px"))?;
        let size = value_f64(&entry["sz"]).ok_or_else(|| invalid("unparseable trade sz"))?;
        let timestamp_ms = entry["ts"]
            .as_str()
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(0);
        let is_buy = entry["side"].as_str() == Some("buy");
        trades.push(Trade {
            price,
            size,
            is_buy,
            timestamp_ms,
        });
    }

    Ok(trades_sorted(trades, since_ms))
}

// =============================================================================
// Unit Tests — canned OKX payloads
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn symbol() -> SymbolEntry {
        let mut venues = HashMap::new();
        venues.insert("okx".to_string(), "BTC-USDT".to_string());
        SymbolEntry {
            symbol: "BTCUSD".to_string(),
            venues,
            priority: 1,
            tier: "majors".to_string(),
            preferred_venue: "okx".to_string(),
            fallbacks: Vec::new(),
        }
    }

    #[test]
    fn books_parse_with_sequence() {
        let body: Value = serde_json::from_str(
            r#"{
                "code": "0",
                "msg": "",
                "data": [{
                    "asks": [["65001.5", "0.5", "0", "3"], ["65010.0", "2.0", "0", "7"]],
                    "bids": [["64998.5", "0.8", "0", "2"], ["64990.0", "1.2", "0", "4"]],
                    "ts": "1700000060123"
                }]
            }"#,
        )
        .unwrap();

        let book = parse_books(&symbol(), &body).unwrap();
        assert_eq!(book.venue, "okx");
        assert_eq!(book.sequence, 1_700_000_060_123);
        assert!((book.best_bid().unwrap().price - 64998.5).abs() < f64::EPSILON);
        assert!((book.best_ask().unwrap().price - 65001.5).abs() < f64::EPSILON);
        assert!(book.validate().is_ok());
    }

    #[test]
    fn nonzero_code_rejected() {
        let body: Value = serde_json::from_str(
            r#"{ "code": "51001", "msg": "Instrument ID does not exist", "data": [] }"#,
        )
        .unwrap();
        assert!(matches!(
            parse_books(&symbol(), &body),
            Err(ScanError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn empty_data_rejected() {
        let body: Value = serde_json::from_str(r#"{ "code": "0", "msg": "", "data": [] }"#).unwrap();
        assert!(parse_books(&symbol(), &body).is_err());
    }

    #[test]
    fn ticker_parses_notional_volume() {
        let body: Value = serde_json::from_str(
            r#"{
                "code": "0",
                "msg": "",
                "data": [{ "last": "65000.0", "vol24h": "1200.5", "ts": "1700000060123" }]
            }"#,
        )
        .unwrap();

        let ticker = parse_ticker(&symbol(), &body).unwrap();
        assert!((ticker.last_price - 65000.0).abs() < f64::EPSILON);
        assert!((ticker.volume_24h_usd - 1200.5 * 65000.0).abs() < 1e-6);
        assert_eq!(ticker.sequence, 1_700_000_060_123);
    }

    #[test]
    fn trades_parse_and_filter() {
        let body: Value = serde_json::from_str(
            r#"{
                "code": "0",
                "msg": "",
                "data": [
                    { "px": "64990.1", "sz": "0.05", "side": "buy", "ts": "1700000100000" },
                    { "px": "64991.2", "sz": "0.10", "side": "sell", "ts": "1700000050000" }
                ]
            }"#,
        )
        .unwrap();

        let trades = parse_trades(&body, 1_700_000_060_000).unwrap();
        assert_eq!(trades.len(), 1);
        assert!(trades[0].is_buy);
    }
}
