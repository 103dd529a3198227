// =============================================================================
// Venue Clients — exchange-native market data, normalised to common records
// =============================================================================
//
// One client per exchange. Each maps exchange-native HTTP JSON into the
// common `OrderBook` / `Ticker` / `Trade` records; no downstream code ever
// sees a venue-specific payload, and symbol translation (canonical "BTCUSD" →
// venue pair string) happens only here.
//
// Aggregators are forbidden for depth and spread: the CoinGecko client is
// ticker-only and reports `supports_books() == false`.
//
// Timestamps are taken from the client-local monotonic clock at fetch start;
// sequence numbers come from the exchange's own field when present, else
// from the exchange timestamp in milliseconds.
// =============================================================================

pub mod binance;
pub mod coingecko;
pub mod kraken;
pub mod okx;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use crate::config::{ProviderConfig, SymbolEntry};
use crate::errors::ScanError;
use crate::limiter::ProviderLimiter;
use crate::market_data::{BookLevel, OrderBook, Ticker, Trade};

pub use binance::{BinanceClient, BinanceSeriesSource};
pub use coingecko::CoinGeckoClient;
pub use kraken::KrakenClient;
pub use okx::OkxClient;

/// Depth levels requested per side; enough to cover ±2% of mid on liquid
/// books.
pub const BOOK_DEPTH_LEVELS: u32 = 500;

/// Common interface implemented by every venue client.
#[async_trait]
pub trait VenueClient: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this venue may serve L2 depth. Aggregators return false.
    fn supports_books(&self) -> bool {
        true
    }

    async fn fetch_order_book(&self, symbol: &SymbolEntry) -> Result<OrderBook, ScanError>;

    async fn fetch_ticker(&self, symbol: &SymbolEntry) -> Result<Ticker, ScanError>;

    async fn fetch_trades(
        &self,
        symbol: &SymbolEntry,
        since_ms: i64,
    ) -> Result<Vec<Trade>, ScanError>;
}

// ---------------------------------------------------------------------------
// Shared HTTP transport
// ---------------------------------------------------------------------------

/// Thin HTTP layer shared by all clients: builds the request, maps status
/// codes onto the error taxonomy, and feeds rate-limit response headers back
/// into the venue's limiter.
pub struct VenueTransport {
    venue: &'static str,
    http: reqwest::Client,
    base_url: String,
    limiter: Option<Arc<ProviderLimiter>>,
}

impl VenueTransport {
    pub fn new(venue: &'static str, config: &ProviderConfig, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .expect("failed to build reqwest client");

        debug!(venue, base_url = %config.base_url, "venue transport initialised");

        Self {
            venue,
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            limiter: None,
        }
    }

    /// Attach the venue's limiter so response headers keep its budget and
    /// rate in sync with upstream accounting.
    pub fn with_limiter(mut self, limiter: Arc<ProviderLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// GET `path_query` and parse the body as JSON.
    pub async fn get_json(&self, path_query: &str) -> Result<Value, ScanError> {
        let url = format!("{}{}", self.base_url, path_query);

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ScanError::TransientNetwork(format!("{}: {e}", self.venue)))?;

        if let Some(limiter) = &self.limiter {
            limiter.apply_response_headers(resp.headers());
        }

        let status = resp.status();
        if status.as_u16() == 429 {
            let retry_after_ms = resp
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(|s| s * 1000)
                .unwrap_or(1000);
            return Err(ScanError::RateLimited {
                venue: self.venue.to_string(),
                retry_after_ms,
            });
        }
        if status.is_server_error() {
            return Err(ScanError::TransientNetwork(format!(
                "{}: HTTP {status}",
                self.venue
            )));
        }
        if !status.is_success() {
            return Err(ScanError::InvalidResponse {
                venue: self.venue.to_string(),
                detail: format!("HTTP {status}"),
            });
        }

        resp.json().await.map_err(|e| ScanError::InvalidResponse {
            venue: self.venue.to_string(),
            detail: format!("body not JSON: {e}"),
        })
    }
}

// ---------------------------------------------------------------------------
// Shared parse helpers
// ---------------------------------------------------------------------------

/// Translate the canonical symbol to this venue's pair string.
pub(crate) fn pair_or_err<'a>(symbol: &'a SymbolEntry, venue: &str) -> Result<&'a str, ScanError> {
    symbol.pair_for(venue).ok_or_else(|| ScanError::InvalidResponse {
        venue: venue.to_string(),
        detail: format!("no pair mapping for {}", symbol.symbol),
    })
}

/// Parse a JSON value that may be either a string or a number into `f64`.
pub(crate) fn value_f64(value: &Value) -> Option<f64> {
    if let Some(s) = value.as_str() {
        s.parse().ok()
    } else {
        value.as_f64()
    }
}

/// Parse one `[price, size, ...]` level array.
pub(crate) fn parse_level(entry: &Value, venue: &str) -> Result<BookLevel, ScanError> {
    let invalid = |detail: &str| ScanError::InvalidResponse {
        venue: venue.to_string(),
        detail: detail.to_string(),
    };

    let arr = entry.as_array().ok_or_else(|| invalid("level is not an array"))?;
    if arr.len() < 2 {
        return Err(invalid("level has fewer than 2 elements"));
    }
    let price = value_f64(&arr[0]).ok_or_else(|| invalid("unparseable level price"))?;
    let size = value_f64(&arr[1]).ok_or_else(|| invalid("unparseable level size"))?;
    Ok(BookLevel { price, size })
}

/// Assemble and validate an [`OrderBook`]. Levels are sorted into canonical
/// order (bids descending, asks ascending) before validation.
pub(crate) fn finish_book(
    symbol: &SymbolEntry,
    venue: &str,
    sequence: u64,
    mut bids: Vec<BookLevel>,
    mut asks: Vec<BookLevel>,
) -> Result<OrderBook, ScanError> {
    bids.sort_by(|a, b| b.price.partial_cmp(&a.price).unwrap_or(std::cmp::Ordering::Equal));
    asks.sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(std::cmp::Ordering::Equal));

    let book = OrderBook {
        symbol: symbol.symbol.clone(),
        venue: venue.to_string(),
        fetched_at: Instant::now(),
        fetched_at_ms: Utc::now().timestamp_millis(),
        sequence,
        bids,
        asks,
    };
    book.validate()?;
    Ok(book)
}

/// Build a [`Ticker`] stamped with the local monotonic clock.
pub(crate) fn finish_ticker(
    symbol: &SymbolEntry,
    venue: &str,
    last_price: f64,
    volume_24h_usd: f64,
    market_cap_usd: Option<f64>,
    sequence: u64,
) -> Result<Ticker, ScanError> {
    if !last_price.is_finite() || last_price <= 0.0 {
        return Err(ScanError::InvalidResponse {
            venue: venue.to_string(),
            detail: format!("non-positive last price for {}", symbol.symbol),
        });
    }
    Ok(Ticker {
        symbol: symbol.symbol.clone(),
        venue: venue.to_string(),
        last_price,
        volume_24h_usd: volume_24h_usd.max(0.0),
        market_cap_usd,
        fetched_at: Instant::now(),
        sequence,
    })
}

pub(crate) fn trades_sorted(mut trades: Vec<Trade>, since_ms: i64) -> Vec<Trade> {
    trades.retain(|t| t.timestamp_ms >= since_ms);
    trades.sort_by_key(|t| t.timestamp_ms);
    trades
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    pub(crate) fn symbol_entry(canonical: &str, venue: &str, pair: &str) -> SymbolEntry {
        let mut venues = HashMap::new();
        venues.insert(venue.to_string(), pair.to_string());
        SymbolEntry {
            symbol: canonical.to_string(),
            venues,
            priority: 1,
            tier: "majors".to_string(),
            preferred_venue: venue.to_string(),
            fallbacks: Vec::new(),
        }
    }

    #[test]
    fn value_f64_accepts_both_forms() {
        assert_eq!(value_f64(&serde_json::json!("1.5")), Some(1.5));
        assert_eq!(value_f64(&serde_json::json!(2.5)), Some(2.5));
        assert_eq!(value_f64(&serde_json::json!("not a number")), None);
    }

    #[test]
    fn parse_level_roundtrip() {
        let level = parse_level(&serde_json::json!(["100.5", "2.0"]), "kraken").unwrap();
        assert!((level.price - 100.5).abs() < f64::EPSILON);
        assert!((level.size - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn parse_level_rejects_malformed() {
        assert!(parse_level(&serde_json::json!(["100.5"]), "kraken").is_err());
        assert!(parse_level(&serde_json::json!({"px": 1}), "kraken").is_err());
    }

    #[test]
    fn finish_book_sorts_levels() {
        let sym = symbol_entry("BTCUSD", "kraken", "XBTUSD");
        let bids = vec![
            BookLevel { price: 98.0, size: 1.0 },
            BookLevel { price: 99.0, size: 1.0 },
        ];
        let asks = vec![
            BookLevel { price: 102.0, size: 1.0 },
            BookLevel { price: 101.0, size: 1.0 },
        ];
        let book = finish_book(&sym, "kraken", 7, bids, asks).unwrap();
        assert!((book.bids[0].price - 99.0).abs() < f64::EPSILON);
        assert!((book.asks[0].price - 101.0).abs() < f64::EPSILON);
        assert_eq!(book.sequence, 7);
    }

    #[test]
    fn finish_book_rejects_crossed() {
        let sym = symbol_entry("BTCUSD", "kraken", "XBTUSD");
        let bids = vec![BookLevel { price: 102.0, size: 1.0 }];
        let asks = vec![BookLevel { price: 101.0, size: 1.0 }];
        assert!(finish_book(&sym, "kraken", 1, bids, asks).is_err());
    }

    #[test]
    fn finish_ticker_rejects_bad_price() {
        let sym = symbol_entry("BTCUSD", "kraken", "XBTUSD");
        assert!(finish_ticker(&sym, "kraken", 0.0, 100.0, None, 1).is_err());
        assert!(finish_ticker(&sym, "kraken", f64::NAN, 100.0, None, 1).is_err());
        assert!(finish_ticker(&sym, "kraken", 100.0, 100.0, None, 1).is_ok());
    }

    #[test]
    fn trades_filtered_and_ordered() {
        let trades = vec![
            Trade { price: 1.0, size: 1.0, is_buy: true, timestamp_ms: 300 },
            Trade { price: 1.0, size: 1.0, is_buy: false, timestamp_ms: 100 },
            Trade { price: 1.0, size: 1.0, is_buy: true, timestamp_ms: 200 },
        ];
        let out = trades_sorted(trades, 150);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].timestamp_ms, 200);
        assert_eq!(out[1].timestamp_ms, 300);
    }

    #[test]
    fn pair_translation() {
        let sym = symbol_entry("BTCUSD", "kraken", "XBTUSD");
        assert_eq!(pair_or_err(&sym, "kraken").unwrap(), "XBTUSD");
        assert!(pair_or_err(&sym, "okx").is_err());
    }
}
