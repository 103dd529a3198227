// =============================================================================
// CoinGecko REST client — ticker-only aggregator
// =============================================================================
//
// CoinGecko is an aggregator, and aggregators are forbidden for depth and
// spread data: this client serves tickers (price, 24h volume, market cap)
// only, reports `supports_books() == false`, and rejects book and trade
// requests outright. The fabric skips it when routing order-book fetches.
//
// Endpoint:
//   GET /api/v3/coins/markets?vs_currency=usd&ids={id}
//
// The venue pair mapping holds the CoinGecko coin id (e.g. "bitcoin").
// =============================================================================

use async_trait::async_trait;
use serde_json::Value;

use crate::config::SymbolEntry;
use crate::errors::ScanError;
use crate::market_data::{OrderBook, Ticker, Trade};
use crate::venues::{finish_ticker, pair_or_err, VenueClient, VenueTransport};

pub const VENUE: &str = "coingecko";

pub struct CoinGeckoClient {
    transport: VenueTransport,
}

impl CoinGeckoClient {
    pub fn new(transport: VenueTransport) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl VenueClient for CoinGeckoClient {
    fn name(&self) -> &'static str {
        VENUE
    }

    fn supports_books(&self) -> bool {
        false
    }

    async fn fetch_order_book(&self, symbol: &SymbolEntry) -> Result<OrderBook, ScanError> {
        Err(ScanError::InvalidResponse {
            venue: VENUE.to_string(),
            detail: format!(
                "aggregator cannot serve order books (requested {})",
                symbol.symbol
            ),
        })
    }

    async fn fetch_ticker(&self, symbol: &SymbolEntry) -> Result<Ticker, ScanError> {
        let id = pair_or_err(symbol, VENUE)?;
        let body = self
            .transport
            .get_json(&format!("/api/v3/coins/markets?vs_currency=usd&ids={id}"))
            .await?;
        parse_markets(symbol, &body)
    }

    async fn fetch_trades(
        &self,
        symbol: &SymbolEntry,
        _since_ms: i64,
    ) -> Result<Vec<Trade>, ScanError> {
        Err(ScanError::InvalidResponse {
            venue: VENUE.to_string(),
            detail: format!("aggregator cannot serve trades (requested {})", symbol.symbol),
        })
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

pub(crate) fn parse_markets(symbol: &SymbolEntry, body: &Value) -> Result<Ticker, ScanError> {
    let invalid = |detail: &str| ScanError::InvalidResponse {
        venue: VENUE.to_string(),
        detail: detail.to_string(),
    };

    let entry = body
        .as_array()
        .and_then(|arr| arr.first())
        .ok_or_else(|| invalid("empty markets response"))?;

    let last = entry["current_price"]
        .as_f64()
        .ok_or_else(|| invalid("missing current_price"))?;
    let volume = entry["total_volume"].as_f64().unwrap_or(0.0);
    let market_cap = entry["market_cap"].as_f64();

    finish_ticker(symbol, VENUE, last, volume, market_cap, 0)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn symbol() -> SymbolEntry {
        let mut venues = HashMap::new();
        venues.insert("coingecko".to_string(), "bitcoin".to_string());
        SymbolEntry {
            symbol: "BTCUSD".to_string(),
            venues,
            priority: 1,
            tier: "majors".to_string(),
            preferred_venue: "coingecko".to_string(),
            fallbacks: Vec::new(),
        }
    }

    #[test]
    fn markets_parse_cap_and_volume() {
        let body: Value = serde_json::from_str(
            r#"[{ "id": "bitcoin", "current_price": 65000.0, "market_cap": 1280000000000.0, "total_volume": 35000000000.0 }]"#,
        )
        .unwrap();

        let ticker = parse_markets(&symbol(), &body).unwrap();
        assert!((ticker.last_price - 65000.0).abs() < f64::EPSILON);
        assert_eq!(ticker.market_cap_usd, Some(1.28e12));
        assert!((ticker.volume_24h_usd - 3.5e10).abs() < 1e-3);
    }

    #[test]
    fn empty_response_rejected() {
        let body: Value = serde_json::from_str("[]").unwrap();
        assert!(parse_markets(&symbol(), &body).is_err());
    }

    #[tokio::test]
    async fn books_and_trades_always_rejected() {
        let transport = VenueTransport::new(
            VENUE,
            &crate::config::ProviderConfig {
                base_url: "https://api.coingecko.com".to_string(),
                requests_per_sec: 1.0,
                burst: 2,
                daily_budget: 100,
                ttl_seconds: 300,
                backoff: Default::default(),
                circuit: Default::default(),
                enabled: true,
                user_agent: "test".to_string(),
            },
            std::time::Duration::from_secs(1),
        );
        let client = CoinGeckoClient::new(transport);
        assert!(!client.supports_books());
        assert!(client.fetch_order_book(&symbol()).await.is_err());
        assert!(client.fetch_trades(&symbol(), 0).await.is_err());
    }
}
