// =============================================================================
// Binance REST client — public market data
// =============================================================================
//
// Endpoints:
//   GET /api/v3/depth?symbol={pair}&limit=500
//   GET /api/v3/ticker/24hr?symbol={pair}
//   GET /api/v3/trades?symbol={pair}&limit=500
//   GET /api/v3/klines?symbol={pair}&interval={i}&limit={n}
//
// Depth carries a native `lastUpdateId` sequence. Klines arrive as arrays:
//   [0] openTime, [1] open, [2] high, [3] low, [4] close, [5] volume,
//   [6] closeTime, [7] quoteAssetVolume, ...
//
// The kline endpoint also backs `BinanceSeriesSource`, the default live
// implementation of [`SeriesSource`] used by the scanner binary.
// =============================================================================

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::SymbolEntry;
use crate::errors::ScanError;
use crate::market_data::{Candle, MarketSeries, OrderBook, SeriesSource, Ticker, Trade};
use crate::venues::{
    finish_book, finish_ticker, pair_or_err, parse_level, trades_sorted, value_f64, VenueClient,
    VenueTransport, BOOK_DEPTH_LEVELS,
};

pub const VENUE: &str = "binance";

pub struct BinanceClient {
    transport: VenueTransport,
}

impl BinanceClient {
    pub fn new(transport: VenueTransport) -> Self {
        Self { transport }
    }

    /// GET /api/v3/klines — closed OHLCV bars, oldest first.
    pub async fn fetch_klines(
        &self,
        symbol: &SymbolEntry,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, ScanError> {
        let pair = pair_or_err(symbol, VENUE)?;
        let body = self
            .transport
            .get_json(&format!(
                "/api/v3/klines?symbol={pair}&interval={interval}&limit={limit}"
            ))
            .await?;
        parse_klines(&body)
    }
}

#[async_trait]
impl VenueClient for BinanceClient {
    fn name(&self) -> &'static str {
        VENUE
    }

    async fn fetch_order_book(&self, symbol: &SymbolEntry) -> Result<OrderBook, ScanError> {
        let pair = pair_or_err(symbol, VENUE)?;
        let body = self
            .transport
            .get_json(&format!("/api/v3/depth?symbol={pair}&limit={BOOK_DEPTH_LEVELS}"))
            .await?;
        parse_depth(symbol, &body)
    }

    async fn fetch_ticker(&self, symbol: &SymbolEntry) -> Result<Ticker, ScanError> {
        let pair = pair_or_err(symbol, VENUE)?;
        let body = self
            .transport
            .get_json(&format!("/api/v3/ticker/24hr?symbol={pair}"))
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
            .get_json(&format!("/api/v3/trades?symbol={pair}&limit=500"))
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

pub(crate) fn parse_depth(symbol: &SymbolEntry, body: &Value) -> Result<OrderBook, ScanError> {
    let sequence = body["lastUpdateId"]
        .as_u64()
        .ok_or_else(|| invalid("missing lastUpdateId"))?;

    let parse_side = |side: &str| -> Result<Vec<_>, ScanError> {
        body[side]
            .as_array()
            .ok_or_else(|| invalid(format!("missing {side} array")))?
            .iter()
            .map(|entry| parse_level(entry, VENUE))
            .collect()
    };

    let bids = parse_side("bids")?;
    let asks = parse_side("asks")?;

    finish_book(symbol, VENUE, sequence, bids, asks)
}

pub(crate) fn parse_ticker(symbol: &SymbolEntry, body: &Value) -> Result<Ticker, ScanError> {
    let last = value_f64(&body["lastPrice"]).ok_or_else(|| invalid("missing lastPrice"))?;
    // quoteVolume is already in quote (USD) units.
    let quote_volume = value_f64(&body["quoteVolume"]).unwrap_or(0.0);
    let sequence = body["closeTime"].as_u64().unwrap_or(0);

    finish_ticker(symbol, VENUE, last, quote_volume, None, sequence)
}

pub(crate) fn parse_trades(body: &Value, since_ms: i64) -> Result<Vec<Trade>, ScanError> {
    let entries = body
        .as_array()
        .ok_or_else(|| invalid("trades response is not an array"))?;

    let mut trades = Vec::with_capacity(entries.len());
    for entry in entries {
        let price = value_f64(&entry["price"]).ok_or_else(|| invalid("unparseable trade price"))?;
        let size = value_f64(&entry["qty"]).ok_or_else(|| invalid("unparseable trade qty"))?;
        let timestamp_ms = entry["time"].as_i64().unwrap_or(0);
        // Buyer-maker means the taker sold.
        let is_buy = !entry["isBuyerMaker"].as_bool().unwrap_or(false);
        trades.push(Trade {
            price,
            size,
            is_buy,
            timestamp_ms,
        });
    }

    Ok(trades_sorted(trades, since_ms))
}

pub(crate) fn parse_klines(body: &Value) -> Result<Vec<Candle>, ScanError> {
    let raw = body
        .as_array()
        .ok_or_else(|| invalid("klines response is not an array"))?;

    let mut candles = Vec::with_capacity(raw.len());
    for entry in raw {
        let arr = entry
            .as_array()
            .ok_or_else(|| invalid("kline entry is not an array"))?;
        if arr.len() < 7 {
            warn!(elements = arr.len(), "skipping malformed kline entry");
            continue;
        }

        let field = |i: usize, name: &str| -> Result<f64, ScanError> {
            value_f64(&arr[i]).ok_or_else(|| invalid(format!("unparseable kline {name}")))
        };

        candles.push(Candle::new(
            arr[0].as_i64().unwrap_or(0),
            field(1, "open")?,
            field(2, "high")?,
            field(3, "low")?,
            field(4, "close")?,
            field(5, "volume")?,
            arr[6].as_i64().unwrap_or(0),
        ));
    }

    Ok(candles)
}

// ---------------------------------------------------------------------------
// Live series source
// ---------------------------------------------------------------------------

/// Hourly bars for the factor horizons: 7d momentum needs 168 closes plus
/// headroom.
const HOURLY_BARS: u32 = 200;
/// Daily bars for the volume factor's 7-day baseline.
const DAILY_BARS: u32 = 8;

/// Default live [`SeriesSource`]: exchange-native Binance klines plus the
/// 24h ticker for notional volume.
pub struct BinanceSeriesSource {
    client: BinanceClient,
}

impl BinanceSeriesSource {
    pub fn new(client: BinanceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SeriesSource for BinanceSeriesSource {
    async fn fetch_series(&self, symbol: &SymbolEntry) -> Result<MarketSeries, ScanError> {
        let (hourly_candles, daily, ticker) = futures_util::future::try_join3(
            self.client.fetch_klines(symbol, "1h", HOURLY_BARS),
            self.client.fetch_klines(symbol, "1d", DAILY_BARS),
            self.client.fetch_ticker(symbol),
        )
        .await?;

        let daily_volume_usd: Vec<f64> = daily.iter().map(|c| c.volume * c.close).collect();

        debug!(
            symbol = %symbol.symbol,
            hourly_bars = hourly_candles.len(),
            daily_bars = daily.len(),
            "series fetched"
        );

        let series = MarketSeries {
            symbol: symbol.symbol.clone(),
            hourly_candles,
            daily_volume_usd,
            market_cap_usd: None,
            volume_24h_usd: ticker.volume_24h_usd,
            social_score: 0.0,
            vadr: None,
            bars_age: 0,
            rsi_4h: None,
            atr_1h: None,
        };
        series.validate()?;
        Ok(series)
    }
}
