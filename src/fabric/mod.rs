// =============================================================================
// Provider Fabric — cache → limiter → client, with deterministic fallback
// =============================================================================
//
// One facade per data type (`fetch_order_book`, `fetch_ticker`,
// `fetch_trades`). Routing for each fetch:
//
//   1. Probe the tiered cache; a hit returns immediately with tier
//      attribution.
//   2. Ask the venue's limiter for admission. `BudgetExhausted` degrades the
//      venue for the rest of the UTC day; `CircuitOpen` skips to the next
//      venue in the chain.
//   3. Invoke the venue client, validate, store hot, return with
//      attribution. Transient failures get one bounded backoff retry before
//      the chain moves on.
//   4. Exhausting the chain yields `AllVenuesFailed`.
//
// The fallback chain is deterministic: preferred venue, then the symbol's
// configured fallbacks, then any remaining configured providers in
// registration order — each venue at most once, and only while it is
// enabled, maps the symbol, serves the data type, and is not degraded.
// =============================================================================

pub mod health;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::attribution::{source_tag, AttemptRecord, FetchAttribution};
use crate::cache::{cache_key, CacheTier, TieredCache};
use crate::config::{ScannerConfig, SymbolEntry};
use crate::errors::ScanError;
use crate::limiter::ProviderLimiter;
use crate::market_data::{OrderBook, Ticker, Trade};
use crate::venues::{
    BinanceClient, CoinGeckoClient, KrakenClient, OkxClient, VenueClient, VenueTransport,
};

pub use health::{HealthMonitor, ProviderHealthSnapshot};

/// Extra fetch attempts after the first failure of a retryable kind.
const MAX_RETRIES_PER_VENUE: u32 = 1;

/// A value plus the provenance of its fetch.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub value: T,
    pub attribution: FetchAttribution,
}

/// One registered venue.
pub struct ProviderHandle {
    pub name: String,
    pub client: Arc<dyn VenueClient>,
    pub limiter: Arc<ProviderLimiter>,
    pub enabled: bool,
}

/// Composes venue clients, limiters, and the tiered caches.
pub struct ProviderFabric {
    providers: Vec<ProviderHandle>,
    book_cache: Arc<TieredCache<OrderBook>>,
    ticker_cache: Arc<TieredCache<Ticker>>,
    trades_cache: Arc<TieredCache<Vec<Trade>>>,
    health: HealthMonitor,
    /// Venues out of budget, keyed to the UTC instant they become usable
    /// again.
    degraded_until: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl ProviderFabric {
    pub fn new(providers: Vec<ProviderHandle>, warm_ttl: Duration) -> Self {
        Self {
            providers,
            book_cache: Arc::new(TieredCache::new("orderbooks", warm_ttl)),
            ticker_cache: Arc::new(TieredCache::new("tickers", warm_ttl)),
            trades_cache: Arc::new(TieredCache::new("trades", warm_ttl)),
            health: HealthMonitor::new(),
            degraded_until: RwLock::new(HashMap::new()),
        }
    }

    /// Build the default fabric from configuration: one client per known
    /// venue name present in `config.providers`.
    pub fn from_config(config: &ScannerConfig) -> Self {
        let timeout = Duration::from_secs(config.global.http_timeout_secs);
        let mut providers = Vec::new();
        let mut max_ttl = Duration::from_secs(0);

        for (name, provider_cfg) in &config.providers {
            let limiter = Arc::new(ProviderLimiter::new(name.clone(), provider_cfg, &config.global));
            max_ttl = max_ttl.max(Duration::from_secs(provider_cfg.ttl_seconds));

            let client: Option<Arc<dyn VenueClient>> = match name.as_str() {
                "kraken" => Some(Arc::new(KrakenClient::new(
                    VenueTransport::new("kraken", provider_cfg, timeout)
                        .with_limiter(Arc::clone(&limiter)),
                ))),
                "okx" => Some(Arc::new(OkxClient::new(
                    VenueTransport::new("okx", provider_cfg, timeout)
                        .with_limiter(Arc::clone(&limiter)),
                ))),
                "binance" => Some(Arc::new(BinanceClient::new(
                    VenueTransport::new("binance", provider_cfg, timeout)
                        .with_limiter(Arc::clone(&limiter)),
                ))),
                "coingecko" => Some(Arc::new(CoinGeckoClient::new(
                    VenueTransport::new("coingecko", provider_cfg, timeout)
                        .with_limiter(Arc::clone(&limiter)),
                ))),
                other => {
                    warn!(venue = other, "unknown provider in config, skipping");
                    None
                }
            };

            if let Some(client) = client {
                providers.push(ProviderHandle {
                    name: name.clone(),
                    client,
                    limiter,
                    enabled: provider_cfg.enabled,
                });
            }
        }

        // Registration order must be deterministic for fallback routing.
        providers.sort_by(|a, b| a.name.cmp(&b.name));

        info!(providers = providers.len(), "provider fabric initialised");
        Self::new(providers, max_ttl)
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    /// Spawn the cache sweepers; they stop when `cancel` fires.
    pub fn spawn_cache_sweepers(&self, cancel: &CancellationToken) {
        self.book_cache.spawn_sweepers(cancel.clone());
        self.ticker_cache.spawn_sweepers(cancel.clone());
        self.trades_cache.spawn_sweepers(cancel.clone());
    }

    // -------------------------------------------------------------------------
    // Routing
    // -------------------------------------------------------------------------

    fn handle(&self, venue: &str) -> Option<&ProviderHandle> {
        self.providers.iter().find(|p| p.name == venue)
    }

    fn is_degraded(&self, venue: &str) -> bool {
        let degraded = self.degraded_until.read();
        match degraded.get(venue) {
            Some(until) => Utc::now() < *until,
            None => false,
        }
    }

    fn mark_degraded(&self, venue: &str, until: DateTime<Utc>) {
        warn!(venue, until = %until, "provider degraded until next budget reset");
        self.degraded_until.write().insert(venue.to_string(), until);
    }

    /// Deterministic venue chain for one symbol fetch.
    fn venue_chain(
        &self,
        symbol: &SymbolEntry,
        preferred: Option<&str>,
        needs_books: bool,
    ) -> Vec<String> {
        let mut chain: Vec<String> = Vec::new();
        let mut push = |venue: &str, chain: &mut Vec<String>| {
            if chain.iter().any(|v| v == venue) {
                return;
            }
            let Some(handle) = self.handle(venue) else {
                return;
            };
            if !handle.enabled
                || symbol.pair_for(venue).is_none()
                || (needs_books && !handle.client.supports_books())
                || self.is_degraded(venue)
            {
                return;
            }
            chain.push(venue.to_string());
        };

        push(preferred.unwrap_or(&symbol.preferred_venue), &mut chain);
        for venue in &symbol.fallbacks {
            push(venue, &mut chain);
        }
        for provider in &self.providers {
            push(&provider.name, &mut chain);
        }

        chain
    }

    // -------------------------------------------------------------------------
    // Order books
    // -------------------------------------------------------------------------

    /// Fetch an order book with cache, admission, and venue failover.
    ///
    /// Returns the result plus every venue attempt made, so the scan summary
    /// can account per-venue successes and failures.
    pub async fn fetch_order_book(
        &self,
        symbol: &SymbolEntry,
        preferred: Option<&str>,
        cancel: &CancellationToken,
    ) -> (Result<Fetched<OrderBook>, ScanError>, Vec<AttemptRecord>) {
        let mut attempts = Vec::new();
        let chain = self.venue_chain(symbol, preferred, true);

        if chain.is_empty() {
            return (
                Err(ScanError::AllVenuesFailed {
                    symbol: symbol.symbol.clone(),
                }),
                attempts,
            );
        }

        for venue in &chain {
            if cancel.is_cancelled() {
                return (Err(ScanError::CancelledOrTimeout), attempts);
            }

            let key = cache_key(&[venue, &symbol.symbol, "orderbook"], None);
            if let Some((book, tier)) = self.book_cache.get(&key) {
                debug!(venue, symbol = %symbol.symbol, %tier, "order book cache hit");
                let attribution = FetchAttribution {
                    venue: venue.clone(),
                    cache_tier: Some(tier),
                    latency_ms: 0,
                    sequence: book.sequence,
                    source_tag: source_tag(venue, "l2", book.fetched_at_ms),
                };
                return (Ok(Fetched { value: book, attribution }), attempts);
            }

            let handle = self.handle(venue).expect("chain venues are registered");

            match self
                .fetch_book_from_venue(handle, symbol, cancel, &mut attempts)
                .await
            {
                Ok(fetched) => {
                    self.book_cache.set(key, fetched.value.clone(), CacheTier::Hot);
                    return (Ok(fetched), attempts);
                }
                Err(ScanError::CancelledOrTimeout) => {
                    return (Err(ScanError::CancelledOrTimeout), attempts)
                }
                Err(err) => {
                    debug!(venue, symbol = %symbol.symbol, error = %err, "venue failed, trying next");
                }
            }
        }

        (
            Err(ScanError::AllVenuesFailed {
                symbol: symbol.symbol.clone(),
            }),
            attempts,
        )
    }

    /// One venue's admission + fetch, with a bounded retry on retryable
    /// failures.
    async fn fetch_book_from_venue(
        &self,
        handle: &ProviderHandle,
        symbol: &SymbolEntry,
        cancel: &CancellationToken,
        attempts: &mut Vec<AttemptRecord>,
    ) -> Result<Fetched<OrderBook>, ScanError> {
        let venue = handle.name.as_str();
        let mut attempt = 0u32;

        loop {
            if let Err(err) = handle.limiter.admit(cancel).await {
                if let ScanError::BudgetExhausted { .. } = err {
                    self.mark_degraded(venue, handle.limiter.next_budget_reset());
                }
                attempts.push(AttemptRecord {
                    venue: venue.to_string(),
                    ok: false,
                    error_kind: Some(err.kind_tag().to_string()),
                });
                return Err(err);
            }

            let started = Instant::now();
            match handle.client.fetch_order_book(symbol).await {
                Ok(book) => {
                    let latency_ms = started.elapsed().as_millis() as u64;
                    handle.limiter.record_success();
                    self.health.record(venue, true, latency_ms);
                    attempts.push(AttemptRecord {
                        venue: venue.to_string(),
                        ok: true,
                        error_kind: None,
                    });
                    let attribution = FetchAttribution {
                        venue: venue.to_string(),
                        cache_tier: None,
                        latency_ms,
                        sequence: book.sequence,
                        source_tag: source_tag(venue, "l2", book.fetched_at_ms),
                    };
                    return Ok(Fetched { value: book, attribution });
                }
                Err(err) => {
                    let latency_ms = started.elapsed().as_millis() as u64;
                    if !matches!(err, ScanError::RateLimited { .. }) {
                        handle.limiter.record_failure();
                    }
                    self.health.record(venue, false, latency_ms);
                    attempts.push(AttemptRecord {
                        venue: venue.to_string(),
                        ok: false,
                        error_kind: Some(err.kind_tag().to_string()),
                    });

                    if err.is_retryable() && attempt < MAX_RETRIES_PER_VENUE {
                        attempt += 1;
                        let delay = handle.limiter.backoff_delay(attempt - 1);
                        debug!(venue, ?delay, attempt, "retrying after backoff");
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => continue,
                            _ = cancel.cancelled() => return Err(ScanError::CancelledOrTimeout),
                        }
                    }
                    return Err(err);
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Tickers
    // -------------------------------------------------------------------------

    pub async fn fetch_ticker(
        &self,
        symbol: &SymbolEntry,
        preferred: Option<&str>,
        cancel: &CancellationToken,
    ) -> (Result<Fetched<Ticker>, ScanError>, Vec<AttemptRecord>) {
        let mut attempts = Vec::new();
        let chain = self.venue_chain(symbol, preferred, false);

        for venue in &chain {
            if cancel.is_cancelled() {
                return (Err(ScanError::CancelledOrTimeout), attempts);
            }

            let key = cache_key(&[venue, &symbol.symbol, "ticker"], None);
            if let Some((ticker, tier)) = self.ticker_cache.get(&key) {
                let attribution = FetchAttribution {
                    venue: venue.clone(),
                    cache_tier: Some(tier),
                    latency_ms: 0,
                    sequence: ticker.sequence,
                    source_tag: source_tag(venue, "ticker", Utc::now().timestamp_millis()),
                };
                return (Ok(Fetched { value: ticker, attribution }), attempts);
            }

            let handle = self.handle(venue).expect("chain venues are registered");

            match self
                .fetch_ticker_from_venue(handle, symbol, cancel, &mut attempts)
                .await
            {
                Ok(fetched) => {
                    self.ticker_cache.set(key, fetched.value.clone(), CacheTier::Hot);
                    return (Ok(fetched), attempts);
                }
                Err(ScanError::CancelledOrTimeout) => {
                    return (Err(ScanError::CancelledOrTimeout), attempts)
                }
                Err(err) => {
                    debug!(venue, symbol = %symbol.symbol, error = %err, "venue failed, trying next");
                }
            }
        }

        (
            Err(ScanError::AllVenuesFailed {
                symbol: symbol.symbol.clone(),
            }),
            attempts,
        )
    }

    /// One venue's ticker fetch — same admission and bounded-retry policy as
    /// the order-book path.
    async fn fetch_ticker_from_venue(
        &self,
        handle: &ProviderHandle,
        symbol: &SymbolEntry,
        cancel: &CancellationToken,
        attempts: &mut Vec<AttemptRecord>,
    ) -> Result<Fetched<Ticker>, ScanError> {
        let venue = handle.name.as_str();
        let mut attempt = 0u32;

        loop {
            if let Err(err) = handle.limiter.admit(cancel).await {
                if let ScanError::BudgetExhausted { .. } = err {
                    self.mark_degraded(venue, handle.limiter.next_budget_reset());
                }
                attempts.push(AttemptRecord {
                    venue: venue.to_string(),
                    ok: false,
                    error_kind: Some(err.kind_tag().to_string()),
                });
                return Err(err);
            }

            let started = Instant::now();
            match handle.client.fetch_ticker(symbol).await {
                Ok(ticker) => {
                    let latency_ms = started.elapsed().as_millis() as u64;
                    handle.limiter.record_success();
                    self.health.record(venue, true, latency_ms);
                    attempts.push(AttemptRecord {
                        venue: venue.to_string(),
                        ok: true,
                        error_kind: None,
                    });
                    let attribution = FetchAttribution {
                        venue: venue.to_string(),
                        cache_tier: None,
                        latency_ms,
                        sequence: ticker.sequence,
                        source_tag: source_tag(venue, "ticker", Utc::now().timestamp_millis()),
                    };
                    return Ok(Fetched { value: ticker, attribution });
                }
                Err(err) => {
                    let latency_ms = started.elapsed().as_millis() as u64;
                    if !matches!(err, ScanError::RateLimited { .. }) {
                        handle.limiter.record_failure();
                    }
                    self.health.record(venue, false, latency_ms);
                    attempts.push(AttemptRecord {
                        venue: venue.to_string(),
                        ok: false,
                        error_kind: Some(err.kind_tag().to_string()),
                    });

                    if err.is_retryable() && attempt < MAX_RETRIES_PER_VENUE {
                        attempt += 1;
                        let delay = handle.limiter.backoff_delay(attempt - 1);
                        debug!(venue, ?delay, attempt, "retrying after backoff");
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => continue,
                            _ = cancel.cancelled() => return Err(ScanError::CancelledOrTimeout),
                        }
                    }
                    return Err(err);
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Trades
    // -------------------------------------------------------------------------

    pub async fn fetch_trades(
        &self,
        symbol: &SymbolEntry,
        since_ms: i64,
        preferred: Option<&str>,
        cancel: &CancellationToken,
    ) -> (Result<Fetched<Vec<Trade>>, ScanError>, Vec<AttemptRecord>) {
        let mut attempts = Vec::new();
        // Trades are exchange-native data: aggregators are excluded exactly
        // like books.
        let chain = self.venue_chain(symbol, preferred, true);

        for venue in &chain {
            if cancel.is_cancelled() {
                return (Err(ScanError::CancelledOrTimeout), attempts);
            }

            // Bucket by minute so closely spaced scans share one fetch.
            let key = cache_key(
                &[venue, &symbol.symbol, "trades"],
                Some((Utc::now().timestamp(), 60)),
            );
            if let Some((trades, tier)) = self.trades_cache.get(&key) {
                let attribution = FetchAttribution {
                    venue: venue.clone(),
                    cache_tier: Some(tier),
                    latency_ms: 0,
                    sequence: trades.last().map(|t| t.timestamp_ms as u64).unwrap_or(0),
                    source_tag: source_tag(venue, "trades", Utc::now().timestamp_millis()),
                };
                return (Ok(Fetched { value: trades, attribution }), attempts);
            }

            let handle = self.handle(venue).expect("chain venues are registered");

            match self
                .fetch_trades_from_venue(handle, symbol, since_ms, cancel, &mut attempts)
                .await
            {
                Ok(fetched) => {
                    self.trades_cache.set(key, fetched.value.clone(), CacheTier::Hot);
                    return (Ok(fetched), attempts);
                }
                Err(ScanError::CancelledOrTimeout) => {
                    return (Err(ScanError::CancelledOrTimeout), attempts)
                }
                Err(err) => {
                    debug!(venue, symbol = %symbol.symbol, error = %err, "venue failed, trying next");
                }
            }
        }

        (
            Err(ScanError::AllVenuesFailed {
                symbol: symbol.symbol.clone(),
            }),
            attempts,
        )
    }

    /// One venue's trades fetch — same admission and bounded-retry policy as
    /// the order-book path.
    async fn fetch_trades_from_venue(
        &self,
        handle: &ProviderHandle,
        symbol: &SymbolEntry,
        since_ms: i64,
        cancel: &CancellationToken,
        attempts: &mut Vec<AttemptRecord>,
    ) -> Result<Fetched<Vec<Trade>>, ScanError> {
        let venue = handle.name.as_str();
        let mut attempt = 0u32;

        loop {
            if let Err(err) = handle.limiter.admit(cancel).await {
                if let ScanError::BudgetExhausted { .. } = err {
                    self.mark_degraded(venue, handle.limiter.next_budget_reset());
                }
                attempts.push(AttemptRecord {
                    venue: venue.to_string(),
                    ok: false,
                    error_kind: Some(err.kind_tag().to_string()),
                });
                return Err(err);
            }

            let started = Instant::now();
            match handle.client.fetch_trades(symbol, since_ms).await {
                Ok(trades) => {
                    let latency_ms = started.elapsed().as_millis() as u64;
                    handle.limiter.record_success();
                    self.health.record(venue, true, latency_ms);
                    attempts.push(AttemptRecord {
                        venue: venue.to_string(),
                        ok: true,
                        error_kind: None,
                    });
                    let attribution = FetchAttribution {
                        venue: venue.to_string(),
                        cache_tier: None,
                        latency_ms,
                        sequence: trades.last().map(|t| t.timestamp_ms as u64).unwrap_or(0),
                        source_tag: source_tag(venue, "trades", Utc::now().timestamp_millis()),
                    };
                    return Ok(Fetched { value: trades, attribution });
                }
                Err(err) => {
                    let latency_ms = started.elapsed().as_millis() as u64;
                    if !matches!(err, ScanError::RateLimited { .. }) {
                        handle.limiter.record_failure();
                    }
                    self.health.record(venue, false, latency_ms);
                    attempts.push(AttemptRecord {
                        venue: venue.to_string(),
                        ok: false,
                        error_kind: Some(err.kind_tag().to_string()),
                    });

                    if err.is_retryable() && attempt < MAX_RETRIES_PER_VENUE {
                        attempt += 1;
                        let delay = handle.limiter.backoff_delay(attempt - 1);
                        debug!(venue, ?delay, attempt, "retrying after backoff");
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => continue,
                            _ = cancel.cancelled() => return Err(ScanError::CancelledOrTimeout),
                        }
                    }
                    return Err(err);
                }
            }
        }
    }
}

// =============================================================================
// Unit Tests — scripted venues
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use crate::config::{GlobalConfig, ProviderConfig};
    use crate::market_data::BookLevel;

    fn make_book(symbol: &str, venue: &str) -> OrderBook {
        OrderBook {
            symbol: symbol.to_string(),
            venue: venue.to_string(),
            fetched_at: Instant::now(),
            fetched_at_ms: 1_700_000_000_000,
            sequence: 1,
            bids: vec![BookLevel { price: 99.9, size: 10.0 }],
            asks: vec![BookLevel { price: 100.1, size: 10.0 }],
        }
    }

    /// Venue client that replays scripted queues of responses. An empty
    /// ticker queue serves a default ticker.
    struct ScriptedVenue {
        name: &'static str,
        books: Mutex<VecDeque<Result<OrderBook, ScanError>>>,
        tickers: Mutex<VecDeque<Result<Ticker, ScanError>>>,
    }

    impl ScriptedVenue {
        fn new(name: &'static str, books: Vec<Result<OrderBook, ScanError>>) -> Self {
            Self {
                name,
                books: Mutex::new(books.into()),
                tickers: Mutex::new(VecDeque::new()),
            }
        }

        fn with_tickers(self, tickers: Vec<Result<Ticker, ScanError>>) -> Self {
            *self.tickers.lock() = tickers.into();
            self
        }

        fn default_ticker(venue: &str, symbol: &str) -> Ticker {
            Ticker {
                symbol: symbol.to_string(),
                venue: venue.to_string(),
                last_price: 100.0,
                volume_24h_usd: 1_000_000.0,
                market_cap_usd: None,
                fetched_at: Instant::now(),
                sequence: 1,
            }
        }
    }

    #[async_trait]
    impl VenueClient for ScriptedVenue {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn fetch_order_book(&self, symbol: &SymbolEntry) -> Result<OrderBook, ScanError> {
            self.books.lock().pop_front().unwrap_or_else(|| {
                Err(ScanError::EmptyBook {
                    venue: self.name.to_string(),
                    symbol: symbol.symbol.clone(),
                })
            })
        }

        async fn fetch_ticker(&self, symbol: &SymbolEntry) -> Result<Ticker, ScanError> {
            self.tickers
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(Self::default_ticker(self.name, &symbol.symbol)))
        }

        async fn fetch_trades(
            &self,
            _symbol: &SymbolEntry,
            _since_ms: i64,
        ) -> Result<Vec<Trade>, ScanError> {
            Ok(Vec::new())
        }
    }

    fn provider_cfg(daily_budget: u32) -> ProviderConfig {
        ProviderConfig {
            base_url: "https://example.test".to_string(),
            requests_per_sec: 100.0,
            burst: 100,
            daily_budget,
            ttl_seconds: 300,
            backoff: Default::default(),
            circuit: Default::default(),
            enabled: true,
            user_agent: "test".to_string(),
        }
    }

    fn handle(name: &'static str, client: ScriptedVenue, daily_budget: u32) -> ProviderHandle {
        ProviderHandle {
            name: name.to_string(),
            client: Arc::new(client),
            limiter: Arc::new(ProviderLimiter::new(
                name,
                &provider_cfg(daily_budget),
                &GlobalConfig::default(),
            )),
            enabled: true,
        }
    }

    fn symbol(canonical: &str, preferred: &str, fallbacks: &[&str]) -> SymbolEntry {
        let mut venues = HashMap::new();
        venues.insert(preferred.to_string(), canonical.to_string());
        for venue in fallbacks {
            venues.insert(venue.to_string(), canonical.to_string());
        }
        SymbolEntry {
            symbol: canonical.to_string(),
            venues,
            priority: 1,
            tier: "majors".to_string(),
            preferred_venue: preferred.to_string(),
            fallbacks: fallbacks.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_stores_hot_and_second_read_hits_cache() {
        let fabric = ProviderFabric::new(
            vec![handle(
                "kraken",
                ScriptedVenue::new("kraken", vec![Ok(make_book("BTCUSD", "kraken"))]),
                1000,
            )],
            Duration::from_secs(300),
        );
        let cancel = CancellationToken::new();
        let sym = symbol("BTCUSD", "kraken", &[]);

        let (result, attempts) = fabric.fetch_order_book(&sym, None, &cancel).await;
        let fetched = result.unwrap();
        assert_eq!(fetched.attribution.venue, "kraken");
        assert!(fetched.attribution.cache_tier.is_none());
        assert_eq!(attempts.len(), 1);
        assert!(attempts[0].ok);

        // Second read: hot cache, no further venue attempt.
        let (result, attempts) = fabric.fetch_order_book(&sym, None, &cancel).await;
        let fetched = result.unwrap();
        assert_eq!(fetched.attribution.cache_tier, Some(CacheTier::Hot));
        assert!(attempts.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failover_to_next_venue_in_chain() {
        let kraken = ScriptedVenue::new(
            "kraken",
            vec![
                Err(ScanError::TransientNetwork("HTTP 503".to_string())),
                Err(ScanError::TransientNetwork("HTTP 503".to_string())),
            ],
        );
        let okx = ScriptedVenue::new("okx", vec![Ok(make_book("BTCUSD", "okx"))]);

        let fabric = ProviderFabric::new(
            vec![handle("kraken", kraken, 1000), handle("okx", okx, 1000)],
            Duration::from_secs(300),
        );
        let cancel = CancellationToken::new();
        let sym = symbol("BTCUSD", "kraken", &["okx", "binance"]);

        let (result, attempts) = fabric.fetch_order_book(&sym, None, &cancel).await;
        let fetched = result.unwrap();
        assert_eq!(fetched.attribution.venue, "okx");
        assert_eq!(fetched.value.venue, "okx");

        // kraken: initial try + one bounded retry, then okx success.
        let kraken_failures = attempts
            .iter()
            .filter(|a| a.venue == "kraken" && !a.ok)
            .count();
        assert_eq!(kraken_failures, 2);
        assert!(attempts.iter().any(|a| a.venue == "okx" && a.ok));
    }

    #[tokio::test(start_paused = true)]
    async fn budget_exhaustion_degrades_for_the_day() {
        let kraken = ScriptedVenue::new(
            "kraken",
            vec![
                Ok(make_book("BTCUSD", "kraken")),
                Ok(make_book("ETHUSD", "kraken")),
            ],
        );
        let okx = ScriptedVenue::new(
            "okx",
            vec![
                Ok(make_book("ETHUSD", "okx")),
                Ok(make_book("SOLUSD", "okx")),
            ],
        );

        // kraken budget of exactly 1.
        let fabric = ProviderFabric::new(
            vec![handle("kraken", kraken, 1), handle("okx", okx, 1000)],
            Duration::from_secs(300),
        );
        let cancel = CancellationToken::new();

        // First call spends kraken's whole budget.
        let (result, _) = fabric
            .fetch_order_book(&symbol("BTCUSD", "kraken", &["okx"]), None, &cancel)
            .await;
        assert_eq!(result.unwrap().attribution.venue, "kraken");

        // Second call: kraken denied with BudgetExhausted, okx serves.
        let (result, attempts) = fabric
            .fetch_order_book(&symbol("ETHUSD", "kraken", &["okx"]), None, &cancel)
            .await;
        assert_eq!(result.unwrap().attribution.venue, "okx");
        assert!(attempts
            .iter()
            .any(|a| a.venue == "kraken" && a.error_kind.as_deref() == Some("budget_exhausted")));

        // Third call: kraken is degraded and silently absent from the chain.
        let (result, attempts) = fabric
            .fetch_order_book(&symbol("SOLUSD", "kraken", &["okx"]), None, &cancel)
            .await;
        assert_eq!(result.unwrap().attribution.venue, "okx");
        assert!(attempts.iter().all(|a| a.venue != "kraken"));
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_retries_same_venue_before_giving_up() {
        // One transient ticker failure, then success — the bounded retry
        // must recover on the same venue instead of abandoning the chain.
        let kraken = ScriptedVenue::new("kraken", Vec::new()).with_tickers(vec![
            Err(ScanError::TransientNetwork("HTTP 502".to_string())),
            Ok(ScriptedVenue::default_ticker("kraken", "BTCUSD")),
        ]);
        let fabric = ProviderFabric::new(
            vec![handle("kraken", kraken, 1000)],
            Duration::from_secs(300),
        );
        let cancel = CancellationToken::new();

        let (result, attempts) = fabric
            .fetch_ticker(&symbol("BTCUSD", "kraken", &[]), None, &cancel)
            .await;
        let fetched = result.unwrap();
        assert_eq!(fetched.attribution.venue, "kraken");

        assert_eq!(attempts.len(), 2);
        assert!(!attempts[0].ok);
        assert!(attempts[1].ok);
    }

    #[tokio::test(start_paused = true)]
    async fn all_venues_failed_when_chain_exhausts() {
        let kraken = ScriptedVenue::new(
            "kraken",
            vec![
                Err(ScanError::InvalidResponse {
                    venue: "kraken".to_string(),
                    detail: "bad json".to_string(),
                }),
            ],
        );
        let fabric = ProviderFabric::new(
            vec![handle("kraken", kraken, 1000)],
            Duration::from_secs(300),
        );
        let cancel = CancellationToken::new();

        let (result, attempts) = fabric
            .fetch_order_book(&symbol("BTCUSD", "kraken", &[]), None, &cancel)
            .await;
        assert!(matches!(result, Err(ScanError::AllVenuesFailed { .. })));
        assert_eq!(attempts.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_short_circuits() {
        let fabric = ProviderFabric::new(
            vec![handle(
                "kraken",
                ScriptedVenue::new("kraken", vec![Ok(make_book("BTCUSD", "kraken"))]),
                1000,
            )],
            Duration::from_secs(300),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (result, _) = fabric
            .fetch_order_book(&symbol("BTCUSD", "kraken", &[]), None, &cancel)
            .await;
        assert!(matches!(result, Err(ScanError::CancelledOrTimeout)));
    }
}
