// =============================================================================
// Tiered TTL Cache — hot / warm / cold with promotion on hit
// =============================================================================
//
// Three TTL maps probed in order. A warm hit copies the entry into hot; a
// cold hit copies it into warm only (never straight into hot, so a burst of
// cold reads cannot pollute the hot tier). Expired entries are dropped lazily
// on read and by a per-tier periodic sweeper.
//
// Keys are deterministic colon-joined namespaced components, optionally
// bucketed by a timestamp floor so that callers within the same bucket share
// one cache region.
//
// Concurrency: each tier has its own `RwLock`; promotion writes the higher
// tier atomically, and a duplicate promotion simply overwrites with an equal
// value, which is harmless.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Which tier satisfied a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    Hot,
    Warm,
    Cold,
}

impl std::fmt::Display for CacheTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hot => write!(f, "hot"),
            Self::Warm => write!(f, "warm"),
            Self::Cold => write!(f, "cold"),
        }
    }
}

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

struct TierStore<V> {
    entries: RwLock<HashMap<String, Entry<V>>>,
    ttl: Duration,
    sweep_interval: Duration,
}

impl<V: Clone> TierStore<V> {
    fn new(ttl: Duration, sweep_interval: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            sweep_interval,
        }
    }

    /// Read a live entry; drop it lazily when expired.
    fn get(&self, key: &str) -> Option<V> {
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Some(entry.value.clone())
                }
                Some(_) => {}
                None => return None,
            }
        }
        // Expired: upgrade to a write lock and evict.
        self.entries.write().remove(key);
        None
    }

    fn set(&self, key: String, value: V) {
        self.entries.write().insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

/// Hot/warm/cold TTL store for one value type.
pub struct TieredCache<V: Clone + Send + Sync + 'static> {
    name: &'static str,
    hot: TierStore<V>,
    warm: TierStore<V>,
    cold: TierStore<V>,
}

/// Default hot-tier TTL (seconds).
pub const HOT_TTL_SECS: u64 = 300;
/// Default cold-tier TTL: long-horizon, hours.
pub const COLD_TTL_SECS: u64 = 4 * 3600;

const HOT_SWEEP_SECS: u64 = 60;
const WARM_SWEEP_SECS: u64 = 5 * 60;
const COLD_SWEEP_SECS: u64 = 15 * 60;

impl<V: Clone + Send + Sync + 'static> TieredCache<V> {
    /// Build a cache whose warm TTL honours the provider hint: the warm tier
    /// lives for the longer of 300 s and `provider_ttl`.
    pub fn new(name: &'static str, provider_ttl: Duration) -> Self {
        let warm_ttl = provider_ttl.max(Duration::from_secs(HOT_TTL_SECS));
        Self::with_ttls(
            name,
            Duration::from_secs(HOT_TTL_SECS),
            warm_ttl,
            Duration::from_secs(COLD_TTL_SECS),
        )
    }

    pub fn with_ttls(name: &'static str, hot: Duration, warm: Duration, cold: Duration) -> Self {
        Self {
            name,
            hot: TierStore::new(hot, Duration::from_secs(HOT_SWEEP_SECS)),
            warm: TierStore::new(warm, Duration::from_secs(WARM_SWEEP_SECS)),
            cold: TierStore::new(cold, Duration::from_secs(COLD_SWEEP_SECS)),
        }
    }

    /// Probe hot → warm → cold. Promotes on hit: warm → hot, cold → warm.
    pub fn get(&self, key: &str) -> Option<(V, CacheTier)> {
        if let Some(value) = self.hot.get(key) {
            trace!(cache = self.name, key, tier = "hot", "cache hit");
            return Some((value, CacheTier::Hot));
        }

        if let Some(value) = self.warm.get(key) {
            trace!(cache = self.name, key, tier = "warm", "cache hit, promoting to hot");
            self.hot.set(key.to_string(), value.clone());
            return Some((value, CacheTier::Warm));
        }

        if let Some(value) = self.cold.get(key) {
            // Promote one step only; cold traffic must not pollute hot.
            trace!(cache = self.name, key, tier = "cold", "cache hit, promoting to warm");
            self.warm.set(key.to_string(), value.clone());
            return Some((value, CacheTier::Cold));
        }

        None
    }

    /// Store `value` into `tier` with that tier's TTL.
    pub fn set(&self, key: impl Into<String>, value: V, tier: CacheTier) {
        let key = key.into();
        match tier {
            CacheTier::Hot => self.hot.set(key, value),
            CacheTier::Warm => self.warm.set(key, value),
            CacheTier::Cold => self.cold.set(key, value),
        }
    }

    /// Evict expired entries from every tier; returns the number removed.
    pub fn sweep_once(&self) -> usize {
        let removed = self.hot.sweep() + self.warm.sweep() + self.cold.sweep();
        if removed > 0 {
            debug!(cache = self.name, removed, "cache sweep evicted entries");
        }
        removed
    }

    /// Total live+expired entries across tiers (diagnostics).
    pub fn len(&self) -> usize {
        self.hot.len() + self.warm.len() + self.cold.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawn one background sweeper per tier. Sweepers stop when `cancel`
    /// fires.
    pub fn spawn_sweepers(self: &Arc<Self>, cancel: CancellationToken) {
        for interval in [
            self.hot.sweep_interval,
            self.warm.sweep_interval,
            self.cold.sweep_interval,
        ] {
            let cache = Arc::clone(self);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            cache.sweep_once();
                        }
                        _ = cancel.cancelled() => break,
                    }
                }
            });
        }
    }
}

/// Deterministic namespaced cache key: colon-joined `parts`, optionally
/// suffixed with `timestamp` floored to `bucket_secs`.
pub fn cache_key(parts: &[&str], bucket: Option<(i64, i64)>) -> String {
    let mut key = parts.join(":");
    if let Some((timestamp, bucket_secs)) = bucket {
        if bucket_secs > 0 {
            let floored = timestamp - timestamp.rem_euclid(bucket_secs);
            key.push(':');
            key.push_str(&floored.to_string());
        }
    }
    key
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> TieredCache<String> {
        TieredCache::with_ttls(
            "test",
            Duration::from_millis(50),
            Duration::from_millis(200),
            Duration::from_millis(500),
        )
    }

    #[test]
    fn set_get_roundtrip_within_ttl() {
        let c = cache();
        c.set("kraken:BTCUSD:orderbook", "book".to_string(), CacheTier::Hot);
        let (value, tier) = c.get("kraken:BTCUSD:orderbook").unwrap();
        assert_eq!(value, "book");
        assert_eq!(tier, CacheTier::Hot);
    }

    #[test]
    fn expired_entry_never_returned() {
        let c = cache();
        c.set("k", "v".to_string(), CacheTier::Hot);
        std::thread::sleep(Duration::from_millis(70));
        assert!(c.get("k").is_none());
    }

    #[test]
    fn warm_hit_promotes_to_hot() {
        let c = cache();
        c.set("k", "v".to_string(), CacheTier::Warm);

        let (_, tier) = c.get("k").unwrap();
        assert_eq!(tier, CacheTier::Warm);

        // Promotion means a second read hits hot.
        let (_, tier) = c.get("k").unwrap();
        assert_eq!(tier, CacheTier::Hot);
    }

    #[test]
    fn cold_hit_promotes_to_warm_not_hot() {
        let c = cache();
        c.set("k", "v".to_string(), CacheTier::Cold);

        let (_, tier) = c.get("k").unwrap();
        assert_eq!(tier, CacheTier::Cold);

        // One step only: next read is a warm hit, not hot.
        let (_, tier) = c.get("k").unwrap();
        assert_eq!(tier, CacheTier::Warm);

        // The warm hit then promotes to hot.
        let (_, tier) = c.get("k").unwrap();
        assert_eq!(tier, CacheTier::Hot);
    }

    #[test]
    fn sweep_evicts_expired_entries() {
        let c = cache();
        c.set("a", "1".to_string(), CacheTier::Hot);
        c.set("b", "2".to_string(), CacheTier::Warm);
        assert_eq!(c.len(), 2);

        std::thread::sleep(Duration::from_millis(70));
        let removed = c.sweep_once();
        assert_eq!(removed, 1); // hot expired, warm still live
        assert_eq!(c.len(), 1);

        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(c.sweep_once(), 1);
        assert!(c.is_empty());
    }

    #[test]
    fn warm_ttl_is_at_least_hot_default() {
        // Provider TTL shorter than the hot default: warm still lives 300 s.
        let c: TieredCache<String> = TieredCache::new("books", Duration::from_secs(30));
        assert_eq!(c.warm.ttl, Duration::from_secs(HOT_TTL_SECS));

        // Longer provider TTL wins.
        let c: TieredCache<String> = TieredCache::new("books", Duration::from_secs(900));
        assert_eq!(c.warm.ttl, Duration::from_secs(900));
    }

    #[test]
    fn key_derivation_is_deterministic() {
        let a = cache_key(&["kraken", "BTCUSD", "orderbook"], None);
        let b = cache_key(&["kraken", "BTCUSD", "orderbook"], None);
        assert_eq!(a, b);
        assert_eq!(a, "kraken:BTCUSD:orderbook");
    }

    #[test]
    fn key_bucketing_floors_timestamp() {
        let a = cache_key(&["okx", "ETHUSD", "trades"], Some((1_700_000_123, 60)));
        let b = cache_key(&["okx", "ETHUSD", "trades"], Some((1_700_000_150, 60)));
        let c = cache_key(&["okx", "ETHUSD", "trades"], Some((1_700_000_190, 60)));
        assert_eq!(a, b); // same 60 s bucket
        assert_ne!(a, c); // next bucket
        assert!(a.ends_with(":1700000100"));
    }
}
