// =============================================================================
// Scanner Configuration — typed, validated, hot-reload friendly
// =============================================================================
//
// Central configuration hub for the scanner: the symbol universe, per-provider
// network policy (rate, budget, circuit, backoff), global concurrency knobs,
// regime weight vectors, and guard thresholds.
//
// Every field carries `#[serde(default)]` so that adding new fields never
// breaks loading an older config file. Persistence uses an atomic
// tmp + rename pattern to prevent corruption on crash. The core consumes the
// validated struct; file loading is only exercised by the binary.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::ScanError;
use crate::gates::GuardsConfig;
use crate::pipeline::weights::RegimeWeights;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_requests_per_sec() -> f64 {
    1.0
}

fn default_burst() -> u32 {
    3
}

fn default_daily_budget() -> u32 {
    10_000
}

fn default_ttl_seconds() -> u64 {
    300
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_max_ms() -> u64 {
    60_000
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    3
}

fn default_circuit_timeout_ms() -> u64 {
    30_000
}

fn default_user_agent() -> String {
    "borealis-scanner/1.0".to_string()
}

fn default_max_concurrent_requests() -> usize {
    5
}

fn default_inter_request_delay_ms() -> u64 {
    100
}

fn default_budget_warn_threshold() -> f64 {
    0.8
}

fn default_http_timeout_secs() -> u64 {
    10
}

fn default_priority() -> u32 {
    100
}

fn default_tier() -> String {
    "mid".to_string()
}

// =============================================================================
// Universe
// =============================================================================

/// One scannable symbol with its venue routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolEntry {
    /// Canonical symbol, uppercase with a USD quote suffix (e.g. "BTCUSD").
    pub symbol: String,

    /// Venue name → venue-native pair string (e.g. kraken → "XBTUSD").
    pub venues: HashMap<String, String>,

    /// Lower is higher priority; breaks composite-score ties.
    #[serde(default = "default_priority")]
    pub priority: u32,

    /// Tier tag used by the scan request's tier filter.
    #[serde(default = "default_tier")]
    pub tier: String,

    /// First venue to try.
    pub preferred_venue: String,

    /// Venues to try, in order, after the preferred venue fails.
    #[serde(default)]
    pub fallbacks: Vec<String>,
}

impl SymbolEntry {
    /// The venue-native pair string for `venue`, if this symbol trades there.
    pub fn pair_for(&self, venue: &str) -> Option<&str> {
        self.venues.get(venue).map(String::as_str)
    }

    /// Canonical symbol must match `^[A-Z0-9]+USD$` and carry at least one
    /// venue mapping.
    pub fn validate(&self) -> Result<(), ScanError> {
        let well_formed = self.symbol.len() > 3
            && self.symbol.ends_with("USD")
            && self
                .symbol
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
        if !well_formed {
            return Err(ScanError::ConfigInvalid(format!(
                "symbol '{}' does not match ^[A-Z0-9]+USD$",
                self.symbol
            )));
        }
        if self.venues.is_empty() {
            return Err(ScanError::ConfigInvalid(format!(
                "symbol '{}' has no venue mappings",
                self.symbol
            )));
        }
        if !self.venues.contains_key(&self.preferred_venue) {
            return Err(ScanError::ConfigInvalid(format!(
                "symbol '{}' preferred venue '{}' has no pair mapping",
                self.symbol, self.preferred_venue
            )));
        }
        Ok(())
    }
}

/// The configured symbol universe.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UniverseConfig {
    #[serde(default)]
    pub symbols: Vec<SymbolEntry>,
}

// =============================================================================
// Providers
// =============================================================================

/// Exponential backoff bounds for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_backoff_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: default_backoff_base_ms(),
            max_ms: default_backoff_max_ms(),
        }
    }
}

/// Circuit breaker tuning for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Consecutive failures before the circuit opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Consecutive half-open successes required to close.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// Upper bound on the open-state cooldown.
    #[serde(default = "default_circuit_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            timeout_ms: default_circuit_timeout_ms(),
        }
    }
}

/// Network policy for a single provider (venue).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Exchange-native REST base URL.
    pub base_url: String,

    /// Sustained token refill rate.
    #[serde(default = "default_requests_per_sec")]
    pub requests_per_sec: f64,

    /// Bucket capacity; must be at least the sustained rate.
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Hard daily request cap.
    #[serde(default = "default_daily_budget")]
    pub daily_budget: u32,

    /// Warm-tier cache TTL hint for this provider's data.
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,

    #[serde(default)]
    pub backoff: BackoffConfig,

    #[serde(default)]
    pub circuit: CircuitConfig,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl ProviderConfig {
    pub fn validate(&self, name: &str) -> Result<(), ScanError> {
        if self.requests_per_sec <= 0.0 {
            return Err(ScanError::ConfigInvalid(format!(
                "provider '{name}': requests_per_sec must be > 0"
            )));
        }
        if (self.burst as f64) < self.requests_per_sec {
            return Err(ScanError::ConfigInvalid(format!(
                "provider '{name}': burst {} below sustained rate {}",
                self.burst, self.requests_per_sec
            )));
        }
        if self.daily_budget == 0 {
            return Err(ScanError::ConfigInvalid(format!(
                "provider '{name}': daily_budget must be > 0"
            )));
        }
        if self.backoff.base_ms == 0 || self.backoff.max_ms < self.backoff.base_ms {
            return Err(ScanError::ConfigInvalid(format!(
                "provider '{name}': backoff bounds invalid"
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Global knobs
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Upper bound on concurrent per-symbol scans.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Global delay between task dispatches, to avoid hammering venues at
    /// scan start.
    #[serde(default = "default_inter_request_delay_ms")]
    pub inter_request_delay_ms: u64,

    /// Fraction of the daily budget at which a warning is logged.
    #[serde(default = "default_budget_warn_threshold")]
    pub budget_warn_threshold: f64,

    /// UTC hour at which daily budgets reset.
    #[serde(default)]
    pub budget_reset_hour_utc: u32,

    /// Per-request HTTP timeout.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: default_max_concurrent_requests(),
            inter_request_delay_ms: default_inter_request_delay_ms(),
            budget_warn_threshold: default_budget_warn_threshold(),
            budget_reset_hour_utc: 0,
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

// =============================================================================
// ScannerConfig
// =============================================================================

/// Top-level configuration injected into the scanner at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default)]
    pub universe: UniverseConfig,

    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    #[serde(default)]
    pub global: GlobalConfig,

    #[serde(default)]
    pub regime_weights: RegimeWeights,

    #[serde(default)]
    pub guards: GuardsConfig,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            universe: UniverseConfig::default(),
            providers: HashMap::new(),
            global: GlobalConfig::default(),
            regime_weights: RegimeWeights::default(),
            guards: GuardsConfig::default(),
        }
    }
}

impl ScannerConfig {
    /// Validate the full configuration tree.
    ///
    /// Weight vectors are checked both per-component ([0.05, 0.60]) and for
    /// the sum constraint (1.0 ± 0.001).
    pub fn validate(&self) -> Result<(), ScanError> {
        for entry in &self.universe.symbols {
            entry.validate()?;
        }
        for (name, provider) in &self.providers {
            provider.validate(name)?;
        }
        if self.global.max_concurrent_requests == 0 {
            return Err(ScanError::ConfigInvalid(
                "global.max_concurrent_requests must be > 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.global.budget_warn_threshold) {
            return Err(ScanError::ConfigInvalid(
                "global.budget_warn_threshold must be in [0, 1]".to_string(),
            ));
        }
        if self.global.budget_reset_hour_utc > 23 {
            return Err(ScanError::ConfigInvalid(
                "global.budget_reset_hour_utc must be in [0, 23]".to_string(),
            ));
        }
        self.regime_weights.validate()?;
        self.guards.validate()?;
        Ok(())
    }

    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scanner config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse scanner config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = config.universe.symbols.len(),
            providers = config.providers.len(),
            "scanner config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise scanner config")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "scanner config saved (atomic)");
        Ok(())
    }
}
