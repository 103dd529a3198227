// =============================================================================
// Provider Health Monitor — EWMA latency and sliding error-rate window
// =============================================================================
//
// Every fabric request records `(ok, latency)` per provider. The monitor
// keeps an EWMA of latency, a sliding window of recent outcomes, and a ring
// of raw latencies for a p99 estimate. A provider is flagged degraded when
// its error rate exceeds 10% over a sufficiently populated window.
//
// The p99 estimate feeds the late-fill guard's infrastructure precondition.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Outcomes retained per provider.
const WINDOW_SIZE: usize = 50;
/// Minimum samples before the degraded flag can assert.
const MIN_SAMPLES: usize = 10;
/// Error rate above which a provider is degraded.
const DEGRADED_ERROR_RATE: f64 = 0.10;
/// EWMA smoothing factor for latency.
const EWMA_ALPHA: f64 = 0.2;

#[derive(Default)]
struct ProviderHealth {
    ewma_latency_ms: f64,
    outcomes: VecDeque<bool>,
    latencies: VecDeque<u64>,
    total: u64,
    errors: u64,
    degraded_logged: bool,
}

/// Serialisable per-provider health snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealthSnapshot {
    pub ewma_latency_ms: f64,
    pub error_rate: f64,
    pub p99_latency_ms: Option<u64>,
    pub total_requests: u64,
    pub degraded: bool,
}

/// Process-wide request health per provider.
#[derive(Default)]
pub struct HealthMonitor {
    providers: RwLock<HashMap<String, ProviderHealth>>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one request outcome.
    pub fn record(&self, venue: &str, ok: bool, latency_ms: u64) {
        let mut providers = self.providers.write();
        let health = providers.entry(venue.to_string()).or_default();

        health.total += 1;
        if !ok {
            health.errors += 1;
        }

        health.outcomes.push_back(ok);
        while health.outcomes.len() > WINDOW_SIZE {
            health.outcomes.pop_front();
        }

        health.latencies.push_back(latency_ms);
        while health.latencies.len() > WINDOW_SIZE {
            health.latencies.pop_front();
        }

        health.ewma_latency_ms = if health.total == 1 {
            latency_ms as f64
        } else {
            EWMA_ALPHA * latency_ms as f64 + (1.0 - EWMA_ALPHA) * health.ewma_latency_ms
        };

        let degraded = window_degraded(health);
        if degraded && !health.degraded_logged {
            health.degraded_logged = true;
            warn!(
                venue,
                error_rate = format!("{:.2}", window_error_rate(health)),
                "provider degraded — error rate over threshold"
            );
        } else if !degraded {
            health.degraded_logged = false;
        }
    }

    /// Error rate over the sliding window, in [0, 1].
    pub fn error_rate(&self, venue: &str) -> f64 {
        self.providers
            .read()
            .get(venue)
            .map(window_error_rate)
            .unwrap_or(0.0)
    }

    /// Degraded when the windowed error rate exceeds 10% with enough
    /// samples.
    pub fn is_degraded(&self, venue: &str) -> bool {
        self.providers
            .read()
            .get(venue)
            .map(window_degraded)
            .unwrap_or(false)
    }

    /// p99 latency over the recent window.
    pub fn p99_latency_ms(&self, venue: &str) -> Option<u64> {
        let providers = self.providers.read();
        let health = providers.get(venue)?;
        percentile_99(&health.latencies)
    }

    pub fn ewma_latency_ms(&self, venue: &str) -> Option<f64> {
        let providers = self.providers.read();
        providers.get(venue).map(|h| h.ewma_latency_ms)
    }

    /// Snapshot of every tracked provider.
    pub fn snapshot(&self) -> HashMap<String, ProviderHealthSnapshot> {
        let providers = self.providers.read();
        providers
            .iter()
            .map(|(venue, health)| {
                (
                    venue.clone(),
                    ProviderHealthSnapshot {
                        ewma_latency_ms: health.ewma_latency_ms,
                        error_rate: window_error_rate(health),
                        p99_latency_ms: percentile_99(&health.latencies),
                        total_requests: health.total,
                        degraded: window_degraded(health),
                    },
                )
            })
            .collect()
    }
}

fn window_error_rate(health: &ProviderHealth) -> f64 {
    if health.outcomes.is_empty() {
        return 0.0;
    }
    let errors = health.outcomes.iter().filter(|&&ok| !ok).count();
    errors as f64 / health.outcomes.len() as f64
}

fn window_degraded(health: &ProviderHealth) -> bool {
    health.outcomes.len() >= MIN_SAMPLES && window_error_rate(health) > DEGRADED_ERROR_RATE
}

fn percentile_99(latencies: &VecDeque<u64>) -> Option<u64> {
    if latencies.is_empty() {
        return None;
    }
    let mut sorted: Vec<u64> = latencies.iter().copied().collect();
    sorted.sort_unstable();
    let idx = ((sorted.len() as f64) * 0.99).ceil() as usize - 1;
    sorted.get(idx.min(sorted.len() - 1)).copied()
}
