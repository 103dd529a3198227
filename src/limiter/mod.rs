// =============================================================================
// Provider Limiter — token bucket + daily budget + circuit breaker
// =============================================================================
//
// One `ProviderLimiter` per venue. Admission order:
//
//   1. Circuit preflight  — open circuit denies with remaining cooldown.
//   2. Daily budget spend — exhausted budget is fatal until the UTC reset.
//   3. Token bucket       — FIFO queue on the sustained rate.
//
// Denials back off on a utilization-calibrated ladder: the closer a provider
// is to its daily budget, the longer the base delay (1 s / 3 s / 10 s / 30 s),
// doubled per attempt, capped by the provider's configured maximum, plus
// 50–150 ms of jitter. The same ladder sizes the circuit's open cooldown.
//
// Responses carrying standard rate-limit headers update the budget counter
// and temporarily halve the effective request rate for `Retry-After` seconds.
// =============================================================================

pub mod circuit;
pub mod daily_budget;
pub mod token_bucket;

use std::time::Duration;

use rand::Rng;
use reqwest::header::HeaderMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{GlobalConfig, ProviderConfig};
use crate::errors::ScanError;

pub use circuit::{CircuitBreaker, CircuitState};
pub use daily_budget::DailyBudget;
pub use token_bucket::TokenBucket;

/// Temporary request rate applied while an upstream `Retry-After` is active.
const RETRY_AFTER_RATE: f64 = 0.5;

/// Jitter bounds added to every backoff delay.
const JITTER_MIN_MS: u64 = 50;
const JITTER_MAX_MS: u64 = 150;

/// Composed admission control for one provider.
pub struct ProviderLimiter {
    venue: String,
    bucket: TokenBucket,
    budget: DailyBudget,
    circuit: CircuitBreaker,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl ProviderLimiter {
    pub fn new(venue: impl Into<String>, provider: &ProviderConfig, global: &GlobalConfig) -> Self {
        let venue = venue.into();
        Self {
            bucket: TokenBucket::new(venue.clone(), provider.requests_per_sec, provider.burst),
            budget: DailyBudget::new(
                venue.clone(),
                provider.daily_budget,
                global.budget_reset_hour_utc,
                global.budget_warn_threshold,
            ),
            circuit: CircuitBreaker::new(
                venue.clone(),
                provider.circuit.failure_threshold,
                provider.circuit.success_threshold,
                Duration::from_millis(provider.circuit.timeout_ms),
            ),
            backoff_base: Duration::from_millis(provider.backoff.base_ms),
            backoff_max: Duration::from_millis(provider.backoff.max_ms),
            venue,
        }
    }

    /// Admit one request: circuit, then budget, then FIFO token queue.
    pub async fn admit(&self, cancel: &CancellationToken) -> Result<(), ScanError> {
        self.circuit.preflight()?;
        self.budget.try_spend()?;
        self.bucket.acquire(cancel).await
    }

    /// Record the outcome of an admitted request so the breaker can track
    /// consecutive failures.
    pub fn record_success(&self) {
        self.circuit.record_success();
    }

    pub fn record_failure(&self) {
        self.circuit.record_failure(self.cooldown());
    }

    /// Utilization-calibrated base delay: heavier budget use cools down
    /// longer before the next attempt.
    fn cooldown(&self) -> Duration {
        utilization_base(self.budget.utilization()).max(self.backoff_base)
    }

    /// Backoff delay for retry `attempt` (0-based): exponential over the
    /// utilization base, capped, plus jitter.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.cooldown();
        let exp = base.saturating_mul(1u32 << attempt.min(16));
        let capped = exp.min(self.backoff_max);
        let jitter = rand::thread_rng().gen_range(JITTER_MIN_MS..=JITTER_MAX_MS);
        capped + Duration::from_millis(jitter)
    }

    /// Ingest standard rate-limit response headers.
    ///
    /// `X-RateLimit-Used` synchronises the budget counter; `Retry-After`
    /// drops the effective request rate to 0.5 r/s for its duration.
    pub fn apply_response_headers(&self, headers: &HeaderMap) {
        if let Some(used) = header_u32(headers, "X-RateLimit-Used") {
            self.budget.sync_used(used);
        }

        if let Some(retry_after) = header_u32(headers, "Retry-After") {
            debug!(
                venue = %self.venue,
                retry_after_s = retry_after,
                "Retry-After received, lowering effective rate"
            );
            self.bucket
                .set_rate_override(RETRY_AFTER_RATE, Duration::from_secs(retry_after as u64));
        }
    }

    pub fn utilization(&self) -> f64 {
        self.budget.utilization()
    }

    /// When the daily budget window rolls over next (UTC).
    pub fn next_budget_reset(&self) -> chrono::DateTime<chrono::Utc> {
        self.budget.next_reset()
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit.state()
    }

    pub fn venue(&self) -> &str {
        &self.venue
    }
}

/// Utilization ladder for backoff bases and circuit cooldowns.
pub fn utilization_base(utilization: f64) -> Duration {
    if utilization > 0.90 {
        Duration::from_secs(30)
    } else if utilization > 0.75 {
        Duration::from_secs(10)
    } else if utilization > 0.50 {
        Duration::from_secs(3)
    } else {
        Duration::from_secs(1)
    }
}

fn header_u32(headers: &HeaderMap, name: &str) -> Option<u32> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackoffConfig, CircuitConfig};

    fn provider(rate: f64, burst: u32, budget: u32) -> ProviderConfig {
        ProviderConfig {
            base_url: "https://example.test".to_string(),
            requests_per_sec: rate,
            burst,
            daily_budget: budget,
            ttl_seconds: 300,
            backoff: BackoffConfig {
                base_ms: 1_000,
                max_ms: 60_000,
            },
            circuit: CircuitConfig {
                failure_threshold: 2,
                success_threshold: 1,
                timeout_ms: 30_000,
            },
            enabled: true,
            user_agent: "test".to_string(),
        }
    }

    #[test]
    fn utilization_ladder_tiers() {
        assert_eq!(utilization_base(0.95), Duration::from_secs(30));
        assert_eq!(utilization_base(0.80), Duration::from_secs(10));
        assert_eq!(utilization_base(0.60), Duration::from_secs(3));
        assert_eq!(utilization_base(0.10), Duration::from_secs(1));
        // Boundary values fall into the lower tier.
        assert_eq!(utilization_base(0.90), Duration::from_secs(10));
        assert_eq!(utilization_base(0.75), Duration::from_secs(3));
        assert_eq!(utilization_base(0.50), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn admit_then_budget_exhaustion() {
        let limiter = ProviderLimiter::new(
            "coingecko",
            &provider(100.0, 100, 1),
            &GlobalConfig::default(),
        );
        let cancel = CancellationToken::new();

        assert!(limiter.admit(&cancel).await.is_ok());
        match limiter.admit(&cancel).await {
            Err(ScanError::BudgetExhausted { venue }) => assert_eq!(venue, "coingecko"),
            other => panic!("expected BudgetExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn circuit_denies_after_failures() {
        let limiter =
            ProviderLimiter::new("kraken", &provider(100.0, 100, 1000), &GlobalConfig::default());
        let cancel = CancellationToken::new();

        assert!(limiter.admit(&cancel).await.is_ok());
        limiter.record_failure();
        limiter.record_failure();
        assert_eq!(limiter.circuit_state(), CircuitState::Open);
        assert!(matches!(
            limiter.admit(&cancel).await,
            Err(ScanError::CircuitOpen { .. })
        ));
    }

    #[test]
    fn backoff_grows_and_carries_jitter() {
        let limiter =
            ProviderLimiter::new("kraken", &provider(1.0, 3, 1000), &GlobalConfig::default());

        let d0 = limiter.backoff_delay(0);
        let d2 = limiter.backoff_delay(2);

        // Low utilization: base 1 s, so attempt 0 ∈ [1.05 s, 1.15 s].
        assert!(d0 >= Duration::from_millis(1_050));
        assert!(d0 <= Duration::from_millis(1_150));

        // Attempt 2: 4 s + jitter.
        assert!(d2 >= Duration::from_millis(4_050));
        assert!(d2 <= Duration::from_millis(4_150));
    }

    #[test]
    fn backoff_capped_at_max() {
        let mut cfg = provider(1.0, 3, 1000);
        cfg.backoff.max_ms = 5_000;
        let limiter = ProviderLimiter::new("kraken", &cfg, &GlobalConfig::default());

        let d = limiter.backoff_delay(10);
        assert!(d <= Duration::from_millis(5_150));
    }

    #[test]
    fn headers_sync_budget_and_rate() {
        let limiter =
            ProviderLimiter::new("kraken", &provider(4.0, 8, 1000), &GlobalConfig::default());

        let mut headers = HeaderMap::new();
        headers.insert("X-RateLimit-Used", "123".parse().unwrap());
        headers.insert("Retry-After", "7".parse().unwrap());
        limiter.apply_response_headers(&headers);

        assert!((limiter.utilization() - 0.123).abs() < 1e-9);
        assert!((limiter.bucket.effective_rate() - RETRY_AFTER_RATE).abs() < f64::EPSILON);
    }
}
