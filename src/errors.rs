// =============================================================================
// Error taxonomy for the Borealis scanner
// =============================================================================
//
// Every fallible path in the scanner maps onto one of these kinds. Retryable
// errors (transient network, rate limits, open circuits past cooldown) are
// handled locally with bounded retry; non-retryable errors surface to the
// caller immediately. `AllVenuesFailed` for a single symbol never aborts a
// scan — the symbol is dropped and counted in the summary.
// =============================================================================

use thiserror::Error;

/// Unified error type for all scanner subsystems.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Network-level failure (connect, timeout, 5xx). Retryable.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// The provider's rate limiter denied admission. Retryable with backoff.
    #[error("rate limited by {venue} (retry after {retry_after_ms} ms)")]
    RateLimited { venue: String, retry_after_ms: u64 },

    /// The provider's daily request budget is spent. Fatal until the next
    /// UTC reset — the fabric marks the provider degraded for the day.
    #[error("daily budget exhausted for {venue}")]
    BudgetExhausted { venue: String },

    /// The provider's circuit breaker is open. Retryable after cooldown.
    #[error("circuit open for {venue} (cooldown {cooldown_ms} ms)")]
    CircuitOpen { venue: String, cooldown_ms: u64 },

    /// The venue returned a response we could not validate or parse.
    #[error("invalid response from {venue}: {detail}")]
    InvalidResponse { venue: String, detail: String },

    /// The venue returned an order book with no bids or no asks.
    #[error("empty order book from {venue} for {symbol}")]
    EmptyBook { venue: String, symbol: String },

    /// Every venue in the fallback chain failed for this symbol.
    #[error("all venues failed for {symbol}")]
    AllVenuesFailed { symbol: String },

    /// A pipeline integrity check failed (non-finite factor, weight sum
    /// violation, axis length mismatch).
    #[error("validation failure: {0}")]
    ValidationFailure(String),

    /// The scan context was cancelled or the scan deadline passed.
    #[error("scan cancelled or timed out")]
    CancelledOrTimeout,

    /// The injected configuration failed validation.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
}

impl ScanError {
    /// Whether a bounded local retry is worthwhile for this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientNetwork(_) | Self::RateLimited { .. } | Self::CircuitOpen { .. }
        )
    }

    /// Stable machine-readable tag, used for per-error counts in the scan
    /// summary.
    pub fn kind_tag(&self) -> &'static str {
        match self {
            Self::TransientNetwork(_) => "transient_network",
            Self::RateLimited { .. } => "rate_limited",
            Self::BudgetExhausted { .. } => "budget_exhausted",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::InvalidResponse { .. } => "invalid_response",
            Self::EmptyBook { .. } => "empty_book",
            Self::AllVenuesFailed { .. } => "all_venues_failed",
            Self::ValidationFailure(_) => "validation_failure",
            Self::CancelledOrTimeout => "cancelled_or_timeout",
            Self::ConfigInvalid(_) => "config_invalid",
        }
    }
}

impl From<reqwest::Error> for ScanError {
    fn from(err: reqwest::Error) -> Self {
        Self::TransientNetwork(err.to_string())
    }
}
