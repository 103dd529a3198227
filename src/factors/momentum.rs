// =============================================================================
// MomentumCore — the protected factor
// =============================================================================
//
// Weighted sum of returns over multiple horizons. In the default regimes the
// horizons are 1h/4h/12h/24h; the trending regime shifts weight toward the
// longer end and adds a 7d horizon. Both weight tables sum to 1.0.
//
// An acceleration boost rewards building 4h momentum:
//   boost = tanh(|accel4h| / 5) * 2.0 * sign(accel4h)
//
// MomentumCore is deterministic given its inputs and passes through the
// orthogonalizer bit-exact — nothing downstream may rescale it.
// =============================================================================

use crate::errors::ScanError;
use crate::market_data::MarketSeries;
use crate::types::Regime;

/// (horizon hours, weight) for the calm/choppy/high-vol regimes.
pub const DEFAULT_RETURN_WEIGHTS: [(usize, f64); 4] =
    [(1, 0.20), (4, 0.35), (12, 0.30), (24, 0.15)];

/// (horizon hours, weight) for the trending regime; adds the 7d horizon.
pub const TRENDING_RETURN_WEIGHTS: [(usize, f64); 5] =
    [(1, 0.15), (4, 0.30), (12, 0.25), (24, 0.20), (168, 0.10)];

/// Scale of the tanh acceleration boost.
const BOOST_SCALE: f64 = 2.0;
/// Acceleration (pct points) at which the boost saturates toward its scale.
const BOOST_KNEE: f64 = 5.0;

/// Compute the protected MomentumCore factor for one symbol.
///
/// Fails with `ValidationFailure` when the series is too short for any
/// required horizon or the result is non-finite.
pub fn momentum_core(series: &MarketSeries, regime: Regime) -> Result<f64, ScanError> {
    let weights: &[(usize, f64)] = if regime.is_trending() {
        &TRENDING_RETURN_WEIGHTS
    } else {
        &DEFAULT_RETURN_WEIGHTS
    };

    debug_assert!(
        (weights.iter().map(|(_, w)| w).sum::<f64>() - 1.0).abs() < 1e-9,
        "momentum return weights must sum to 1.0"
    );

    let mut base = 0.0;
    for &(hours, weight) in weights {
        let ret = series.return_pct(hours).ok_or_else(|| {
            ScanError::ValidationFailure(format!(
                "{}: insufficient history for {hours}h return",
                series.symbol
            ))
        })?;
        base += weight * ret;
    }

    let accel = series.accel_4h().unwrap_or(0.0);
    let boost = (accel.abs() / BOOST_KNEE).tanh() * BOOST_SCALE * accel.signum();

    let momentum = base + boost;
    if !momentum.is_finite() {
        return Err(ScanError::ValidationFailure(format!(
            "{}: non-finite momentum core",
            series.symbol
        )));
    }

    Ok(momentum)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::Candle;

    fn series_from_closes(closes: &[f64]) -> MarketSeries {
        MarketSeries {
            symbol: "BTCUSD".to_string(),
            hourly_candles: closes
                .iter()
                .enumerate()
                .map(|(i, &c)| Candle::new(i as i64 * 3_600_000, c, c, c, c, 1000.0, 0))
                .collect(),
            volume_24h_usd: 1_000_000.0,
            ..Default::default()
        }
    }

    #[test]
    fn weight_tables_sum_to_one() {
        let default_sum: f64 = DEFAULT_RETURN_WEIGHTS.iter().map(|(_, w)| w).sum();
        let trending_sum: f64 = TRENDING_RETURN_WEIGHTS.iter().map(|(_, w)| w).sum();
        assert!((default_sum - 1.0).abs() < 1e-12);
        assert!((trending_sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn flat_series_scores_zero() {
        let series = series_from_closes(&[100.0; 30]);
        let momentum = momentum_core(&series, Regime::Choppy).unwrap();
        assert!(momentum.abs() < 1e-12, "got {momentum}");
    }

    #[test]
    fn momentum_matches_weighted_returns() {
        // 30 bars ending in a last-bar jump: only horizons spanning the jump
        // see a return.
        let mut closes = vec![100.0; 29];
        closes.push(110.0); // +10% over every horizon
        let series = series_from_closes(&closes);

        let base: f64 = DEFAULT_RETURN_WEIGHTS.iter().map(|(_, w)| w * 10.0).sum();
        let accel = series.accel_4h().unwrap();
        let expected = base + (accel.abs() / 5.0).tanh() * 2.0 * accel.signum();

        let momentum = momentum_core(&series, Regime::Choppy).unwrap();
        assert!(
            (momentum - expected).abs() < 1e-9,
            "got {momentum}, expected {expected}"
        );
    }

    #[test]
    fn trending_regime_requires_7d_history() {
        let series = series_from_closes(&[100.0; 30]);
        // 30 bars cannot produce a 168h return.
        assert!(momentum_core(&series, Regime::Trending).is_err());

        let series = series_from_closes(&vec![100.0; 170]);
        assert!(momentum_core(&series, Regime::Trending).is_ok());
    }

    #[test]
    fn boost_sign_follows_acceleration() {
        // Accelerating up: boost positive.
        let mut closes = vec![100.0; 25];
        closes.extend([100.5, 101.5, 103.0, 105.0]);
        let up = series_from_closes(&closes);
        let accel = up.accel_4h().unwrap();
        assert!(accel > 0.0);

        let with_boost = momentum_core(&up, Regime::Choppy).unwrap();
        let base: f64 = DEFAULT_RETURN_WEIGHTS
            .iter()
            .map(|(h, w)| w * up.return_pct(*h).unwrap())
            .sum();
        assert!(with_boost > base, "boost should add, {with_boost} <= {base}");
    }

    #[test]
    fn boost_saturates_at_scale() {
        // Huge acceleration: |boost| approaches 2.0 but never exceeds it.
        let mut closes = vec![100.0; 25];
        closes.extend([120.0, 150.0, 200.0, 300.0]);
        let series = series_from_closes(&closes);

        let base: f64 = DEFAULT_RETURN_WEIGHTS
            .iter()
            .map(|(h, w)| w * series.return_pct(*h).unwrap())
            .sum();
        let momentum = momentum_core(&series, Regime::Choppy).unwrap();
        let boost = momentum - base;
        assert!(boost > 1.9 && boost <= 2.0, "boost {boost} out of range");
    }

    #[test]
    fn determinism() {
        let mut closes = vec![100.0; 25];
        closes.extend([101.0, 102.5, 103.0, 104.8]);
        let series = series_from_closes(&closes);
        let a = momentum_core(&series, Regime::Choppy).unwrap();
        let b = momentum_core(&series, Regime::Choppy).unwrap();
        assert_eq!(a.to_bits(), b.to_bits());
    }
}
