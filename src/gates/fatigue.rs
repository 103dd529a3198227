// =============================================================================
// Fatigue Guard — blocks chasing an already-extended move
// =============================================================================
//
// Baseline: block when the 24h move exceeds +12% AND RSI(4h) is overbought
// (> 70). A big move that is not overbought, or overbought without the move,
// still passes.
//
// Trending profile (regime trending AND the accel-renewal flag set): the
// momentum block threshold widens to 18%, and 4h acceleration at or above
// the override threshold clears a block outright — fresh acceleration means
// the move is renewing, not exhausting.
// =============================================================================

use std::collections::HashMap;

use crate::gates::{FatigueThresholds, GateInput, GateProfile, GateResult};
use crate::types::Regime;

pub fn evaluate(input: &GateInput, thresholds: &FatigueThresholds, regime: Regime) -> GateResult {
    // Trending profile only with its safety precondition.
    let profile = if regime.is_trending() && input.accel_renewal {
        GateProfile::Trending
    } else {
        GateProfile::Baseline
    };

    let momentum_threshold = match profile {
        GateProfile::Baseline => thresholds.baseline_momentum_pct,
        GateProfile::Trending => thresholds.trending_momentum_pct,
    };

    let mut detail = HashMap::new();
    detail.insert("momentum_24h_pct".to_string(), input.momentum_24h_pct);
    detail.insert("momentum_threshold_pct".to_string(), momentum_threshold);
    detail.insert("rsi_4h".to_string(), input.rsi_4h);
    detail.insert("rsi_threshold".to_string(), thresholds.baseline_rsi);
    detail.insert("accel_4h_pct".to_string(), input.accel_4h_pct);

    let extended =
        input.momentum_24h_pct > momentum_threshold && input.rsi_4h > thresholds.baseline_rsi;

    if extended {
        // Acceleration override applies only under the trending profile.
        if profile == GateProfile::Trending && input.accel_4h_pct >= thresholds.accel_override_pct {
            detail.insert("accel_override".to_string(), 1.0);
            return GateResult::allow("accel_override", profile, regime, detail);
        }
        return GateResult::block("momentum_fatigue", profile, regime, detail);
    }

    GateResult::allow("ok", profile, regime, detail)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn input(momentum: f64, rsi: f64, accel: f64, accel_renewal: bool) -> GateInput {
        GateInput {
            momentum_24h_pct: momentum,
            rsi_4h: rsi,
            accel_4h_pct: accel,
            accel_renewal,
            ..Default::default()
        }
    }

    fn eval(input: &GateInput, regime: Regime) -> GateResult {
        evaluate(input, &FatigueThresholds::default(), regime)
    }

    #[test]
    fn baseline_blocks_extended_overbought() {
        // Momentum +15%, RSI 72: both conditions met.
        let result = eval(&input(15.0, 72.0, 3.0, false), Regime::Choppy);
        assert!(!result.allow);
        assert_eq!(result.reason, "momentum_fatigue");
        assert_eq!(result.profile, GateProfile::Baseline);
    }

    #[test]
    fn baseline_needs_both_conditions() {
        // Big move, not overbought.
        assert!(eval(&input(15.0, 65.0, 0.0, false), Regime::Choppy).allow);
        // Overbought, small move.
        assert!(eval(&input(8.0, 75.0, 0.0, false), Regime::Choppy).allow);
    }

    #[test]
    fn trending_with_renewal_widens_threshold() {
        // Momentum 15% < 18% trending threshold: allowed despite RSI 72.
        let result = eval(&input(15.0, 72.0, 3.0, true), Regime::Trending);
        assert!(result.allow);
        assert_eq!(result.profile, GateProfile::Trending);
    }

    #[test]
    fn trending_without_renewal_stays_baseline() {
        // Same numbers, accel_renewal false: baseline applies, block.
        let result = eval(&input(15.0, 72.0, 3.0, false), Regime::Trending);
        assert!(!result.allow);
        assert_eq!(result.profile, GateProfile::Baseline);
    }

    #[test]
    fn choppy_regime_never_uses_trending_profile() {
        // Renewal flag alone is not enough — the regime must be trending.
        let result = eval(&input(15.0, 72.0, 3.0, true), Regime::Choppy);
        assert!(!result.allow);
        assert_eq!(result.profile, GateProfile::Baseline);
    }

    #[test]
    fn accel_override_clears_trending_block() {
        // Beyond even the trending threshold, but accelerating hard.
        let result = eval(&input(20.0, 75.0, 3.0, true), Regime::Trending);
        assert!(result.allow);
        assert_eq!(result.reason, "accel_override");
    }

    #[test]
    fn trending_block_without_acceleration() {
        // Beyond the trending threshold and decelerating: block.
        let result = eval(&input(20.0, 75.0, 1.0, true), Regime::Trending);
        assert!(!result.allow);
        assert_eq!(result.reason, "momentum_fatigue");
        assert_eq!(result.profile, GateProfile::Trending);
    }

    #[test]
    fn boundary_momentum_equal_threshold_passes() {
        // Strictly-greater comparison: exactly 12% does not block.
        assert!(eval(&input(12.0, 75.0, 0.0, false), Regime::Choppy).allow);
    }
}
