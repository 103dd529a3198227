// =============================================================================
// Freshness Guard — the signal must still be current
// =============================================================================
//
// Baseline: the signal bar is at most 2 closed bars old, and price has not
// moved more than 1.2 × ATR(1h) since it fired.
//
// Trending profile (regime trending AND VADR ≥ 1.8 AND spread at most the
// configured tight ceiling): bar age up to 3, ATR factor widened by 1.2×.
// The preconditions demand strong liquidity before relaxing — a stale
// signal in a thin book is exactly what this guard exists to stop.
// =============================================================================

use std::collections::HashMap;

use crate::gates::{FreshnessThresholds, GateInput, GateProfile, GateResult};
use crate::types::Regime;

pub fn evaluate(input: &GateInput, thresholds: &FreshnessThresholds, regime: Regime) -> GateResult {
    let trending_preconditions = input.vadr >= thresholds.precondition_min_vadr
        && input.spread_bps <= thresholds.precondition_tight_spread_bps;

    let profile = if regime.is_trending() && trending_preconditions {
        GateProfile::Trending
    } else {
        GateProfile::Baseline
    };

    let (max_bars_age, atr_factor) = match profile {
        GateProfile::Baseline => (thresholds.baseline_max_bars_age, thresholds.atr_factor),
        GateProfile::Trending => (
            thresholds.trending_max_bars_age,
            thresholds.atr_factor * thresholds.trending_atr_multiplier,
        ),
    };

    let mut detail = HashMap::new();
    detail.insert("bars_age".to_string(), input.bars_age as f64);
    detail.insert("max_bars_age".to_string(), max_bars_age as f64);
    detail.insert("price_change_abs".to_string(), input.price_change_abs);
    detail.insert("atr_1h".to_string(), input.atr_1h);
    detail.insert("atr_factor".to_string(), atr_factor);

    if input.bars_age > max_bars_age {
        return GateResult::block("stale_bars", profile, regime, detail);
    }

    if input.price_change_abs > atr_factor * input.atr_1h {
        return GateResult::block("price_moved_beyond_atr", profile, regime, detail);
    }

    GateResult::allow("ok", profile, regime, detail)
}
