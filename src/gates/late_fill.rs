// =============================================================================
// Late-Fill Guard — bounds signal-to-execution delay
// =============================================================================
//
// Baseline: at most 30 s between signal and execution. Trending profile
// (regime trending AND infra p99 latency under 400 ms AND price within
// 1.2 ATR of the trigger): up to 45 s — a healthy pipe and a price that has
// not run away make the extra patience safe.
// =============================================================================

use std::collections::HashMap;

use crate::gates::{GateInput, GateProfile, GateResult, LateFillThresholds};
use crate::types::Regime;

pub fn evaluate(input: &GateInput, thresholds: &LateFillThresholds, regime: Regime) -> GateResult {
    let trending_preconditions = input.infra_p99_ms < thresholds.precondition_max_p99_ms
        && input.atr_proximity <= thresholds.precondition_max_atr_proximity;

    let profile = if regime.is_trending() && trending_preconditions {
        GateProfile::Trending
    } else {
        GateProfile::Baseline
    };

    let max_delay = match profile {
        GateProfile::Baseline => thresholds.baseline_max_delay_secs,
        GateProfile::Trending => thresholds.trending_max_delay_secs,
    };

    let mut detail = HashMap::new();
    detail.insert("execution_delay_secs".to_string(), input.execution_delay_secs);
    detail.insert("max_delay_secs".to_string(), max_delay);
    detail.insert("infra_p99_ms".to_string(), input.infra_p99_ms);
    detail.insert("atr_proximity".to_string(), input.atr_proximity);

    if input.execution_delay_secs > max_delay {
        return GateResult::block("late_fill", profile, regime, detail);
    }

    GateResult::allow("ok", profile, regime, detail)
}
