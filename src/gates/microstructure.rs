// =============================================================================
// Microstructure Gate — spread, depth, VADR
// =============================================================================
//
// Entry requires a tradeable book: spread at most 50 bps, at least $100k of
// depth within ±2% of mid, and VADR at least 1.75. This gate has no trending
// relaxation.
//
// Rounding at the boundary: spread is rounded to whole basis points and
// depth to whole dollars before comparison (50.01 bps still passes, 51 bps
// blocks; $99,999.99 still passes). VADR compares exactly — 1.749 blocks.
//
// When the serving venue's execution quality tracker has flagged it
// tightened, the tightened spread ceiling replaces the default one.
// =============================================================================

use std::collections::HashMap;

use crate::gates::{GateInput, GateProfile, GateResult, MicroThresholds};
use crate::types::Regime;

pub fn evaluate(
    input: &GateInput,
    thresholds: &MicroThresholds,
    regime: Regime,
    venue_tightened: bool,
) -> GateResult {
    let spread_ceiling = if venue_tightened {
        thresholds.tightened_spread_bps
    } else {
        thresholds.max_spread_bps
    };

    let mut detail = HashMap::new();
    detail.insert("spread_bps".to_string(), input.spread_bps);
    detail.insert("spread_ceiling_bps".to_string(), spread_ceiling);
    detail.insert("depth_usd".to_string(), input.depth_usd);
    detail.insert("min_depth_usd".to_string(), thresholds.min_depth_usd);
    detail.insert("vadr".to_string(), input.vadr);
    detail.insert("min_vadr".to_string(), thresholds.min_vadr);
    detail.insert("venue_tightened".to_string(), f64::from(venue_tightened as u8));

    // Whole-unit rounding at the boundary for spread and depth; VADR exact.
    if input.spread_bps.round() > spread_ceiling {
        return GateResult::block("spread_wide", GateProfile::Baseline, regime, detail);
    }
    if input.depth_usd.round() < thresholds.min_depth_usd {
        return GateResult::block("depth_thin", GateProfile::Baseline, regime, detail);
    }
    if input.vadr < thresholds.min_vadr {
        return GateResult::block("vadr_low", GateProfile::Baseline, regime, detail);
    }

    GateResult::allow("ok", GateProfile::Baseline, regime, detail)
}
