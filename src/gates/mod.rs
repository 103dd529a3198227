// =============================================================================
// Gate Cascade — microstructure gate plus three regime-aware guards
// =============================================================================
//
// Evaluation order: microstructure → safety ceiling → fatigue → freshness →
// late-fill. The cascade short-circuits: the first failing gate's result is
// the cascade's result, and no downstream guard is evaluated.
//
// Each guard offers two profiles. `baseline` always applies; `trending` is
// selected only when the regime is trending AND that guard's safety
// preconditions hold. The safety ceiling binds regardless of profile:
// momentum above 25%, RSI above 80, execution delay above 60 s, or bar age
// above 5 blocks unconditionally — no trending relaxation may cross it.
// =============================================================================

pub mod fatigue;
pub mod freshness;
pub mod late_fill;
pub mod microstructure;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::ScanError;
use crate::types::Regime;

// ---------------------------------------------------------------------------
// Inputs and results
// ---------------------------------------------------------------------------

/// Everything the cascade needs for one symbol, pre-assembled by the
/// orchestrator.
#[derive(Debug, Clone, Default)]
pub struct GateInput {
    // Microstructure
    pub spread_bps: f64,
    pub depth_usd: f64,
    pub vadr: f64,

    // Fatigue
    pub momentum_24h_pct: f64,
    pub rsi_4h: f64,
    pub accel_4h_pct: f64,
    /// Acceleration-renewal flag: true when 4h momentum is rebuilding.
    pub accel_renewal: bool,

    // Freshness
    pub bars_age: u32,
    /// Absolute close-to-close move of the signal bar.
    pub price_change_abs: f64,
    pub atr_1h: f64,

    // Late-fill
    pub execution_delay_secs: f64,
    pub infra_p99_ms: f64,
    /// Distance from the trigger price in ATR units.
    pub atr_proximity: f64,
}

/// Which threshold profile a guard applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateProfile {
    Baseline,
    Trending,
}

impl std::fmt::Display for GateProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Baseline => write!(f, "baseline"),
            Self::Trending => write!(f, "trending"),
        }
    }
}

/// Outcome of a single gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateResult {
    pub allow: bool,
    /// Machine-readable reason code; "ok" when the gate passes.
    pub reason: String,
    pub profile: GateProfile,
    pub regime: Regime,
    /// Numeric evidence behind the decision.
    pub detail: HashMap<String, f64>,
}

impl GateResult {
    pub fn allow(
        reason: &str,
        profile: GateProfile,
        regime: Regime,
        detail: HashMap<String, f64>,
    ) -> Self {
        Self {
            allow: true,
            reason: reason.to_string(),
            profile,
            regime,
            detail,
        }
    }

    pub fn block(
        reason: &str,
        profile: GateProfile,
        regime: Regime,
        detail: HashMap<String, f64>,
    ) -> Self {
        Self {
            allow: false,
            reason: reason.to_string(),
            profile,
            regime,
            detail,
        }
    }
}

/// One evaluated gate within the cascade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateOutcome {
    pub gate: String,
    pub result: GateResult,
}

/// The cascade's combined verdict. `gates` holds only the gates that were
/// actually evaluated — the cascade stops at the first block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeResult {
    pub allow: bool,
    pub reason: String,
    pub gates: Vec<GateOutcome>,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

fn default_max_spread_bps() -> f64 {
    50.0
}
fn default_min_depth_usd() -> f64 {
    100_000.0
}
fn default_min_vadr() -> f64 {
    1.75
}
fn default_tightened_spread_bps() -> f64 {
    25.0
}

/// Microstructure thresholds. No trending relaxation exists for this gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MicroThresholds {
    #[serde(default = "default_max_spread_bps")]
    pub max_spread_bps: f64,
    #[serde(default = "default_min_depth_usd")]
    pub min_depth_usd: f64,
    #[serde(default = "default_min_vadr")]
    pub min_vadr: f64,
    /// Spread ceiling applied instead when the venue's execution quality is
    /// tightened.
    #[serde(default = "default_tightened_spread_bps")]
    pub tightened_spread_bps: f64,
}

impl Default for MicroThresholds {
    fn default() -> Self {
        Self {
            max_spread_bps: default_max_spread_bps(),
            min_depth_usd: default_min_depth_usd(),
            min_vadr: default_min_vadr(),
            tightened_spread_bps: default_tightened_spread_bps(),
        }
    }
}

fn default_fatigue_momentum() -> f64 {
    12.0
}
fn default_fatigue_rsi() -> f64 {
    70.0
}
fn default_trending_momentum() -> f64 {
    18.0
}
fn default_accel_override() -> f64 {
    2.5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FatigueThresholds {
    /// Baseline block: 24h momentum above this AND RSI overbought.
    #[serde(default = "default_fatigue_momentum")]
    pub baseline_momentum_pct: f64,
    #[serde(default = "default_fatigue_rsi")]
    pub baseline_rsi: f64,
    /// Trending-profile momentum block threshold.
    #[serde(default = "default_trending_momentum")]
    pub trending_momentum_pct: f64,
    /// 4h acceleration at or above this overrides a trending-profile block.
    #[serde(default = "default_accel_override")]
    pub accel_override_pct: f64,
}

impl Default for FatigueThresholds {
    fn default() -> Self {
        Self {
            baseline_momentum_pct: default_fatigue_momentum(),
            baseline_rsi: default_fatigue_rsi(),
            trending_momentum_pct: default_trending_momentum(),
            accel_override_pct: default_accel_override(),
        }
    }
}

fn default_baseline_max_bars() -> u32 {
    2
}
fn default_trending_max_bars() -> u32 {
    3
}
fn default_atr_factor() -> f64 {
    1.2
}
fn default_trending_atr_multiplier() -> f64 {
    1.2
}
fn default_freshness_min_vadr() -> f64 {
    1.8
}
fn default_freshness_tight_spread() -> f64 {
    35.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreshnessThresholds {
    #[serde(default = "default_baseline_max_bars")]
    pub baseline_max_bars_age: u32,
    #[serde(default = "default_trending_max_bars")]
    pub trending_max_bars_age: u32,
    /// Price move ceiling as a multiple of ATR(1h).
    #[serde(default = "default_atr_factor")]
    pub atr_factor: f64,
    /// Trending profile widens the ATR factor by this multiplier.
    #[serde(default = "default_trending_atr_multiplier")]
    pub trending_atr_multiplier: f64,
    /// Trending preconditions: VADR at least this...
    #[serde(default = "default_freshness_min_vadr")]
    pub precondition_min_vadr: f64,
    /// ...and spread at most this tight.
    #[serde(default = "default_freshness_tight_spread")]
    pub precondition_tight_spread_bps: f64,
}

impl Default for FreshnessThresholds {
    fn default() -> Self {
        Self {
            baseline_max_bars_age: default_baseline_max_bars(),
            trending_max_bars_age: default_trending_max_bars(),
            atr_factor: default_atr_factor(),
            trending_atr_multiplier: default_trending_atr_multiplier(),
            precondition_min_vadr: default_freshness_min_vadr(),
            precondition_tight_spread_bps: default_freshness_tight_spread(),
        }
    }
}

fn default_baseline_delay() -> f64 {
    30.0
}
fn default_trending_delay() -> f64 {
    45.0
}
fn default_max_p99_ms() -> f64 {
    400.0
}
fn default_max_atr_proximity() -> f64 {
    1.2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LateFillThresholds {
    #[serde(default = "default_baseline_delay")]
    pub baseline_max_delay_secs: f64,
    #[serde(default = "default_trending_delay")]
    pub trending_max_delay_secs: f64,
    /// Trending preconditions: infra p99 below this...
    #[serde(default = "default_max_p99_ms")]
    pub precondition_max_p99_ms: f64,
    /// ...and price within this many ATRs of the trigger.
    #[serde(default = "default_max_atr_proximity")]
    pub precondition_max_atr_proximity: f64,
}

impl Default for LateFillThresholds {
    fn default() -> Self {
        Self {
            baseline_max_delay_secs: default_baseline_delay(),
            trending_max_delay_secs: default_trending_delay(),
            precondition_max_p99_ms: default_max_p99_ms(),
            precondition_max_atr_proximity: default_max_atr_proximity(),
        }
    }
}

fn default_ceiling_momentum() -> f64 {
    25.0
}
fn default_ceiling_rsi() -> f64 {
    80.0
}
fn default_ceiling_delay() -> f64 {
    60.0
}
fn default_ceiling_bars() -> u32 {
    5
}

/// Hard limits that bind in every regime and profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyCeiling {
    #[serde(default = "default_ceiling_momentum")]
    pub max_momentum_pct: f64,
    #[serde(default = "default_ceiling_rsi")]
    pub max_rsi: f64,
    #[serde(default = "default_ceiling_delay")]
    pub max_delay_secs: f64,
    #[serde(default = "default_ceiling_bars")]
    pub max_bars_age: u32,
}

impl Default for SafetyCeiling {
    fn default() -> Self {
        Self {
            max_momentum_pct: default_ceiling_momentum(),
            max_rsi: default_ceiling_rsi(),
            max_delay_secs: default_ceiling_delay(),
            max_bars_age: default_ceiling_bars(),
        }
    }
}

/// Full guard configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardsConfig {
    #[serde(default)]
    pub microstructure: MicroThresholds,
    #[serde(default)]
    pub fatigue: FatigueThresholds,
    #[serde(default)]
    pub freshness: FreshnessThresholds,
    #[serde(default)]
    pub late_fill: LateFillThresholds,
    #[serde(default)]
    pub ceiling: SafetyCeiling,
}

impl GuardsConfig {
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.microstructure.max_spread_bps <= 0.0 || self.microstructure.min_depth_usd <= 0.0 {
            return Err(ScanError::ConfigInvalid(
                "microstructure thresholds must be positive".to_string(),
            ));
        }
        if self.fatigue.trending_momentum_pct < self.fatigue.baseline_momentum_pct {
            return Err(ScanError::ConfigInvalid(
                "trending fatigue threshold below baseline".to_string(),
            ));
        }
        if self.freshness.trending_max_bars_age < self.freshness.baseline_max_bars_age {
            return Err(ScanError::ConfigInvalid(
                "trending freshness bar age below baseline".to_string(),
            ));
        }
        if self.late_fill.trending_max_delay_secs < self.late_fill.baseline_max_delay_secs {
            return Err(ScanError::ConfigInvalid(
                "trending late-fill delay below baseline".to_string(),
            ));
        }
        if self.ceiling.max_momentum_pct < self.fatigue.trending_momentum_pct {
            return Err(ScanError::ConfigInvalid(
                "safety ceiling momentum below trending fatigue threshold".to_string(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Cascade
// ---------------------------------------------------------------------------

/// The safety ceiling check — evaluated once, right after microstructure.
fn evaluate_ceiling(input: &GateInput, ceiling: &SafetyCeiling, regime: Regime) -> GateResult {
    let mut detail = HashMap::new();
    detail.insert("momentum_24h_pct".to_string(), input.momentum_24h_pct);
    detail.insert("rsi_4h".to_string(), input.rsi_4h);
    detail.insert("execution_delay_secs".to_string(), input.execution_delay_secs);
    detail.insert("bars_age".to_string(), input.bars_age as f64);

    let breached = input.momentum_24h_pct > ceiling.max_momentum_pct
        || input.rsi_4h > ceiling.max_rsi
        || input.execution_delay_secs > ceiling.max_delay_secs
        || input.bars_age > ceiling.max_bars_age;

    if breached {
        GateResult::block("safety_ceiling", GateProfile::Baseline, regime, detail)
    } else {
        GateResult::allow("ok", GateProfile::Baseline, regime, detail)
    }
}

/// Run the full cascade for one symbol.
///
/// `venue_tightened` selects the tightened spread ceiling in the
/// microstructure gate when the serving venue's execution quality is
/// flagged.
pub fn evaluate_cascade(
    input: &GateInput,
    config: &GuardsConfig,
    regime: Regime,
    venue_tightened: bool,
) -> CascadeResult {
    let mut gates: Vec<GateOutcome> = Vec::with_capacity(5);

    // Record one gate's outcome; a block ends the cascade immediately and
    // leaves every later gate unevaluated.
    fn settle(gates: &mut Vec<GateOutcome>, gate: &str, result: GateResult) -> Option<CascadeResult> {
        let allow = result.allow;
        let reason = result.reason.clone();
        gates.push(GateOutcome {
            gate: gate.to_string(),
            result,
        });
        if allow {
            None
        } else {
            debug!(gate, reason = %reason, "cascade blocked");
            Some(CascadeResult {
                allow: false,
                reason,
                gates: std::mem::take(gates),
            })
        }
    }

    let result = microstructure::evaluate(input, &config.microstructure, regime, venue_tightened);
    if let Some(blocked) = settle(&mut gates, "microstructure", result) {
        return blocked;
    }

    let result = evaluate_ceiling(input, &config.ceiling, regime);
    if let Some(blocked) = settle(&mut gates, "safety_ceiling", result) {
        return blocked;
    }

    let result = fatigue::evaluate(input, &config.fatigue, regime);
    if let Some(blocked) = settle(&mut gates, "fatigue", result) {
        return blocked;
    }

    let result = freshness::evaluate(input, &config.freshness, regime);
    if let Some(blocked) = settle(&mut gates, "freshness", result) {
        return blocked;
    }

    let result = late_fill::evaluate(input, &config.late_fill, regime);
    if let Some(blocked) = settle(&mut gates, "late_fill", result) {
        return blocked;
    }

    CascadeResult {
        allow: true,
        reason: "all_guards_passed".to_string(),
        gates,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    /// An input that sails through every gate at defaults.
    pub(crate) fn clean_input() -> GateInput {
        GateInput {
            spread_bps: 20.0,
            depth_usd: 200_000.0,
            vadr: 2.0,
            momentum_24h_pct: 5.0,
            rsi_4h: 55.0,
            accel_4h_pct: 0.5,
            accel_renewal: false,
            bars_age: 1,
            price_change_abs: 0.5,
            atr_1h: 1.0,
            execution_delay_secs: 5.0,
            infra_p99_ms: 150.0,
            atr_proximity: 0.5,
        }
    }

    #[test]
    fn clean_input_passes_cascade() {
        let result = evaluate_cascade(&clean_input(), &GuardsConfig::default(), Regime::Choppy, false);
        assert!(result.allow);
        assert_eq!(result.reason, "all_guards_passed");
        assert_eq!(result.gates.len(), 5);
    }

    #[test]
    fn microstructure_block_short_circuits() {
        let mut input = clean_input();
        input.spread_bps = 66.0;
        // Also poison a downstream guard; it must never be reached.
        input.execution_delay_secs = 999.0;

        let result = evaluate_cascade(&input, &GuardsConfig::default(), Regime::Choppy, false);
        assert!(!result.allow);
        assert_eq!(result.reason, "spread_wide");
        assert_eq!(result.gates.len(), 1);
        assert_eq!(result.gates[0].gate, "microstructure");
    }

    #[test]
    fn ceiling_blocks_regardless_of_regime() {
        for regime in [Regime::Trending, Regime::Choppy, Regime::HighVol] {
            let mut input = clean_input();
            input.momentum_24h_pct = 26.0;
            input.accel_renewal = true;
            let result = evaluate_cascade(&input, &GuardsConfig::default(), regime, false);
            assert!(!result.allow, "regime {regime}");
            assert_eq!(result.reason, "safety_ceiling");
        }
    }

    #[test]
    fn ceiling_covers_all_four_limits() {
        let config = GuardsConfig::default();

        let mut input = clean_input();
        input.rsi_4h = 81.0;
        assert_eq!(
            evaluate_cascade(&input, &config, Regime::Choppy, false).reason,
            "safety_ceiling"
        );

        let mut input = clean_input();
        input.execution_delay_secs = 61.0;
        assert_eq!(
            evaluate_cascade(&input, &config, Regime::Choppy, false).reason,
            "safety_ceiling"
        );

        let mut input = clean_input();
        input.bars_age = 6;
        assert_eq!(
            evaluate_cascade(&input, &config, Regime::Choppy, false).reason,
            "safety_ceiling"
        );
    }

    #[test]
    fn blocked_cascade_reports_only_evaluated_gates() {
        let mut input = clean_input();
        input.momentum_24h_pct = 15.0;
        input.rsi_4h = 72.0; // fatigue block in choppy

        let result = evaluate_cascade(&input, &GuardsConfig::default(), Regime::Choppy, false);
        assert!(!result.allow);
        assert_eq!(result.reason, "momentum_fatigue");
        // microstructure + ceiling + fatigue, nothing after.
        assert_eq!(result.gates.len(), 3);
        assert!(result.gates.iter().all(|g| g.gate != "freshness"));
        assert!(result.gates.iter().all(|g| g.gate != "late_fill"));
    }

    #[test]
    fn guards_config_validation() {
        let mut config = GuardsConfig::default();
        assert!(config.validate().is_ok());

        config.fatigue.trending_momentum_pct = 5.0;
        assert!(config.validate().is_err());

        let mut config = GuardsConfig::default();
        config.ceiling.max_momentum_pct = 10.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn tightened_venue_narrows_spread_ceiling() {
        let mut input = clean_input();
        input.spread_bps = 30.0; // within 50, beyond the tightened 25

        let config = GuardsConfig::default();
        assert!(evaluate_cascade(&input, &config, Regime::Choppy, false).allow);

        let result = evaluate_cascade(&input, &config, Regime::Choppy, true);
        assert!(!result.allow);
        assert_eq!(result.reason, "spread_wide");
    }
}
