// =============================================================================
// Regime Weighter — normalized weight vectors and composite scoring
// =============================================================================
//
// One weight vector per regime over the four weighted factors (momentum,
// technical, volume, quality). Validation enforces both constraints:
// every component within [0.05, 0.60] and the vector summing to 1.0 ± 0.001.
//
// The capped social residual is added outside the normalized sum:
//
//   score = w_m·m' + w_t·t' + w_v·v' + w_q·q' + social_capped
//
// Regime switching happens between scans; within one scan the active vector
// is immutable.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::errors::ScanError;
use crate::pipeline::orthogonal::OrthogonalRow;
use crate::types::Regime;

/// Per-component lower bound.
pub const WEIGHT_MIN: f64 = 0.05;
/// Per-component upper bound.
pub const WEIGHT_MAX: f64 = 0.60;
/// Tolerance on the vector sum.
pub const SUM_TOLERANCE: f64 = 0.001;

/// Normalized weights over the four weighted factors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightVector {
    pub momentum: f64,
    pub technical: f64,
    pub volume: f64,
    pub quality: f64,
}

impl WeightVector {
    pub fn sum(&self) -> f64 {
        self.momentum + self.technical + self.volume + self.quality
    }

    /// Strict validation: component bounds and the sum constraint.
    pub fn validate(&self, label: &str) -> Result<(), ScanError> {
        for (name, value) in [
            ("momentum", self.momentum),
            ("technical", self.technical),
            ("volume", self.volume),
            ("quality", self.quality),
        ] {
            if !value.is_finite() || !(WEIGHT_MIN..=WEIGHT_MAX).contains(&value) {
                return Err(ScanError::ValidationFailure(format!(
                    "{label} weight {name} = {value} outside [{WEIGHT_MIN}, {WEIGHT_MAX}]"
                )));
            }
        }

        let sum = self.sum();
        if (sum - 1.0).abs() > SUM_TOLERANCE {
            return Err(ScanError::ValidationFailure(format!(
                "{label} weights sum to {sum}, expected 1.0 ± {SUM_TOLERANCE}"
            )));
        }
        Ok(())
    }
}

/// One weight vector per regime. The catalyst factor is reserved; its
/// weight share is folded into quality in these defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeWeights {
    #[serde(default = "default_trending")]
    pub trending: WeightVector,
    #[serde(default = "default_choppy")]
    pub choppy: WeightVector,
    #[serde(default = "default_high_vol")]
    pub high_vol: WeightVector,
}

fn default_trending() -> WeightVector {
    WeightVector {
        momentum: 0.50,
        technical: 0.18,
        volume: 0.15,
        quality: 0.17,
    }
}

fn default_choppy() -> WeightVector {
    WeightVector {
        momentum: 0.43,
        technical: 0.20,
        volume: 0.148,
        quality: 0.222,
    }
}

fn default_high_vol() -> WeightVector {
    WeightVector {
        momentum: 0.32,
        technical: 0.25,
        volume: 0.20,
        quality: 0.23,
    }
}

impl Default for RegimeWeights {
    fn default() -> Self {
        Self {
            trending: default_trending(),
            choppy: default_choppy(),
            high_vol: default_high_vol(),
        }
    }
}

impl RegimeWeights {
    pub fn for_regime(&self, regime: Regime) -> &WeightVector {
        match regime {
            Regime::Trending => &self.trending,
            Regime::Choppy => &self.choppy,
            Regime::HighVol => &self.high_vol,
        }
    }

    pub fn validate(&self) -> Result<(), ScanError> {
        self.trending.validate("trending")?;
        self.choppy.validate("choppy")?;
        self.high_vol.validate("high_vol")?;
        Ok(())
    }
}

/// Per-factor contributions to one composite score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub momentum_contribution: f64,
    pub technical_contribution: f64,
    pub volume_contribution: f64,
    pub quality_contribution: f64,
    /// Added outside the normalized sum, already capped to ±10.
    pub social_capped: f64,
    pub total: f64,
}

/// Composite score for one orthogonalized row under the active weights.
pub fn composite_score(row: &OrthogonalRow, weights: &WeightVector) -> ScoreBreakdown {
    let momentum_contribution = weights.momentum * row.momentum_core;
    let technical_contribution = weights.technical * row.technical_residual;
    let volume_contribution = weights.volume * row.volume_residual;
    let quality_contribution = weights.quality * row.quality_residual;
    let social_capped = row.social_residual;

    ScoreBreakdown {
        momentum_contribution,
        technical_contribution,
        volume_contribution,
        quality_contribution,
        social_capped,
        total: momentum_contribution
            + technical_contribution
            + volume_contribution
            + quality_contribution
            + social_capped,
    }
}
