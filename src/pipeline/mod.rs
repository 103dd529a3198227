// =============================================================================
// Factor Pipeline Module
// =============================================================================
//
// The post-extraction half of the scoring pipeline:
// - Gram-Schmidt orthogonalization with the protected momentum axis and the
//   post-composition ±10 social cap
// - Regime-indexed weight vectors and composite scoring

pub mod orthogonal;
pub mod weights;

pub use orthogonal::{orthogonalize, OrthogonalRow, OrthogonalityReport};
pub use weights::{composite_score, RegimeWeights, ScoreBreakdown, WeightVector};
