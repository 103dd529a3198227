// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free indicator math consumed by the technical factor and
// the entry gates. Each indicator is a single streaming pass producing the
// newest-bar value only, and every public function returns `Option<f64>` so
// callers are forced to handle insufficient-data and numerical-edge-case
// scenarios.

pub mod atr;
pub mod ema;
pub mod roc;
pub mod rsi;
