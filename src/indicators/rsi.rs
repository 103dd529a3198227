// =============================================================================
// Relative Strength Index (RSI)
// =============================================================================
//
// Wilder's RSI over a close series, computed in a single streaming pass.
// The first `period` deltas seed the average gain/loss; every later delta
// folds in with weight 1/period:
//
//   avg = (avg * (period - 1) + delta_component) / period
//   RSI = 100 - 100 / (1 + avg_gain / avg_loss)
//
// Consumers only ever want the value for the newest bar (the fatigue guard's
// 4h overbought check and the technical factor's positioning sub-signal), so
// no intermediate series is materialised.
// =============================================================================

/// RSI of the newest close in `closes` (oldest first).
///
/// Returns `None` when `period` is zero, there are fewer than `period + 1`
/// closes, or a non-finite value appears in the series.
pub fn latest_rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let period_f = period as f64;
    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;

    for (i, pair) in closes.windows(2).enumerate() {
        let delta = pair[1] - pair[0];
        if !delta.is_finite() {
            return None;
        }
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);

        if i < period {
            // Seed phase: plain average of the first `period` deltas.
            avg_gain += gain / period_f;
            avg_loss += loss / period_f;
        } else {
            avg_gain = (avg_gain * (period_f - 1.0) + gain) / period_f;
            avg_loss = (avg_loss * (period_f - 1.0) + loss) / period_f;
        }
    }

    let rsi = if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0 // dead flat
    } else if avg_loss == 0.0 {
        100.0 // only gains
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    };

    rsi.is_finite().then_some(rsi)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_degenerate_inputs() {
        assert!(latest_rsi(&[], 7).is_none());
        assert!(latest_rsi(&[64_000.0, 64_100.0], 0).is_none());
        // period deltas need period + 1 closes.
        assert!(latest_rsi(&[64_000.0, 64_100.0, 64_050.0], 3).is_none());
    }

    #[test]
    fn relentless_rally_pins_at_100() {
        // A coin that only goes up: no losses, RSI saturates.
        let closes: Vec<f64> = (0..12).map(|i| 3_200.0 + i as f64 * 18.0).collect();
        let rsi = latest_rsi(&closes, 7).unwrap();
        assert!((rsi - 100.0).abs() < 1e-10, "got {rsi}");
    }

    #[test]
    fn relentless_selloff_pins_at_0() {
        let closes: Vec<f64> = (0..12).map(|i| 3_200.0 - i as f64 * 18.0).collect();
        let rsi = latest_rsi(&closes, 7).unwrap();
        assert!(rsi.abs() < 1e-10, "got {rsi}");
    }

    #[test]
    fn flat_tape_reads_neutral() {
        let rsi = latest_rsi(&[0.412; 20], 7).unwrap();
        assert!((rsi - 50.0).abs() < 1e-10, "got {rsi}");
    }

    #[test]
    fn hand_computed_small_case() {
        // Deltas: +1, -1, +2 with period 2.
        // Seed: avg_gain 0.5, avg_loss 0.5.
        // Fold +2: avg_gain (0.5 + 2)/2 = 1.25, avg_loss 0.5/2 = 0.25.
        // RS = 5 => RSI = 100 - 100/6 = 83.333…
        let rsi = latest_rsi(&[10.0, 11.0, 10.0, 12.0], 2).unwrap();
        assert!((rsi - 250.0 / 3.0).abs() < 1e-9, "got {rsi}");
    }

    #[test]
    fn stays_in_range_on_choppy_tape() {
        // An ETH-flavoured chop: alternating pushes and pullbacks.
        let mut closes = Vec::with_capacity(40);
        let mut px = 3_450.0;
        for i in 0..40 {
            px += if i % 3 == 0 { 22.0 } else { -9.5 };
            closes.push(px);
        }
        let rsi = latest_rsi(&closes, 14).unwrap();
        assert!((0.0..=100.0).contains(&rsi), "RSI {rsi} out of range");
    }

    #[test]
    fn nan_in_series_yields_none() {
        let mut closes = vec![64_000.0; 20];
        closes[9] = f64::NAN;
        assert!(latest_rsi(&closes, 7).is_none());
    }
}
