// =============================================================================
// Average True Range (ATR)
// =============================================================================
//
// Volatility input for the freshness guard (price move vs 1.2 × ATR) and the
// late-fill guard's ATR-proximity precondition.
//
// True Range per bar against the previous close:
//
//   TR = max(high - low, |high - prev_close|, |low - prev_close|)
//
// The first `period` TRs seed the average; later TRs fold in with Wilder's
// 1/period weight. One streaming pass, newest value only.
// =============================================================================

use crate::market_data::Candle;

/// ATR of the newest bar in `candles` (oldest first).
///
/// Returns `None` when `period` is zero, fewer than `period + 1` bars are
/// available, or any true range comes out non-finite.
pub fn latest_atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let period_f = period as f64;
    let mut atr = 0.0;

    for (i, pair) in candles.windows(2).enumerate() {
        let prev_close = pair[0].close;
        let bar = &pair[1];

        let tr = (bar.high - bar.low)
            .max((bar.high - prev_close).abs())
            .max((bar.low - prev_close).abs());
        if !tr.is_finite() {
            return None;
        }

        if i < period {
            atr += tr / period_f;
        } else {
            atr = (atr * (period_f - 1.0) + tr) / period_f;
        }
    }

    Some(atr)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle::new(0, open, high, low, close, 500.0, 0)
    }

    #[test]
    fn rejects_degenerate_inputs() {
        let candles = vec![bar(150.0, 152.0, 148.0, 151.0); 4];
        assert!(latest_atr(&candles, 0).is_none());
        assert!(latest_atr(&candles, 4).is_none()); // needs period + 1 bars
        assert!(latest_atr(&[], 2).is_none());
    }

    #[test]
    fn drifting_constant_range_is_exact() {
        // SOL grinding up 0.25/bar with a fixed 4-point bar range: the bar
        // range dominates both gap terms, so every TR is exactly 4.
        let candles: Vec<Candle> = (0..20)
            .map(|i| {
                let base = 150.0 + i as f64 * 0.25;
                bar(base, base + 2.0, base - 2.0, base)
            })
            .collect();
        let atr = latest_atr(&candles, 6).unwrap();
        assert!((atr - 4.0).abs() < 1e-9, "got {atr}");
    }

    #[test]
    fn overnight_gap_dominates_true_range() {
        // BTC closes 63,900 then gaps to a 66k handle: TR on the gap bar is
        // |66,500 - 63,900| = 2,600, not the 700-point bar range.
        let candles = vec![
            bar(64_000.0, 64_400.0, 63_800.0, 63_900.0),
            bar(66_000.0, 66_500.0, 65_800.0, 66_200.0),
            bar(66_200.0, 66_600.0, 66_000.0, 66_400.0),
        ];
        // Seed over both TRs: (2600 + 600) / 2.
        let atr = latest_atr(&candles, 2).unwrap();
        assert!((atr - 1_600.0).abs() < 1e-9, "got {atr}");
    }

    #[test]
    fn wilder_fold_after_seed() {
        let candles = vec![
            bar(64_000.0, 64_400.0, 63_800.0, 63_900.0),
            bar(66_000.0, 66_500.0, 65_800.0, 66_200.0), // TR 2600
            bar(66_200.0, 66_600.0, 66_000.0, 66_400.0), // TR 600
            bar(66_400.0, 66_800.0, 66_300.0, 66_700.0), // TR 500
        ];
        // Seed 1600, then (1600 * 1 + 500) / 2.
        let atr = latest_atr(&candles, 2).unwrap();
        assert!((atr - 1_050.0).abs() < 1e-9, "got {atr}");
    }

    #[test]
    fn volatility_expansion_raises_atr() {
        let mut candles: Vec<Candle> = (0..10)
            .map(|i| {
                let base = 150.0 + i as f64 * 0.1;
                bar(base, base + 1.0, base - 1.0, base)
            })
            .collect();
        let calm = latest_atr(&candles, 5).unwrap();

        // Tack on wild bars.
        for i in 0..5 {
            let base = 151.0 + i as f64;
            candles.push(bar(base, base + 9.0, base - 9.0, base));
        }
        let wild = latest_atr(&candles, 5).unwrap();
        assert!(wild > calm, "expected expansion: {wild} <= {calm}");
    }

    #[test]
    fn nan_bar_yields_none() {
        let candles = vec![
            bar(150.0, 152.0, 148.0, 151.0),
            bar(151.0, f64::NAN, 149.0, 150.0),
            bar(150.0, 152.0, 148.0, 151.0),
        ];
        assert!(latest_atr(&candles, 2).is_none());
    }
}
