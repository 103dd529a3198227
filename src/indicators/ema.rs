// =============================================================================
// Exponential Moving Average (EMA)
// =============================================================================
//
// The technical factor's trend-alignment sub-signal is the percentage gap
// between the fast EMA-9 and the slow EMA-21. Each EMA is folded in one
// streaming pass, seeded with the simple mean of the first `period` closes:
//
//   k     = 2 / (period + 1)
//   ema_t = k * close_t + (1 - k) * ema_{t-1}
// =============================================================================

/// EMA of the newest close in `closes` (oldest first).
///
/// Returns `None` when `period` is zero, the series is shorter than
/// `period`, or a non-finite value appears.
pub fn ema_last(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period {
        return None;
    }

    let k = 2.0 / (period + 1) as f64;

    let mut ema = 0.0;
    for (i, &close) in closes.iter().enumerate() {
        if !close.is_finite() {
            return None;
        }
        if i < period {
            ema += close / period as f64;
        } else {
            ema = k * close + (1.0 - k) * ema;
        }
    }

    Some(ema)
}

/// Percentage gap between EMA-9 and EMA-21 on the same series.
///
/// Positive when the fast average rides above the slow one (uptrend),
/// negative in a downtrend. `None` below 21 closes or when the slow EMA is
/// zero.
pub fn ema_gap_pct(closes: &[f64]) -> Option<f64> {
    let fast = ema_last(closes, 9)?;
    let slow = ema_last(closes, 21)?;

    if slow == 0.0 {
        return None;
    }

    let gap = (fast - slow) / slow * 100.0;
    gap.is_finite().then_some(gap)
}
