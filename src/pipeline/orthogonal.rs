// =============================================================================
// Gram-Schmidt Orthogonalizer — protected momentum axis, capped social
// =============================================================================
//
// Cross-sectional over the N symbols of one scan. Axes residualize in
// declared order against every previously established axis:
//
//   m' := m                                  (protected, bit-exact)
//   t' := t − proj(t onto m')
//   v' := v − proj(v onto m') − proj(v onto t')
//   q' := q − projections onto {m', t', v'}
//   s' := s − projections onto {m', t', v', q'}
//   social_residual := clamp(s', −10, +10)
//
// Projections are uncentered: proj(a onto b) = (a·b / b·b) · b, and a
// zero-norm basis vector projects to zero (identity on the subtrahend).
// The social cap is a hard clamp applied strictly after orthogonalization.
//
// Orthogonality quality is reported as the maximum pairwise centered Pearson
// correlation across the residual axes; pairs without meaningful variance
// (or panels of fewer than three symbols) are skipped.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::ScanError;
use crate::factors::RawFactorRow;

/// Hard clamp applied to the social residual.
pub const SOCIAL_CAP: f64 = 10.0;

/// Maximum tolerated pairwise |correlation| across residual axes.
pub const MAX_ABS_CORRELATION: f64 = 0.60;

/// Variance below which an axis is treated as constant for the quality
/// check.
const VARIANCE_EPS: f64 = 1e-12;

/// Post-orthogonalization factor row for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrthogonalRow {
    pub symbol: String,
    pub timestamp_ms: i64,

    /// Identical to the raw row's momentum core, bit-exact.
    pub momentum_core: f64,

    pub technical_residual: f64,
    pub volume_residual: f64,
    pub quality_residual: f64,

    /// Social residual after the ±10 hard cap.
    pub social_residual: f64,
}

/// Quality metrics from one orthogonalization pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrthogonalityReport {
    /// Largest pairwise |centered Pearson correlation| across axes.
    pub max_abs_correlation: f64,
    /// Whether every pair stayed within [`MAX_ABS_CORRELATION`].
    pub within_tolerance: bool,
}

/// Orthogonalize one scan's factor panel.
///
/// Length mismatches between axes are impossible by construction here, but
/// the underlying projection still checks and fails fatally — the invariant
/// is load-bearing for any future caller of [`subtract_projection`].
pub fn orthogonalize(
    rows: &[RawFactorRow],
) -> Result<(Vec<OrthogonalRow>, OrthogonalityReport), ScanError> {
    if rows.is_empty() {
        return Ok((
            Vec::new(),
            OrthogonalityReport {
                max_abs_correlation: 0.0,
                within_tolerance: true,
            },
        ));
    }

    let momentum: Vec<f64> = rows.iter().map(|r| r.momentum_core).collect();
    let mut technical: Vec<f64> = rows.iter().map(|r| r.technical).collect();
    let mut volume: Vec<f64> = rows.iter().map(|r| r.volume).collect();
    let mut quality: Vec<f64> = rows.iter().map(|r| r.quality).collect();
    let mut social: Vec<f64> = rows.iter().map(|r| r.social).collect();

    // Residualize in declared order; momentum is protected and untouched.
    subtract_projection(&mut technical, &momentum)?;

    subtract_projection(&mut volume, &momentum)?;
    subtract_projection(&mut volume, &technical)?;

    subtract_projection(&mut quality, &momentum)?;
    subtract_projection(&mut quality, &technical)?;
    subtract_projection(&mut quality, &volume)?;

    subtract_projection(&mut social, &momentum)?;
    subtract_projection(&mut social, &technical)?;
    subtract_projection(&mut social, &volume)?;
    subtract_projection(&mut social, &quality)?;

    // Quality check on the orthogonal axes, before the social cap.
    let axes: [&[f64]; 5] = [&momentum, &technical, &volume, &quality, &social];
    let mut max_abs_correlation = 0.0f64;
    for i in 0..axes.len() {
        for j in (i + 1)..axes.len() {
            if let Some(corr) = centered_pearson(axes[i], axes[j]) {
                max_abs_correlation = max_abs_correlation.max(corr.abs());
            }
        }
    }
    let within_tolerance = max_abs_correlation <= MAX_ABS_CORRELATION;
    if !within_tolerance {
        warn!(
            max_abs_correlation = format!("{:.3}", max_abs_correlation),
            tolerance = MAX_ABS_CORRELATION,
            "residual axes exceed correlation tolerance"
        );
    }

    let out = rows
        .iter()
        .enumerate()
        .map(|(i, row)| OrthogonalRow {
            symbol: row.symbol.clone(),
            timestamp_ms: row.timestamp_ms,
            momentum_core: row.momentum_core,
            technical_residual: technical[i],
            volume_residual: volume[i],
            quality_residual: quality[i],
            // The cap is a hard clamp, never a rescale, and strictly
            // post-orthogonalization.
            social_residual: social[i].clamp(-SOCIAL_CAP, SOCIAL_CAP),
        })
        .collect();

    Ok((
        out,
        OrthogonalityReport {
            max_abs_correlation,
            within_tolerance,
        },
    ))
}

/// `vector -= proj(vector onto basis)`, in place.
///
/// A zero-norm basis leaves the vector unchanged. Mismatched lengths are
/// fatal.
pub fn subtract_projection(vector: &mut [f64], basis: &[f64]) -> Result<(), ScanError> {
    if vector.len() != basis.len() {
        return Err(ScanError::ValidationFailure(format!(
            "axis length mismatch: {} vs {}",
            vector.len(),
            basis.len()
        )));
    }

    let denom = dot(basis, basis);
    if denom <= 0.0 {
        return Ok(());
    }

    let coefficient = dot(vector, basis) / denom;
    for (value, &b) in vector.iter_mut().zip(basis.iter()) {
        *value -= coefficient * b;
    }
    Ok(())
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Centered Pearson correlation. `None` for panels of fewer than three
/// observations or when either side has ~zero variance.
pub fn centered_pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    let n = a.len();
    if n < 3 || n != b.len() {
        return None;
    }

    let mean_a = a.iter().sum::<f64>() / n as f64;
    let mean_b = b.iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..n {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    if var_a < VARIANCE_EPS || var_b < VARIANCE_EPS {
        return None;
    }

    Some(cov / (var_a.sqrt() * var_b.sqrt()))
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn rows_from_columns(
        momentum: &[f64],
        technical: &[f64],
        volume: &[f64],
        quality: &[f64],
        social: &[f64],
    ) -> Vec<RawFactorRow> {
        (0..momentum.len())
            .map(|i| RawFactorRow {
                symbol: format!("SYM{i}USD"),
                timestamp_ms: 0,
                momentum_core: momentum[i],
                technical: technical[i],
                volume: volume[i],
                quality: quality[i],
                social: social[i],
            })
            .collect()
    }

    fn column(rows: &[OrthogonalRow], pick: fn(&OrthogonalRow) -> f64) -> Vec<f64> {
        rows.iter().map(pick).collect()
    }

    #[test]
    fn momentum_preserved_bit_exact() {
        let momentum = [8.123456789, -3.987654321, 15.5, 0.25];
        let rows = rows_from_columns(
            &momentum,
            &[60.0, 40.0, 80.0, 20.0],
            &[55.0, 45.0, 70.0, 30.0],
            &[50.0, 50.0, 60.0, 40.0],
            &[10.0, 90.0, 30.0, 70.0],
        );
        let (out, _) = orthogonalize(&rows).unwrap();
        for (raw, orth) in rows.iter().zip(out.iter()) {
            assert_eq!(raw.momentum_core.to_bits(), orth.momentum_core.to_bits());
        }
    }

    #[test]
    fn residuals_are_orthogonal_to_prior_axes() {
        let rows = rows_from_columns(
            &[1.0, 2.0, 3.0, 4.0, 5.0],
            &[2.0, 4.0, 5.0, 4.0, 5.0],
            &[1.0, 3.0, 2.0, 5.0, 4.0],
            &[5.0, 3.0, 4.0, 1.0, 2.0],
            &[2.0, 2.0, 3.0, 1.0, 4.0],
        );
        let (out, _) = orthogonalize(&rows).unwrap();

        let m = column(&out, |r| r.momentum_core);
        let t = column(&out, |r| r.technical_residual);
        let v = column(&out, |r| r.volume_residual);
        let q = column(&out, |r| r.quality_residual);

        // Uncentered orthogonality: dot products vanish.
        assert!(dot(&t, &m).abs() < 1e-9);
        assert!(dot(&v, &m).abs() < 1e-9);
        assert!(dot(&v, &t).abs() < 1e-9);
        assert!(dot(&q, &m).abs() < 1e-9);
        assert!(dot(&q, &t).abs() < 1e-9);
        assert!(dot(&q, &v).abs() < 1e-9);
    }

    #[test]
    fn correlation_within_tolerance_on_demeaned_panel() {
        // Cross-sectionally demeaned factors: uncentered projections then
        // coincide with centered ones, so residual correlations vanish.
        let rows = rows_from_columns(
            &[-3.0, -1.0, 0.0, 1.0, 2.0, 1.0],
            &[2.0, -2.0, 1.0, 0.0, -1.0, 0.0],
            &[0.0, 1.0, -2.0, 2.0, -1.0, 0.0],
            &[1.0, 0.0, -1.0, -2.0, 1.0, 1.0],
            &[-1.0, 2.0, 0.0, -1.0, 1.0, -1.0],
        );
        let (_, report) = orthogonalize(&rows).unwrap();
        assert!(
            report.within_tolerance,
            "max correlation {}",
            report.max_abs_correlation
        );
        assert!(report.max_abs_correlation <= MAX_ABS_CORRELATION);
    }

    #[test]
    fn social_cap_boundaries() {
        // Social values chosen so residuals straddle the cap. Using zero
        // vectors for the other axes keeps social untouched by projection.
        let n = 4;
        let rows = rows_from_columns(
            &vec![0.0; n],
            &vec![0.0; n],
            &vec![0.0; n],
            &vec![0.0; n],
            &[10.0, -10.0, 10.01, -25.0],
        );
        let (out, _) = orthogonalize(&rows).unwrap();

        // Exactly ±10 passes unchanged.
        assert!((out[0].social_residual - 10.0).abs() < 1e-12);
        assert!((out[1].social_residual + 10.0).abs() < 1e-12);
        // Past the cap clamps hard — never rescales.
        assert!((out[2].social_residual - 10.0).abs() < 1e-12);
        assert!((out[3].social_residual + 10.0).abs() < 1e-12);
    }

    #[test]
    fn zero_norm_basis_is_identity() {
        let mut vector = vec![1.0, 2.0, 3.0];
        subtract_projection(&mut vector, &[0.0, 0.0, 0.0]).unwrap();
        assert_eq!(vector, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn mismatched_lengths_fatal() {
        let mut vector = vec![1.0, 2.0, 3.0];
        assert!(matches!(
            subtract_projection(&mut vector, &[1.0, 2.0]),
            Err(ScanError::ValidationFailure(_))
        ));
    }

    #[test]
    fn idempotent_within_tolerance() {
        let rows = rows_from_columns(
            &[1.0, 2.0, 3.0, 4.0, 5.0],
            &[2.0, 4.0, 5.0, 4.0, 5.0],
            &[1.0, 3.0, 2.0, 5.0, 4.0],
            &[5.0, 3.0, 4.0, 1.0, 2.0],
            &[2.0, 2.0, 3.0, 1.0, 4.0],
        );
        let (first, _) = orthogonalize(&rows).unwrap();

        // Feed the orthogonalized values back through as raw factors.
        let again = rows_from_columns(
            &column(&first, |r| r.momentum_core),
            &column(&first, |r| r.technical_residual),
            &column(&first, |r| r.volume_residual),
            &column(&first, |r| r.quality_residual),
            &column(&first, |r| r.social_residual),
        );
        let (second, _) = orthogonalize(&again).unwrap();

        for (a, b) in first.iter().zip(second.iter()) {
            assert!((a.momentum_core - b.momentum_core).abs() < 1e-9);
            assert!((a.technical_residual - b.technical_residual).abs() < 1e-9);
            assert!((a.volume_residual - b.volume_residual).abs() < 1e-9);
            assert!((a.quality_residual - b.quality_residual).abs() < 1e-9);
            assert!((a.social_residual - b.social_residual).abs() < 1e-9);
        }
    }

    #[test]
    fn empty_panel_is_trivially_clean() {
        let (rows, report) = orthogonalize(&[]).unwrap();
        assert!(rows.is_empty());
        assert!(report.within_tolerance);
    }

    #[test]
    fn centered_pearson_basics() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [2.0, 4.0, 6.0, 8.0];
        assert!((centered_pearson(&a, &b).unwrap() - 1.0).abs() < 1e-12);

        let c = [4.0, 3.0, 2.0, 1.0];
        assert!((centered_pearson(&a, &c).unwrap() + 1.0).abs() < 1e-12);

        // Constant vector has no defined correlation.
        assert!(centered_pearson(&a, &[5.0, 5.0, 5.0, 5.0]).is_none());
        // Too few observations.
        assert!(centered_pearson(&[1.0, 2.0], &[3.0, 4.0]).is_none());
    }
}
