// src/grid/fit.rs
//! Robust straight-line fit of beat times against beat numbers.

use crate::analyzer::utils::median;

/// Tukey bisquare tuning constant (95% efficiency under Gaussian noise).
const TUKEY_C: f64 = 4.685;
/// MAD -> standard deviation for Gaussian residuals.
const MAD_SCALE: f64 = 0.6745;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineFit {
    /// Fitted time of beat number 0.
    pub intercept: f64,
    /// Seconds per beat.
    pub slope: f64,
    /// Iterations actually run.
    pub iterations: usize,
}

/// Assigns each beat a beat number against the median interval, so a missed
/// detection leaves a gap in the numbering instead of shifting everything
/// after it. Only beats that land close to a whole number of periods from
/// the last trusted beat become the new reference, which keeps spurious
/// in-between detections from dragging the count.
pub fn reindex_beats(times: &[f64]) -> Vec<i64> {
    let mut indices = Vec::with_capacity(times.len());
    if times.is_empty() { return indices; }

    let intervals: Vec<f64> = times.windows(2).map(|w| w[1] - w[0]).collect();
    let Some(period) = median(&intervals).filter(|p| *p > 0.0) else {
        return (0..times.len() as i64).collect();
    };

    let mut ref_time = times[0];
    let mut ref_index = 0i64;
    indices.push(0);
    for &t in &times[1..] {
        let beats = (t - ref_time) / period;
        let whole = beats.round();
        let idx = ref_index + whole as i64;
        indices.push(idx);
        if (beats - whole).abs() < 0.25 && whole >= 1.0 {
            ref_time = t;
            ref_index = idx;
        }
    }
    indices
}

/// Iteratively reweighted least squares with Tukey bisquare weights on
/// MAD-scaled residuals. Points far off the line end up with zero weight.
pub fn irls_line(x: &[i64], y: &[f64], max_iterations: usize) -> Option<LineFit> {
    if x.len() != y.len() || x.len() < 2 { return None; }
    let xs: Vec<f64> = x.iter().map(|&v| v as f64).collect();

    let mut weights = vec![1.0f64; xs.len()];
    let (mut intercept, mut slope) = weighted_line(&xs, y, &weights)?;
    if slope <= 0.0 { return None; }

    let mut iterations = 0;
    for _ in 0..max_iterations {
        iterations += 1;
        let residuals: Vec<f64> = xs.iter().zip(y).map(|(&xi, &yi)| yi - (intercept + slope * xi)).collect();
        let abs_res: Vec<f64> = residuals.iter().map(|r| r.abs()).collect();
        let mad = median(&abs_res).unwrap_or(0.0);
        // floor keeps a perfect fit from zeroing every weight
        let scale = (mad / MAD_SCALE).max(slope * 1e-3).max(1e-6);
        let cutoff = TUKEY_C * scale;

        for (w, r) in weights.iter_mut().zip(&residuals) {
            let u = r / cutoff;
            *w = if u.abs() < 1.0 { (1.0 - u * u).powi(2) } else { 0.0 };
        }

        let Some((next_intercept, next_slope)) = weighted_line(&xs, y, &weights) else { break; };
        if next_slope <= 0.0 { break; }
        let converged = (next_slope - slope).abs() < 1e-9 && (next_intercept - intercept).abs() < 1e-9;
        intercept = next_intercept;
        slope = next_slope;
        if converged { break; }
    }

    Some(LineFit { intercept, slope, iterations })
}

/// Weighted least squares for y = a + b x. None if fewer than two distinct
/// x values carry weight.
fn weighted_line(x: &[f64], y: &[f64], w: &[f64]) -> Option<(f64, f64)> {
    let sw: f64 = w.iter().sum();
    if sw <= 0.0 { return None; }
    let mx = x.iter().zip(w).map(|(a, b)| a * b).sum::<f64>() / sw;
    let my = y.iter().zip(w).map(|(a, b)| a * b).sum::<f64>() / sw;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for i in 0..x.len() {
        let dx = x[i] - mx;
        sxx += w[i] * dx * dx;
        sxy += w[i] * dx * (y[i] - my);
    }
    if sxx <= 1e-12 { return None; }
    let slope = sxy / sxx;
    Some((my - slope * mx, slope))
}
