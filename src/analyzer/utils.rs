// src/analyzer/utils.rs
use std::f32::consts::PI;

pub fn hann_window(n: usize) -> Vec<f32> {
    (0..n).map(|i| {
        0.5 * (1.0 - (2.0 * PI * i as f32 / (n as f32)).cos())
    }).collect()
}

pub fn moving_average_inplace(x: &mut [f32], radius: usize) {
    if radius == 0 || x.is_empty() { return; }
    let n = x.len();
    let mut out = vec![0.0f32; n];
    let mut sum = 0.0f32;
    for j in 0..=radius.min(n - 1) {
        sum += x[j];
    }
    for i in 0..n {
        if i > 0 {
            let add = i + radius;
            if add < n { sum += x[add]; }
            if i > radius { sum -= x[i - radius - 1]; }
        }
        let left = i.saturating_sub(radius);
        let right = (i + radius).min(n - 1);
        out[i] = sum / (right - left + 1) as f32;
    }
    x.copy_from_slice(&out);
}

/// Mean-centred and scaled so the largest deviation is 1.
pub fn normalize_peak(x: &[f32]) -> Vec<f32> {
    if x.is_empty() { return vec![]; }
    let mean = x.iter().sum::<f32>() / x.len() as f32;
    let max_abs = x.iter().map(|v| (v - mean).abs()).fold(0.0f32, f32::max);
    if max_abs == 0.0 { return vec![0.0f32; x.len()]; }
    x.iter().map(|&v| (v - mean) / max_abs).collect()
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() { return None; }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some(0.5 * (sorted[mid - 1] + sorted[mid]))
    } else {
        Some(sorted[mid])
    }
}

/// Vertex offset of the parabola through (-1, a), (0, b), (1, c), in [-0.5, 0.5].
pub fn parabolic_offset(a: f32, b: f32, c: f32) -> f32 {
    let denom = a - 2.0 * b + c;
    if denom.abs() < 1e-12 {
        return 0.0;
    }
    (0.5 * (a - c) / denom).clamp(-0.5, 0.5)
}

/// Most common positive gap; the shorter one on ties.
pub fn modal_gap(gaps: impl IntoIterator<Item = i64>) -> Option<i64> {
    let mut counts = std::collections::BTreeMap::<i64, usize>::new();
    for gap in gaps.into_iter().filter(|&g| g > 0) {
        *counts.entry(gap).or_insert(0) += 1;
    }
    let mut best: Option<(i64, usize)> = None;
    for (gap, count) in counts {
        // ascending gaps, so strict > keeps the shorter one
        if best.is_none_or(|(_, c)| count > c) {
            best = Some((gap, count));
        }
    }
    best.map(|(gap, _)| gap)
}

pub fn quick_rms(mono: &[f32]) -> f32 {
    if mono.is_empty() { return 0.0; }
    let acc: f64 = mono.iter().map(|&s| (s as f64) * (s as f64)).sum();
    ((acc / mono.len() as f64) as f32).sqrt()
}
