// src/analyzer/tempo.rs
use std::collections::BTreeMap;

use rustfft::{FftPlanner, num_complex::Complex, num_traits::Zero};

use crate::analyzer::onset::OnsetEnvelope;
use crate::analyzer::utils::{median, moving_average_inplace, normalize_peak, parabolic_offset};

#[derive(Debug, Clone)]
pub struct TempoEstimate {
    pub bpm: f32,
    /// Candidate (bpm, score) pairs, best first.
    pub candidates: Vec<(f32, f32)>,
}

/// A tracked beat. `detected` is false when the tracker had to extrapolate
/// through a window without a clear onset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedBeat {
    pub time: f64,
    pub strength: f32,
    pub detected: bool,
}

/// Global tempo from the onset envelope: FFT autocorrelation, octave folding,
/// then comb-filter refinement of the strongest candidates.
pub fn estimate_tempo(
    env: &OnsetEnvelope,
    min_bpm: f32,
    max_bpm: f32,
    planner: &mut FftPlanner<f32>,
) -> Option<TempoEstimate> {
    if env.novelty.len() < 8 { return None; }

    let mut smoothed = env.novelty.clone();
    moving_average_inplace(&mut smoothed, 1);
    let norm = normalize_peak(&smoothed);
    if norm.iter().all(|&v| v == 0.0) { return None; }

    let (lag_min, lag_max) = bpm_range_to_lag_range(min_bpm, max_bpm, env.env_rate);
    if lag_max <= lag_min + 2 { return None; }
    let lag_scores = autocorrelate_range_fft(&norm, lag_min, lag_max, planner);

    let peaks = autocorr_peaks(&lag_scores);
    let folded = fold_bpm_candidates(&peaks, env.env_rate, min_bpm, max_bpm);
    if folded.is_empty() { return None; }

    let mut cand_vec: Vec<(f32, f32)> = folded.into_values().collect();
    cand_vec.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.total_cmp(&b.0)));

    let top_n = cand_vec.len().min(6);
    let mut refined = Vec::with_capacity(top_n);
    for &(bpm, base_score) in cand_vec.iter().take(top_n) {
        let score = comb_score(&norm, bpm, env.env_rate).0;
        refined.push((bpm, score + 0.05 * base_score));
    }
    refined.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.total_cmp(&b.0)));

    Some(TempoEstimate {
        bpm: refined[0].0,
        candidates: refined,
    })
}

/// Follows beats through the envelope starting from the best comb phase.
/// Each prediction is snapped to the strongest onset within 30% of a beat,
/// and the period adapts slowly to the observed intervals.
pub fn track_beats(env: &OnsetEnvelope, bpm: f32) -> Vec<TrackedBeat> {
    let novelty = &env.novelty;
    let mut beats = Vec::new();
    if novelty.len() < 3 || bpm <= 0.0 { return beats; }

    let nominal = 60.0 / bpm * env.env_rate;
    if nominal < 2.0 { return beats; }
    let (_, phase) = comb_score(novelty, bpm, env.env_rate);

    // onset threshold: a beat needs to stand out from the envelope's floor
    let mut sorted = novelty.clone();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let floor = sorted[sorted.len() / 2];
    let threshold = floor + 0.1 * (1.0 - floor);

    let window = (nominal * 0.3).max(2.0);
    let mut period = nominal;
    let mut predicted = phase as f32;
    let mut last_detected: Option<f32> = None;
    let last_index = (novelty.len() - 1) as f32;

    while predicted <= last_index {
        let start = (predicted - window).max(0.0).floor() as usize;
        let end = ((predicted + window).ceil() as usize).min(novelty.len() - 1);
        let mut best_idx = predicted.round().clamp(0.0, last_index) as usize;
        let mut best_v = novelty[best_idx];
        for i in start..=end {
            if novelty[i] > best_v { best_v = novelty[i]; best_idx = i; }
        }

        let detected = best_v >= threshold;
        let frame = if detected {
            let a = if best_idx > 0 { novelty[best_idx - 1] } else { best_v };
            let c = if best_idx + 1 < novelty.len() { novelty[best_idx + 1] } else { best_v };
            best_idx as f32 + parabolic_offset(a, best_v, c)
        } else {
            predicted
        };

        if detected {
            if let Some(prev) = last_detected {
                let observed = frame - prev;
                if (observed - period).abs() < 0.15 * period {
                    period = 0.9 * period + 0.1 * observed;
                }
            }
            last_detected = Some(frame);
        }

        beats.push(TrackedBeat {
            time: env.frame_to_secs(frame),
            strength: best_v,
            detected,
        });
        predicted = frame + period;
    }

    beats.retain(|b| b.time >= 0.0);
    beats
}

/// Collapses beats closer than `min_gap` seconds into one at their mean time.
pub fn merge_close_beats(beats: Vec<TrackedBeat>, min_gap: f64) -> Vec<TrackedBeat> {
    let mut out: Vec<TrackedBeat> = Vec::with_capacity(beats.len());
    let mut group: Vec<TrackedBeat> = Vec::new();
    for beat in beats {
        if let Some(last) = group.last() {
            if beat.time - last.time < min_gap {
                group.push(beat);
                continue;
            }
            out.push(collapse(&group));
            group.clear();
        }
        group.push(beat);
    }
    if !group.is_empty() {
        out.push(collapse(&group));
    }
    out
}

fn collapse(group: &[TrackedBeat]) -> TrackedBeat {
    let n = group.len() as f64;
    TrackedBeat {
        time: group.iter().map(|b| b.time).sum::<f64>() / n,
        strength: group.iter().map(|b| b.strength).fold(0.0f32, f32::max),
        detected: group.iter().any(|b| b.detected),
    }
}

/// Representative tempo from the median beat interval of the middle third
/// of the track; intros and outros are where tempo is least reliable.
pub fn representative_bpm(beat_times: &[f64]) -> Option<f64> {
    if beat_times.len() < 2 { return None; }
    let intervals: Vec<f64> = beat_times.windows(2).map(|w| w[1] - w[0]).collect();
    let start = intervals.len() / 3;
    let end = intervals.len() * 2 / 3;
    let middle = if end > start + 2 { &intervals[start..end] } else { &intervals[..] };
    let ibi = median(middle)?;
    if ibi > 0.0 { Some(60.0 / ibi) } else { None }
}

/// Fraction of beat intervals in `intervals` within 5% of `period`.
pub fn steadiness(intervals: &[f64], period: f64) -> f64 {
    if intervals.is_empty() || period <= 0.0 { return 0.0; }
    let steady = intervals.iter().filter(|&&ibi| ((ibi - period) / period).abs() <= 0.05).count();
    steady as f64 / intervals.len() as f64
}

// FFT autocorr
fn autocorrelate_range_fft(x: &[f32], lag_min: usize, lag_max: usize, planner: &mut FftPlanner<f32>) -> Vec<(usize, f32)> {
    let n = x.len();
    if n == 0 || lag_max < lag_min || lag_min >= n { return Vec::new(); }
    let conv = (n * 2).next_power_of_two();
    let fft = planner.plan_fft_forward(conv);
    let ifft = planner.plan_fft_inverse(conv);
    let mut buf: Vec<Complex<f32>> = vec![Complex::zero(); conv];
    for i in 0..n { buf[i].re = x[i]; }
    fft.process(&mut buf);
    for v in buf.iter_mut() {
        *v = Complex { re: v.re * v.re + v.im * v.im, im: 0.0 };
    }
    ifft.process(&mut buf);
    let scale = 1.0 / conv as f32;
    let mut out = Vec::with_capacity(lag_max.saturating_sub(lag_min) + 1);
    for lag in lag_min..=lag_max {
        if lag >= n { out.push((lag, 0.0)); continue; }
        let ac = buf[lag].re * scale;
        out.push((lag, ac / (n - lag) as f32));
    }
    out
}

/// Local maxima of the autocorrelation with positive score, at fractional
/// lag via parabolic interpolation.
fn autocorr_peaks(lag_scores: &[(usize, f32)]) -> Vec<(f32, f32)> {
    let mut peaks = Vec::new();
    for i in 1..lag_scores.len().saturating_sub(1) {
        let (lag, v) = lag_scores[i];
        let a = lag_scores[i - 1].1;
        let c = lag_scores[i + 1].1;
        if v > 0.0 && v >= a && v > c {
            peaks.push((lag as f32 + parabolic_offset(a, v, c), v));
        }
    }
    peaks
}

/// Folds autocorrelation peaks into `[pref_min, pref_max]` BPM, keyed by
/// tenths of a BPM. Each key keeps the summed score and the precise BPM of
/// its strongest contributor. BTreeMap keeps the order independent of hashing.
fn fold_bpm_candidates(peaks: &[(f32, f32)], env_rate: f32, pref_min: f32, pref_max: f32) -> BTreeMap<i32, (f32, f32)> {
    let mut map: BTreeMap<i32, (f32, f32, f32)> = BTreeMap::new();
    for &(lag, score) in peaks {
        if lag <= 0.0 { continue; }
        let mut bpm = 60.0 * env_rate / lag;
        if !bpm.is_finite() || bpm <= 0.0 { continue; }
        while bpm < pref_min { bpm *= 2.0; }
        while bpm > pref_max { bpm *= 0.5; }
        if bpm < pref_min { continue; }
        let key = (bpm * 10.0).round() as i32;
        let entry = map.entry(key).or_insert((0.0, 0.0, bpm));
        entry.0 += score;
        if score > entry.1 {
            entry.1 = score;
            entry.2 = bpm;
        }
    }
    map.into_iter().map(|(k, (sum, _, bpm))| (k, (bpm, sum))).collect()
}

/// Best comb alignment for `bpm`: (score, phase in frames). Each tooth takes
/// the envelope maximum within 4% of a beat so a slightly-off tempo still lands.
fn comb_score(novelty: &[f32], bpm: f32, env_rate: f32) -> (f32, usize) {
    if novelty.is_empty() || bpm <= 0.0 { return (0.0, 0); }
    let frames_per_beat = 60.0 / bpm * env_rate;
    if frames_per_beat < 1.0 { return (0.0, 0); }
    let tooth = ((frames_per_beat * 0.04) as usize).max(1);
    let max_phase = (frames_per_beat as usize).max(1);
    let mut best = (f32::NEG_INFINITY, 0usize);
    for phase in 0..max_phase {
        let mut s = 0.0f32;
        let mut pos = phase as f32;
        while (pos as usize) < novelty.len() {
            let center = pos as usize;
            let start = center.saturating_sub(tooth);
            let end = (center + tooth).min(novelty.len() - 1);
            s += novelty[start..=end].iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            pos += frames_per_beat;
        }
        if s > best.0 { best = (s, phase); }
    }
    best
}

fn bpm_range_to_lag_range(min_bpm: f32, max_bpm: f32, env_rate: f32) -> (usize, usize) {
    let min_bpm = min_bpm.max(1.0);
    let max_bpm = max_bpm.max(min_bpm + 1.0);
    // search one octave either side so folding has something to fold
    let lag_max = (env_rate * 60.0 / (min_bpm * 0.5)).round() as usize;
    let lag_min = (env_rate * 60.0 / (max_bpm * 2.0)).round() as usize;
    (lag_min.max(1), lag_max.max(lag_min + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pulse_envelope(bpm: f32, env_rate: f32, secs: f32) -> OnsetEnvelope {
        let frames = (secs * env_rate) as usize;
        let period = 60.0 / bpm * env_rate;
        let mut novelty = vec![0.02f32; frames];
        let mut t = 3.0f32;
        while (t as usize) < frames {
            novelty[t.round() as usize % frames] = 1.0;
            t += period;
        }
        OnsetEnvelope {
            low_novelty: novelty.clone(),
            novelty,
            env_rate,
            frame_offset: 0.0,
        }
    }

    #[test]
    fn finds_pulse_tempo() {
        let env = pulse_envelope(128.0, 172.0, 30.0);
        let mut planner = FftPlanner::new();
        let est = estimate_tempo(&env, 60.0, 200.0, &mut planner).unwrap();
        assert!((est.bpm - 128.0).abs() < 2.0, "bpm {}", est.bpm);
    }

    #[test]
    fn tracked_beats_follow_pulses() {
        let env = pulse_envelope(120.0, 200.0, 20.0);
        let beats = track_beats(&env, 119.0);
        assert!(beats.len() >= 38);
        let bpm = representative_bpm(&beats.iter().map(|b| b.time).collect::<Vec<_>>()).unwrap();
        assert!((bpm - 120.0).abs() < 0.5, "bpm {bpm}");
        assert!(beats.iter().filter(|b| b.detected).count() >= 38);
    }

    #[test]
    fn merge_joins_near_duplicates() {
        let b = |time| TrackedBeat { time, strength: 1.0, detected: true };
        let merged = merge_close_beats(vec![b(1.0), b(1.02), b(1.5), b(2.0), b(2.049)], 0.05);
        assert_eq!(merged.len(), 3);
        assert!((merged[0].time - 1.01).abs() < 1e-9);
        assert!((merged[2].time - 2.0245).abs() < 1e-9);
    }

    #[test]
    fn representative_uses_middle_third() {
        // slow intro, steady 0.5s middle, rushed outro
        let mut times = vec![0.0, 0.8, 1.6, 2.4];
        let mut t = 2.4;
        for _ in 0..12 { t += 0.5; times.push(t); }
        for _ in 0..4 { t += 0.3; times.push(t); }
        let bpm = representative_bpm(&times).unwrap();
        assert!((bpm - 120.0).abs() < 1e-6);
    }

    #[test]
    fn steadiness_counts_in_tolerance() {
        assert_eq!(steadiness(&[0.5, 0.5, 0.51, 0.7], 0.5), 0.75);
        assert_eq!(steadiness(&[], 0.5), 0.0);
    }
}
