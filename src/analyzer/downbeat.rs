// src/analyzer/downbeat.rs
use crate::analyzer::onset::OnsetEnvelope;

/// Meters tried, in tie-break order.
const METERS: [usize; 2] = [4, 3];

#[derive(Debug, Clone, PartialEq)]
pub struct DownbeatEstimate {
    pub beats_per_bar: usize,
    /// Indices into the beat list, ascending.
    pub indices: Vec<usize>,
    /// Mean low-band strength at downbeats minus the mean elsewhere.
    pub contrast: f32,
}

/// Picks the (meter, phase) whose candidate downbeats carry the most
/// low-frequency onset energy relative to the other beats. Kicks and bass
/// notes land on the one far more often than on the off-beats.
pub fn detect_downbeats(beat_times: &[f64], env: &OnsetEnvelope) -> DownbeatEstimate {
    let strengths: Vec<f32> = beat_times
        .iter()
        .map(|&t| low_band_strength(env, t))
        .collect();
    downbeats_from_strengths(&strengths)
}

pub fn downbeats_from_strengths(strengths: &[f32]) -> DownbeatEstimate {
    let mut best: Option<(usize, usize, f32)> = None;

    for &meter in METERS.iter() {
        // need at least two bars to compare anything
        if strengths.len() < meter * 2 { continue; }
        for phase in 0..meter {
            let (mut on_sum, mut on_n, mut off_sum, mut off_n) = (0.0f32, 0usize, 0.0f32, 0usize);
            for (i, &s) in strengths.iter().enumerate() {
                if i >= phase && (i - phase) % meter == 0 {
                    on_sum += s;
                    on_n += 1;
                } else {
                    off_sum += s;
                    off_n += 1;
                }
            }
            if on_n == 0 || off_n == 0 { continue; }
            let contrast = on_sum / on_n as f32 - off_sum / off_n as f32;
            if best.is_none_or(|(_, _, c)| contrast > c) {
                best = Some((meter, phase, contrast));
            }
        }
    }

    match best {
        Some((meter, phase, contrast)) => DownbeatEstimate {
            beats_per_bar: meter,
            indices: (phase..strengths.len()).step_by(meter).collect(),
            contrast,
        },
        None => DownbeatEstimate {
            beats_per_bar: 4,
            indices: Vec::new(),
            contrast: 0.0,
        },
    }
}

/// How far before a beat the low-band peak may sit.
const LEAD_SECS: f32 = 0.012;
/// Linear flux peaks once the kick is well inside the STFT window, so the
/// search reaches further after the beat than before it.
const LAG_SECS: f32 = 0.03;

/// Peak of the low-band envelope from 12 ms before to 30 ms after `time`.
fn low_band_strength(env: &OnsetEnvelope, time: f64) -> f32 {
    if env.low_novelty.is_empty() { return 0.0; }
    let center = env.secs_to_frame(time).round();
    let lead = (LEAD_SECS * env.env_rate).ceil().max(1.0);
    let lag = (LAG_SECS * env.env_rate).ceil().max(1.0);
    let last = (env.low_novelty.len() - 1) as f32;
    let start = (center - lead).clamp(0.0, last) as usize;
    let end = (center + lag).clamp(0.0, last) as usize;
    env.low_novelty[start..=end].iter().cloned().fold(0.0f32, f32::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_four_with_offset_phase() {
        let strengths: Vec<f32> = (0..32).map(|i| if i % 4 == 1 { 1.0 } else { 0.2 }).collect();
        let est = downbeats_from_strengths(&strengths);
        assert_eq!(est.beats_per_bar, 4);
        assert_eq!(est.indices[0], 1);
        assert_eq!(est.indices[1], 5);
    }

    #[test]
    fn waltz() {
        let strengths: Vec<f32> = (0..30).map(|i| if i % 3 == 0 { 1.0 } else { 0.1 }).collect();
        let est = downbeats_from_strengths(&strengths);
        assert_eq!(est.beats_per_bar, 3);
        assert_eq!(est.indices, (0..30).step_by(3).collect::<Vec<_>>());
    }

    #[test]
    fn flat_prefers_four() {
        let est = downbeats_from_strengths(&[0.5; 16]);
        assert_eq!(est.beats_per_bar, 4);
        assert_eq!(est.indices, vec![0, 4, 8, 12]);
    }

    #[test]
    fn too_few_beats() {
        let est = downbeats_from_strengths(&[1.0, 0.0, 0.0]);
        assert!(est.indices.is_empty());
        assert_eq!(est.beats_per_bar, 4);
    }

    #[test]
    fn reads_low_band_near_beat() {
        let mut low = vec![0.0f32; 400];
        low[200] = 0.9;
        let env = OnsetEnvelope {
            novelty: low.clone(),
            low_novelty: low,
            env_rate: 200.0,
            frame_offset: 0.0,
        };
        let est = detect_downbeats(&[0.5, 1.0, 1.5], &env);
        assert!(est.indices.is_empty());
        assert!((low_band_strength(&env, 1.0) - 0.9).abs() < 1e-6);
        assert_eq!(low_band_strength(&env, 0.5), 0.0);
    }
}
