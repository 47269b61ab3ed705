// src/analyzer/onset.rs
use rustfft::{FftPlanner, num_complex::Complex, num_traits::Zero};

use crate::analyzer::utils::hann_window;

/// Cut-off for the low band used to find kick-heavy downbeats.
const LOW_BAND_HZ: f32 = 150.0;

/// Onset-strength envelopes sampled once per STFT hop.
#[derive(Debug, Clone)]
pub struct OnsetEnvelope {
    /// Multi-band positive spectral flux, peak-normalised to [0, 1].
    pub novelty: Vec<f32>,
    /// Positive flux of linear magnitude below `LOW_BAND_HZ`, peak-normalised
    /// to [0, 1]. Uncompressed, so broadband attacks leaking into the low bins
    /// stay small next to a kick.
    pub low_novelty: Vec<f32>,
    /// Envelope frames per second.
    pub env_rate: f32,
    /// Seconds from a frame's start to the instant its flux describes. With
    /// log-compressed magnitudes an onset registers as soon as it enters the
    /// trailing edge of the window, not when it reaches the centre.
    pub frame_offset: f32,
}

impl OnsetEnvelope {
    pub fn frame_to_secs(&self, frame: f32) -> f64 {
        (frame / self.env_rate + self.frame_offset) as f64
    }

    pub fn secs_to_frame(&self, secs: f64) -> f32 {
        (secs as f32 - self.frame_offset) * self.env_rate
    }
}

/// Streams an STFT over `mono` and keeps only the flux envelopes, so memory
/// stays linear in frame count rather than frames x bins.
pub fn onset_envelope(
    mono: &[f32],
    sample_rate: u32,
    window_size: usize,
    hop: usize,
    band_count: usize,
    planner: &mut FftPlanner<f32>,
) -> OnsetEnvelope {
    let n = window_size.next_power_of_two();
    let hop = hop.max(1);
    let half = n / 2 + 1;
    let window = hann_window(n);
    let fft = planner.plan_fft_forward(n);

    let bin_hz = sample_rate as f32 / n as f32;
    let low_bins = ((LOW_BAND_HZ / bin_hz).ceil() as usize).clamp(1, half);
    let band_count = band_count.max(1);
    let band_edges: Vec<usize> = (0..=band_count)
        .map(|i| (((i as f32 / band_count as f32) * half as f32).round() as usize).min(half))
        .collect();

    let mut novelty = Vec::new();
    let mut low_novelty = Vec::new();
    let mut prev = vec![0.0f32; half];
    let mut cur = vec![0.0f32; half];
    let mut prev_low = vec![0.0f32; low_bins];
    let mut cur_low = vec![0.0f32; low_bins];
    let mut inbuf: Vec<Complex<f32>> = vec![Complex::zero(); n];

    let mut pos = 0usize;
    let mut first = true;
    while pos + n <= mono.len() {
        for k in 0..n {
            inbuf[k].re = mono[pos + k] * window[k];
            inbuf[k].im = 0.0;
        }
        fft.process(&mut inbuf);
        for b in 0..half {
            let mag = inbuf[b].norm();
            if b < low_bins { cur_low[b] = mag; }
            // log compression keeps quiet onsets visible next to loud ones
            cur[b] = (1.0 + 100.0 * mag).ln();
        }

        if first {
            novelty.push(0.0);
            low_novelty.push(0.0);
            first = false;
        } else {
            let mut sum_flux = 0.0f32;
            for bidx in 0..band_count {
                let mut band_flux = 0.0f32;
                for k in band_edges[bidx]..band_edges[bidx + 1] {
                    let diff = cur[k] - prev[k];
                    if diff > 0.0 { band_flux += diff; }
                }
                let weight = if bidx + 1 == band_count && band_count > 2 { 0.8 } else { 1.0 };
                sum_flux += weight * band_flux;
            }
            novelty.push(sum_flux);

            let mut low_flux = 0.0f32;
            for k in 0..low_bins {
                let diff = cur_low[k] - prev_low[k];
                if diff > 0.0 { low_flux += diff; }
            }
            low_novelty.push(low_flux);
        }

        std::mem::swap(&mut prev, &mut cur);
        std::mem::swap(&mut prev_low, &mut cur_low);
        pos += hop;
    }

    normalize_max(&mut novelty);
    normalize_max(&mut low_novelty);

    OnsetEnvelope {
        novelty,
        low_novelty,
        env_rate: sample_rate as f32 / hop as f32,
        frame_offset: n.saturating_sub(hop / 2) as f32 / sample_rate as f32,
    }
}

fn normalize_max(x: &mut [f32]) {
    let maxv = x.iter().cloned().fold(0.0f32, f32::max);
    if maxv > 0.0 {
        for v in x.iter_mut() { *v /= maxv; }
    }
}
