// src/analyzer/key.rs
use std::fmt;

use rustfft::{FftPlanner, num_complex::Complex, num_traits::Zero};
use serde::{Deserialize, Serialize};

use crate::analyzer::utils::hann_window;

// Krumhansl-Kessler probe-tone profiles, tonic first.
const MAJOR_PROFILE: [f32; 12] = [
    6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88,
];
const MINOR_PROFILE: [f32; 12] = [
    6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17,
];

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

const CHROMA_FFT: usize = 4096;
const CHROMA_HOP: usize = 2048;
const CHROMA_MIN_HZ: f32 = 80.0;
const CHROMA_MAX_HZ: f32 = 4000.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyMode {
    Major,
    Minor,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MusicalKey {
    /// 0 = C ... 11 = B.
    pub pitch_class: u8,
    pub mode: KeyMode,
}

impl MusicalKey {
    pub fn new(pitch_class: u8, mode: KeyMode) -> Self {
        Self { pitch_class: pitch_class % 12, mode }
    }

    pub fn major(pitch_class: u8) -> Self {
        Self::new(pitch_class, KeyMode::Major)
    }

    pub fn minor(pitch_class: u8) -> Self {
        Self::new(pitch_class, KeyMode::Minor)
    }

    /// Same mode, tonic moved by `semitones` (either direction).
    pub fn transposed(self, semitones: i32) -> Self {
        let pc = (self.pitch_class as i32 + semitones).rem_euclid(12) as u8;
        Self::new(pc, self.mode)
    }

    /// Relative major/minor: C major <-> A minor.
    pub fn relative(self) -> Self {
        match self.mode {
            KeyMode::Major => Self::new(((self.pitch_class as i32 + 9) % 12) as u8, KeyMode::Minor),
            KeyMode::Minor => Self::new(((self.pitch_class as i32 + 3) % 12) as u8, KeyMode::Major),
        }
    }

    /// Keys mixable with this one: itself, a fifth up, a fifth down, and
    /// its relative.
    pub fn compatible_keys(self) -> [MusicalKey; 4] {
        [self, self.transposed(7), self.transposed(5), self.relative()]
    }

    /// Signed shift in [-6, 6] that moves `self`'s tonic onto `target`'s.
    /// A tritone comes out as +6.
    pub fn shift_to(self, target: MusicalKey) -> i32 {
        let up = (target.pitch_class as i32 - self.pitch_class as i32).rem_euclid(12);
        if up > 6 { up - 12 } else { up }
    }
}

impl fmt::Display for MusicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.mode {
            KeyMode::Major => "major",
            KeyMode::Minor => "minor",
        };
        write!(f, "{} {}", NOTE_NAMES[self.pitch_class as usize % 12], mode)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyEstimate {
    pub key: MusicalKey,
    /// Pearson correlation of the winning profile, floored at 0.
    pub confidence: f32,
}

/// Detects the key of `mono` by correlating its long-term chroma with the
/// 24 rotated key profiles. Silence yields C major at zero confidence.
pub fn detect_key(mono: &[f32], sample_rate: u32, planner: &mut FftPlanner<f32>) -> KeyEstimate {
    let chroma = chromagram(mono, sample_rate, planner);
    key_from_chroma(&chroma)
}

pub fn key_from_chroma(chroma: &[f32; 12]) -> KeyEstimate {
    let mut scores: Vec<(MusicalKey, f32)> = Vec::with_capacity(24);
    for tonic in 0..12u8 {
        scores.push((MusicalKey::major(tonic), correlate(chroma, &MAJOR_PROFILE, tonic as usize)));
        scores.push((MusicalKey::minor(tonic), correlate(chroma, &MINOR_PROFILE, tonic as usize)));
    }
    // higher score, then lower pitch class, then major
    scores.sort_by(|a, b| {
        b.1.total_cmp(&a.1)
            .then(a.0.pitch_class.cmp(&b.0.pitch_class))
            .then(a.0.mode.cmp(&b.0.mode))
    });

    let (key, score) = scores[0];
    KeyEstimate {
        key,
        confidence: score.clamp(0.0, 1.0),
    }
}

/// Summed STFT magnitude per pitch class, normalised to sum 1.
pub fn chromagram(mono: &[f32], sample_rate: u32, planner: &mut FftPlanner<f32>) -> [f32; 12] {
    let mut chroma = [0.0f32; 12];
    if sample_rate == 0 || mono.len() < CHROMA_FFT {
        return chroma;
    }

    let window = hann_window(CHROMA_FFT);
    let fft = planner.plan_fft_forward(CHROMA_FFT);
    let bin_hz = sample_rate as f32 / CHROMA_FFT as f32;

    // pitch class of each bin, or None outside the tonal range
    let bin_classes: Vec<Option<usize>> = (0..CHROMA_FFT / 2 + 1)
        .map(|b| {
            let freq = b as f32 * bin_hz;
            if freq > CHROMA_MIN_HZ && freq < CHROMA_MAX_HZ {
                Some(freq_to_pitch_class(freq))
            } else {
                None
            }
        })
        .collect();

    let mut buf: Vec<Complex<f32>> = vec![Complex::zero(); CHROMA_FFT];
    let mut pos = 0usize;
    while pos + CHROMA_FFT <= mono.len() {
        for k in 0..CHROMA_FFT {
            buf[k] = Complex { re: mono[pos + k] * window[k], im: 0.0 };
        }
        fft.process(&mut buf);
        for (b, class) in bin_classes.iter().enumerate() {
            if let Some(pc) = class {
                let mag = buf[b].norm();
                if mag > 1e-3 {
                    chroma[*pc] += mag;
                }
            }
        }
        pos += CHROMA_HOP;
    }

    let sum: f32 = chroma.iter().sum();
    if sum > 0.0 {
        for v in chroma.iter_mut() {
            *v /= sum;
        }
    }
    chroma
}

fn freq_to_pitch_class(freq: f32) -> usize {
    let midi = 69.0 + 12.0 * (freq / 440.0).log2();
    (midi.round() as i32).rem_euclid(12) as usize
}

/// Pearson correlation between `chroma` rotated to `tonic` and `profile`.
/// Zero when the chroma is flat.
fn correlate(chroma: &[f32; 12], profile: &[f32; 12], tonic: usize) -> f32 {
    let x: Vec<f32> = (0..12).map(|i| chroma[(i + tonic) % 12]).collect();
    let mean_x = x.iter().sum::<f32>() / 12.0;
    let mean_p = profile.iter().sum::<f32>() / 12.0;

    let mut cov = 0.0f32;
    let mut var_x = 0.0f32;
    let mut var_p = 0.0f32;
    for i in 0..12 {
        let dx = x[i] - mean_x;
        let dp = profile[i] - mean_p;
        cov += dx * dp;
        var_x += dx * dx;
        var_p += dp * dp;
    }
    let denom = (var_x * var_p).sqrt();
    if denom < 1e-12 { 0.0 } else { cov / denom }
}
