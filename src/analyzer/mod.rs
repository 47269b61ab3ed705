// src/analyzer/mod.rs

pub mod downbeat;
pub mod key;
pub mod onset;
pub mod tempo;
pub mod utils;

use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};

use crate::config::MixConfig;
use crate::decoder::dsp::downmix_to_mono;
use crate::decoder::resample::resample_mono;
use crate::error::{MixError, Result};
use crate::track::Track;

pub use key::{KeyMode, MusicalKey};

use self::tempo::TrackedBeat;

/// Tempo assumed when no periodicity can be found at all.
pub const FALLBACK_BPM: f64 = 120.0;

/// Detections closer than this are one beat.
const MERGE_GAP_SECS: f64 = 0.05;

/// Everything the grid builder and resolver need to know about one track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatures {
    pub tempo_bpm: f64,
    /// Strictly increasing, in seconds.
    pub beat_times: Vec<f64>,
    /// Ascending indices into `beat_times`.
    pub downbeat_indices: Vec<usize>,
    pub key: MusicalKey,
    /// Tempo confidence in [0, 1].
    pub confidence: f64,
    pub low_confidence: bool,
    pub section_confidence: Vec<SectionConfidence>,
    pub key_confidence: f64,
    pub duration_secs: f64,
    pub beats_per_bar: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionConfidence {
    pub start_secs: f64,
    pub end_secs: f64,
    /// Local tempo from this section's beats, if it has at least two.
    pub local_bpm: Option<f64>,
    pub confidence: f64,
}

impl AudioFeatures {
    /// Features from beats found elsewhere (a tagged file, a test). Tempo comes
    /// from the beat intervals and confidence is taken as full.
    pub fn from_beats(
        beat_times: Vec<f64>,
        downbeat_indices: Vec<usize>,
        key: MusicalKey,
        duration_secs: f64,
    ) -> Self {
        let tempo_bpm = tempo::representative_bpm(&beat_times).unwrap_or(FALLBACK_BPM);
        let gaps = downbeat_indices.windows(2).map(|w| w[1] as i64 - w[0] as i64);
        let beats_per_bar = utils::modal_gap(gaps).map_or(4, |gap| gap as usize);
        Self {
            tempo_bpm,
            beat_times,
            downbeat_indices,
            key,
            confidence: 1.0,
            low_confidence: false,
            section_confidence: Vec::new(),
            key_confidence: 1.0,
            duration_secs,
            beats_per_bar,
        }
    }

    pub fn first_beat(&self) -> Option<f64> {
        self.beat_times.first().copied()
    }
}

#[derive(Clone, Debug)]
pub struct ExtractorOptions {
    pub analysis_sample_rate: u32,
    pub window_size: usize,
    pub hop_size: usize,
    pub band_count: usize,
    pub min_bpm: f32,
    pub max_bpm: f32,
    pub section_secs: f64,
    pub min_duration_secs: f64,
    pub low_confidence_threshold: f64,
    pub silence_threshold: f32,
}

impl Default for ExtractorOptions {
    fn default() -> Self {
        Self {
            analysis_sample_rate: 22_050,
            // 128 / 22050 = 5.8 ms per envelope frame
            window_size: 1024,
            hop_size: 128,
            band_count: 4,
            min_bpm: 60.0,
            max_bpm: 200.0,
            section_secs: 30.0,
            min_duration_secs: 5.0,
            low_confidence_threshold: 0.5,
            silence_threshold: 1e-5,
        }
    }
}

/// Derives tempo, beats, downbeats and key from a track. Holds no state
/// between calls, so one extractor can serve many threads.
#[derive(Clone, Debug, Default)]
pub struct FeatureExtractor {
    options: ExtractorOptions,
}

impl FeatureExtractor {
    pub fn new(options: ExtractorOptions) -> Self {
        Self { options }
    }

    pub fn from_config(config: &MixConfig) -> Self {
        Self::new(ExtractorOptions {
            analysis_sample_rate: config.analysis_sample_rate,
            min_bpm: config.min_bpm as f32,
            max_bpm: config.max_bpm as f32,
            section_secs: config.section_secs,
            min_duration_secs: config.min_duration_secs,
            low_confidence_threshold: config.low_confidence_threshold,
            ..ExtractorOptions::default()
        })
    }

    pub fn options(&self) -> &ExtractorOptions {
        &self.options
    }

    pub fn extract(&self, track: &Track) -> Result<AudioFeatures> {
        let opts = &self.options;
        validate_pcm(track)?;

        let duration_secs = track.duration_secs();
        if duration_secs < opts.min_duration_secs {
            return Err(MixError::TooShort {
                duration_secs,
                min_secs: opts.min_duration_secs,
            });
        }

        let mono = downmix_to_mono(track.samples(), track.channels());
        let rate = opts.analysis_sample_rate;
        let mono = resample_mono(&mono, track.sample_rate(), rate)
            .map_err(|e| MixError::Decode(format!("resample failed: {e}")))?;

        let mut planner = FftPlanner::<f32>::new();
        let key = key::detect_key(&mono, rate, &mut planner);

        if utils::quick_rms(&mono) < opts.silence_threshold {
            log::warn!("{}: silent, assuming {} BPM", track.name, FALLBACK_BPM);
            return Ok(self.fallback_features(duration_secs, key));
        }

        let env = onset::onset_envelope(&mono, rate, opts.window_size, opts.hop_size, opts.band_count, &mut planner);
        let Some(estimate) = tempo::estimate_tempo(&env, opts.min_bpm, opts.max_bpm, &mut planner) else {
            log::warn!("{}: no periodicity found, assuming {} BPM", track.name, FALLBACK_BPM);
            return Ok(self.fallback_features(duration_secs, key));
        };
        log::trace!("{}: tempo candidates {:?}", track.name, estimate.candidates);

        let tracked = tempo::merge_close_beats(tempo::track_beats(&env, estimate.bpm), MERGE_GAP_SECS);
        let beat_times = detected_times(&tracked, duration_secs);

        let tempo_bpm = match tempo::representative_bpm(&beat_times) {
            // missed beats can double the median interval; trust the comb then
            Some(bpm) if (bpm / estimate.bpm as f64 - 1.0).abs() <= 0.15 => bpm,
            _ => estimate.bpm as f64,
        };
        let period = 60.0 / tempo_bpm;

        let confidence = beat_confidence(&tracked, period, 0.0, f64::INFINITY);
        let section_confidence = self.section_confidence(&tracked, period, duration_secs);
        let downbeats = downbeat::detect_downbeats(&beat_times, &env);

        log::debug!(
            "{}: {:.2} BPM ({} beats, confidence {:.2}), {}/bar (contrast {:.2}), key {} ({:.2})",
            track.name,
            tempo_bpm,
            beat_times.len(),
            confidence,
            downbeats.beats_per_bar,
            downbeats.contrast,
            key.key,
            key.confidence
        );

        Ok(AudioFeatures {
            tempo_bpm,
            beat_times,
            downbeat_indices: downbeats.indices,
            key: key.key,
            confidence,
            low_confidence: confidence < opts.low_confidence_threshold,
            section_confidence,
            key_confidence: key.confidence as f64,
            duration_secs,
            beats_per_bar: downbeats.beats_per_bar,
        })
    }

    fn fallback_features(&self, duration_secs: f64, key: key::KeyEstimate) -> AudioFeatures {
        AudioFeatures {
            tempo_bpm: FALLBACK_BPM,
            beat_times: Vec::new(),
            downbeat_indices: Vec::new(),
            key: key.key,
            confidence: 0.0,
            low_confidence: true,
            section_confidence: Vec::new(),
            key_confidence: key.confidence as f64,
            duration_secs,
            beats_per_bar: 4,
        }
    }

    fn section_confidence(&self, tracked: &[TrackedBeat], period: f64, duration_secs: f64) -> Vec<SectionConfidence> {
        let len = self.options.section_secs;
        let mut sections = Vec::new();
        let mut start = 0.0;
        while start < duration_secs {
            let end = (start + len).min(duration_secs);
            let times: Vec<f64> = tracked
                .iter()
                .filter(|b| b.detected && b.time >= start && b.time < end)
                .map(|b| b.time)
                .collect();
            sections.push(SectionConfidence {
                start_secs: start,
                end_secs: end,
                local_bpm: tempo::representative_bpm(&times),
                confidence: beat_confidence(tracked, period, start, end),
            });
            start = end;
        }
        sections
    }
}

fn validate_pcm(track: &Track) -> Result<()> {
    if track.channels() == 0 || track.sample_rate() == 0 {
        return Err(MixError::UnsupportedFormat(format!(
            "{}: {} channels at {} Hz",
            track.name,
            track.channels(),
            track.sample_rate()
        )));
    }
    if track.frames() == 0 {
        return Err(MixError::UnsupportedFormat(format!("{}: no PCM frames", track.name)));
    }
    if track.samples().iter().any(|s| !s.is_finite()) {
        return Err(MixError::UnsupportedFormat(format!("{}: non-finite samples", track.name)));
    }
    Ok(())
}

/// Detected beat times inside the track, strictly increasing.
fn detected_times(tracked: &[TrackedBeat], duration_secs: f64) -> Vec<f64> {
    let mut times: Vec<f64> = Vec::with_capacity(tracked.len());
    for beat in tracked.iter().filter(|b| b.detected) {
        if beat.time < 0.0 || beat.time > duration_secs { continue; }
        if times.last().is_none_or(|&last| beat.time > last) {
            times.push(beat.time);
        }
    }
    times
}

/// Steadiness of detected beats in `[start, end)` times the share of tracked
/// beats that were real detections rather than extrapolations.
fn beat_confidence(tracked: &[TrackedBeat], period: f64, start: f64, end: f64) -> f64 {
    let in_range: Vec<&TrackedBeat> = tracked.iter().filter(|b| b.time >= start && b.time < end).collect();
    if in_range.len() < 2 { return 0.0; }
    let detected: Vec<f64> = in_range.iter().filter(|b| b.detected).map(|b| b.time).collect();
    let coverage = detected.len() as f64 / in_range.len() as f64;
    let intervals: Vec<f64> = detected.windows(2).map(|w| w[1] - w[0]).collect();
    (tempo::steadiness(&intervals, period) * coverage).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::track::TrackId;

    /// Decaying bursts starting at each onset time. Kicks are loud and low,
    /// hats quieter at 1 kHz.
    fn render(onsets: &[(f64, bool)], secs: f64, sr: u32) -> Vec<f32> {
        let n = (secs * sr as f64) as usize;
        let mut out = vec![0.0f32; n];
        for &(at, kick) in onsets {
            let start = (at * sr as f64) as usize;
            if start >= n { continue; }
            let (amp, freq) = if kick { (1.0, 60.0) } else { (0.5, 1_000.0) };
            for i in 0..(sr as usize / 20).min(n - start) {
                let t = i as f64 / sr as f64;
                out[start + i] += (amp * (-t * 60.0).exp() * (2.0 * std::f64::consts::PI * freq * t).sin()) as f32;
            }
        }
        out
    }

    /// One onset per beat from `offset`, a kick on the first beat of every 4/4 bar.
    fn bar_clicks(bpm: f64, offset: f64, secs: f64) -> Vec<(f64, bool)> {
        let period = 60.0 / bpm;
        (0..)
            .map(|k: usize| (offset + k as f64 * period, k % 4 == 0))
            .take_while(|&(t, _)| t < secs)
            .collect()
    }

    fn click_track(bpm: f64, secs: f64, sr: u32) -> Vec<f32> {
        render(&bar_clicks(bpm, 0.25, secs), secs, sr)
    }

    #[test]
    fn click_track_tempo_and_beats() {
        let sr = 22_050;
        let track = Track::new(TrackId(1), "clicks", click_track(120.0, 20.0, sr), 1, sr);
        let features = FeatureExtractor::default().extract(&track).unwrap();
        assert!((features.tempo_bpm - 120.0).abs() < 1.5, "bpm {}", features.tempo_bpm);
        assert!(features.beat_times.len() >= 30);
        assert!(features.beat_times.windows(2).all(|w| w[1] - w[0] >= MERGE_GAP_SECS));
        // first click lands within 10 ms of 0.25 s plus a whole number of beats
        let phase = (features.beat_times[0] - 0.25).rem_euclid(0.5);
        assert!(phase < 0.02 || phase > 0.48, "phase {phase}");
        assert!(!features.section_confidence.is_empty());
    }

    #[test]
    fn downbeats_land_on_kicks() {
        let secs = 16.0;
        for sr in [22_050u32, 44_100] {
            for (bpm, offset) in [(128.0, 0.37), (122.0, 0.1), (126.0, 0.25)] {
                let samples = render(&bar_clicks(bpm, offset, secs), secs, sr);
                let track = Track::new(TrackId(7), "accents", samples, 1, sr);
                let f = FeatureExtractor::default().extract(&track).unwrap();
                let label = format!("{bpm} BPM from {offset}s at {sr} Hz");

                assert_eq!(f.beats_per_bar, 4, "{label}");
                assert!(!f.low_confidence, "{label}: confidence {}", f.confidence);
                assert!(f.downbeat_indices.len() >= 3, "{label}");
                let period = 60.0 / bpm;
                for &i in &f.downbeat_indices[..3] {
                    let t = f.beat_times[i];
                    let beat = ((t - offset) / period).round();
                    assert!((t - offset - beat * period).abs() < 0.03, "{label}: beat at {t:.3}s");
                    assert_eq!((beat as i64).rem_euclid(4), 0, "{label}: downbeat on a hat at {t:.3}s");
                }
            }
        }
    }

    #[test]
    fn erratic_pulse_is_low_confidence() {
        let mut rng = StdRng::seed_from_u64(11);
        let secs = 20.0;
        let mut onsets = Vec::new();
        for (t, kick) in bar_clicks(120.0, 0.25, secs) {
            if rng.random_bool(0.4) {
                onsets.push((t + rng.random_range(-0.04..0.04), kick));
            }
        }
        let track = Track::new(TrackId(8), "erratic", render(&onsets, secs, 22_050), 1, 22_050);
        let extractor = FeatureExtractor::default();
        let f = extractor.extract(&track).unwrap();

        // not the silence fallback: beats were found, just not trusted
        assert!(!f.beat_times.is_empty());
        assert!(f.confidence < extractor.options().low_confidence_threshold, "confidence {}", f.confidence);
        assert!(f.low_confidence);
    }

    #[test]
    fn section_confidence_follows_local_steadiness() {
        let mut rng = StdRng::seed_from_u64(5);
        let secs = 20.0;
        let mut onsets = Vec::new();
        for (t, kick) in bar_clicks(120.0, 0.25, secs) {
            // steady first half, broken pulse in the second
            if t < 10.0 || rng.random_bool(0.3) {
                onsets.push((t, kick));
            }
        }
        let track = Track::new(TrackId(9), "breakdown", render(&onsets, secs, 22_050), 1, 22_050);
        let extractor = FeatureExtractor::new(ExtractorOptions {
            section_secs: 10.0,
            ..ExtractorOptions::default()
        });
        let f = extractor.extract(&track).unwrap();

        assert_eq!(f.section_confidence.len(), 2);
        let (steady, broken) = (&f.section_confidence[0], &f.section_confidence[1]);
        assert_eq!((steady.start_secs, steady.end_secs), (0.0, 10.0));
        assert!(steady.confidence > 0.8, "steady {}", steady.confidence);
        assert!(broken.confidence < 0.5, "broken {}", broken.confidence);
        assert!(steady.local_bpm.is_some());
    }

    #[test]
    fn extraction_is_deterministic() {
        let sr = 22_050;
        let track = Track::new(TrackId(2), "clicks", click_track(126.0, 12.0, sr), 1, sr);
        let extractor = FeatureExtractor::default();
        assert_eq!(extractor.extract(&track).unwrap(), extractor.extract(&track).unwrap());
    }

    #[test]
    fn short_track_is_too_short() {
        let track = Track::new(TrackId(3), "short", vec![0.0; 22_050 * 4], 1, 22_050);
        let err = FeatureExtractor::default().extract(&track).unwrap_err();
        assert!(matches!(err, MixError::TooShort { .. }));
    }

    #[test]
    fn bad_pcm_is_unsupported() {
        let zero_rate = Track::new(TrackId(4), "zero", vec![0.0; 100], 1, 0);
        assert!(matches!(
            FeatureExtractor::default().extract(&zero_rate),
            Err(MixError::UnsupportedFormat(_))
        ));
        let mut samples = vec![0.0; 22_050 * 6];
        samples[10] = f32::NAN;
        let nan = Track::new(TrackId(5), "nan", samples, 1, 22_050);
        assert!(matches!(
            FeatureExtractor::default().extract(&nan),
            Err(MixError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn silence_is_low_confidence_not_error() {
        let track = Track::new(TrackId(6), "silence", vec![0.0; 22_050 * 6], 1, 22_050);
        let features = FeatureExtractor::default().extract(&track).unwrap();
        assert!(features.low_confidence);
        assert_eq!(features.tempo_bpm, FALLBACK_BPM);
        assert!(features.beat_times.is_empty());
    }

    #[test]
    fn from_beats_infers_tempo_and_meter() {
        let beats: Vec<f64> = (0..16).map(|i| i as f64 * 0.5).collect();
        let f = AudioFeatures::from_beats(beats, vec![0, 3, 6, 9], MusicalKey::minor(9), 8.0);
        assert!((f.tempo_bpm - 120.0).abs() < 1e-9);
        assert_eq!(f.beats_per_bar, 3);
    }

    #[test]
    fn from_beats_meter_matches_grid_bar_length() {
        let beats: Vec<f64> = (0..24).map(|i| i as f64 * 0.5).collect();
        // one short pickup bar, then 4/4
        let f = AudioFeatures::from_beats(beats, vec![0, 3, 7, 11, 15, 19], MusicalKey::major(0), 12.0);
        assert_eq!(f.beats_per_bar, 4);
        let grid = crate::grid::build_grid(&f, &crate::grid::GridOptions::default()).unwrap();
        assert_eq!(grid.bar_length as usize, f.beats_per_bar);
    }
}
