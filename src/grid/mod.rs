// src/grid/mod.rs

pub mod fit;

use serde::{Deserialize, Serialize};

use crate::analyzer::utils::modal_gap;
use crate::analyzer::{AudioFeatures, FALLBACK_BPM};
use crate::config::MixConfig;
use crate::error::{MixError, Result};

/// Where a grid came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridSource {
    /// Fitted to detected beats, with bar structure from downbeats.
    Fitted,
    /// Reported tempo only. Every beat is its own bar.
    FixedTempo,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LabeledBeat {
    pub time: f64,
    /// 0-based. Bar 0 may be a partial pickup bar.
    pub bar_index: u32,
    /// 0 on downbeats.
    pub beat_in_bar: u32,
}

/// Quantised beat positions covering the whole track.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BeatGrid {
    /// Time of the first labeled beat, within `[0, period)`.
    pub origin_time: f64,
    /// Seconds per beat.
    pub period: f64,
    /// Beats per bar.
    pub bar_length: u32,
    pub labeled_beats: Vec<LabeledBeat>,
    pub duration_secs: f64,
    pub source: GridSource,
}

#[derive(Clone, Debug)]
pub struct GridOptions {
    pub min_beats: usize,
    pub max_iterations: usize,
}

impl Default for GridOptions {
    fn default() -> Self {
        Self {
            min_beats: 8,
            max_iterations: 50,
        }
    }
}

impl GridOptions {
    pub fn from_config(config: &MixConfig) -> Self {
        Self {
            min_beats: config.min_beats_for_grid,
            ..Self::default()
        }
    }
}

/// Fits `time = origin + period * beat_number` to the detected beats and
/// labels every beat from 0 s to the end of the track.
pub fn build_grid(features: &AudioFeatures, options: &GridOptions) -> Result<BeatGrid> {
    let times = &features.beat_times;
    if times.len() < options.min_beats {
        return Err(MixError::InsufficientBeats {
            found: times.len(),
            required: options.min_beats,
        });
    }

    let numbers = fit::reindex_beats(times);
    let line = fit::irls_line(&numbers, times, options.max_iterations).ok_or_else(|| {
        MixError::InsufficientBeats {
            found: times.len(),
            required: options.min_beats,
        }
    })?;

    let period = line.slope;
    let bar_length = bar_length_from_downbeats(&features.downbeat_indices, &numbers);

    // beat number of the first grid beat at or after 0 s
    let first_number = (-line.intercept / period - 1e-9).ceil() as i64;
    let origin_time = (line.intercept + period * first_number as f64).max(0.0);

    let anchor_number = features
        .downbeat_indices
        .first()
        .and_then(|&i| numbers.get(i).copied())
        .unwrap_or(0);
    let anchor = anchor_number - first_number;

    let duration_secs = features.duration_secs.max(times[times.len() - 1]);
    let labeled_beats = label_beats(origin_time, period, duration_secs, bar_length, anchor);

    log::debug!(
        "grid: {:.3} BPM, origin {:.3}s, {}/bar, {} beats ({} iterations)",
        60.0 / period,
        origin_time,
        bar_length,
        labeled_beats.len(),
        line.iterations
    );

    Ok(BeatGrid {
        origin_time,
        period,
        bar_length,
        labeled_beats,
        duration_secs,
        source: GridSource::Fitted,
    })
}

/// Grid when fitting is impossible: `build_grid`'s error is returned next to
/// a fixed-tempo grid built from the reported tempo.
pub fn grid_or_fixed(features: &AudioFeatures, options: &GridOptions) -> (BeatGrid, Option<MixError>) {
    match build_grid(features, options) {
        Ok(grid) => (grid, None),
        Err(e) => {
            log::warn!("grid fit failed ({}), falling back to fixed tempo {:.2} BPM", e, features.tempo_bpm);
            let first = features.first_beat().unwrap_or(0.0);
            (BeatGrid::fixed_tempo(features.tempo_bpm, first, features.duration_secs), Some(e))
        }
    }
}

/// Most common gap between consecutive downbeats in beat numbers.
/// Ties go to the shorter bar; 4 when there is nothing to measure.
fn bar_length_from_downbeats(downbeats: &[usize], numbers: &[i64]) -> u32 {
    let gaps = downbeats.windows(2).filter_map(|pair| {
        let (a, b) = (numbers.get(pair[0])?, numbers.get(pair[1])?);
        Some(b - a)
    });
    modal_gap(gaps).map_or(4, |gap| gap as u32)
}

fn label_beats(origin: f64, period: f64, duration: f64, bar_length: u32, anchor: i64) -> Vec<LabeledBeat> {
    let bar_len = bar_length.max(1) as i64;
    let first_bar = (-anchor).div_euclid(bar_len);
    let count = ((duration - origin) / period + 1e-9).floor().max(0.0) as i64 + 1;
    (0..count)
        .map(|k| {
            let rel = k - anchor;
            LabeledBeat {
                time: origin + period * k as f64,
                bar_index: (rel.div_euclid(bar_len) - first_bar) as u32,
                beat_in_bar: rel.rem_euclid(bar_len) as u32,
            }
        })
        .collect()
}

impl BeatGrid {
    /// Grid from a tempo alone, phase-locked to `first_beat`. No bar
    /// structure: every beat is a bar of one beat.
    pub fn fixed_tempo(tempo_bpm: f64, first_beat: f64, duration_secs: f64) -> Self {
        let bpm = if tempo_bpm.is_finite() && tempo_bpm > 0.0 {
            tempo_bpm
        } else {
            log::warn!("unusable tempo {} for fixed grid, using {}", tempo_bpm, FALLBACK_BPM);
            FALLBACK_BPM
        };
        let period = 60.0 / bpm;
        let origin_time = if first_beat.is_finite() { first_beat.rem_euclid(period) } else { 0.0 };
        let duration_secs = duration_secs.max(0.0);
        Self {
            origin_time,
            period,
            bar_length: 1,
            labeled_beats: label_beats(origin_time, period, duration_secs, 1, 0),
            duration_secs,
            source: GridSource::FixedTempo,
        }
    }

    pub fn tempo_bpm(&self) -> f64 {
        60.0 / self.period
    }

    pub fn len(&self) -> usize {
        self.labeled_beats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labeled_beats.is_empty()
    }

    pub fn has_bar_structure(&self) -> bool {
        self.source == GridSource::Fitted
    }

    pub fn time_of(&self, index: usize) -> Option<f64> {
        self.labeled_beats.get(index).map(|b| b.time)
    }

    pub fn is_downbeat(&self, index: usize) -> bool {
        self.labeled_beats.get(index).is_some_and(|b| b.beat_in_bar == 0)
    }

    /// Index of the grid beat closest to `time`, clamped to the grid.
    pub fn beat_index_near(&self, time: f64) -> Option<usize> {
        if self.labeled_beats.is_empty() { return None; }
        let raw = ((time - self.origin_time) / self.period).round();
        let last = (self.labeled_beats.len() - 1) as f64;
        Some(raw.clamp(0.0, last) as usize)
    }

    /// Indices of every beat with `beat_in_bar == 0`.
    pub fn downbeat_indices(&self) -> Vec<usize> {
        self.labeled_beats
            .iter()
            .enumerate()
            .filter(|(_, b)| b.beat_in_bar == 0)
            .map(|(i, _)| i)
            .collect()
    }

    /// Downbeat nearest to `time`; earlier one on ties.
    pub fn downbeat_near(&self, time: f64) -> Option<usize> {
        self.downbeat_indices()
            .into_iter()
            .min_by(|&a, &b| {
                let da = (self.labeled_beats[a].time - time).abs();
                let db = (self.labeled_beats[b].time - time).abs();
                da.total_cmp(&db).then(a.cmp(&b))
            })
    }

    /// Beats with `start <= time <= end`, for drawing grid lines.
    pub fn beats_in_range(&self, start: f64, end: f64) -> &[LabeledBeat] {
        let lo = self.labeled_beats.partition_point(|b| b.time < start);
        let hi = self.labeled_beats.partition_point(|b| b.time <= end);
        &self.labeled_beats[lo..hi.max(lo)]
    }
}
