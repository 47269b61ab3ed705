// src/planner/mod.rs

pub mod fade;

use serde::{Deserialize, Serialize};

pub use fade::{CurvePoint, FadeCurve};

use crate::config::MixConfig;
use crate::error::{MixError, Result};
use crate::grid::BeatGrid;
use crate::resolver::{Resolution, StretchBounds};
use crate::track::{Track, TrackId};

/// Beats per bar assumed for window length when the outgoing grid has none.
const ASSUMED_BAR: u32 = 4;

/// Non-fatal conditions attached to a successful plan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanWarning {
    /// The window had to shrink to fit inside both tracks.
    TruncatedWindow { requested_beats: f64, actual_beats: f64 },
    /// At least one grid is fixed-tempo, so the window is beat- but not bar-aligned.
    NoBarStructure,
}

impl PlanWarning {
    pub fn reason(&self) -> &'static str {
        match self {
            PlanWarning::TruncatedWindow { .. } => "truncated_window",
            PlanWarning::NoBarStructure => "no_bar_structure",
        }
    }
}

/// User-chosen transition points, in track-local seconds. `None` means the
/// planner picks: the end of A's last full bar and B's first downbeat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CuePoints {
    pub cue_out_a: Option<f64>,
    pub cue_in_b: Option<f64>,
}

/// Window edges as sample-frame offsets in each track's own rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CueFrames {
    pub fade_start_a: u64,
    pub fade_end_a: u64,
    pub fade_start_b: u64,
    pub fade_end_b: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionPlan {
    pub track_a_id: TrackId,
    pub track_b_id: TrackId,
    pub stretch_ratio_a: f64,
    pub stretch_ratio_b: f64,
    /// Track-local seconds.
    pub fade_start_a: f64,
    pub fade_end_a: f64,
    pub fade_start_b: f64,
    pub fade_end_b: f64,
    pub key_shift_semitones_b: i32,
    /// Index into A's grid that lines up with `alignment_beat_b`.
    pub alignment_beat_a: usize,
    pub alignment_beat_b: usize,
    pub target_bpm: f64,
    pub fade_curve: FadeCurve,
    pub cues: CueFrames,
    pub warnings: Vec<PlanWarning>,
}

impl TransitionPlan {
    /// Fade progress in [0, 1] at `offset_a` seconds into A.
    pub fn progress_at(&self, offset_a: f64) -> f64 {
        let len = self.fade_end_a - self.fade_start_a;
        if len <= 0.0 { return 1.0; }
        ((offset_a - self.fade_start_a) / len).clamp(0.0, 1.0)
    }

    /// Position in B that plays together with `offset_a` in A. Valid past the
    /// window too, which is how the cursor lands on B after the fade.
    pub fn map_a_to_b(&self, offset_a: f64) -> f64 {
        let len_a = self.fade_end_a - self.fade_start_a;
        let len_b = self.fade_end_b - self.fade_start_b;
        if len_a <= 0.0 { return self.fade_end_b; }
        self.fade_start_b + (offset_a - self.fade_start_a) * len_b / len_a
    }

    pub fn is_truncated(&self) -> bool {
        self.warnings.iter().any(|w| matches!(w, PlanWarning::TruncatedWindow { .. }))
    }
}

#[derive(Debug, Clone)]
pub struct PlannerOptions {
    pub crossfade_bars: u32,
    pub bounds: StretchBounds,
    pub fade_curve: FadeCurve,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        Self {
            crossfade_bars: 4,
            bounds: StretchBounds::default(),
            fade_curve: FadeCurve::Linear,
        }
    }
}

impl PlannerOptions {
    pub fn from_config(config: &MixConfig) -> Self {
        Self {
            crossfade_bars: config.crossfade_bars,
            bounds: config.stretch_ratio_bounds.into(),
            fade_curve: config.fade_curve,
        }
    }
}

/// Lays out the crossfade from A into B: picks the two alignment beats,
/// centres a bar-aligned window on them and shrinks it evenly if either
/// track runs out. Pure; identical inputs give identical plans.
pub fn plan(
    track_a: &Track,
    track_b: &Track,
    grid_a: &BeatGrid,
    grid_b: &BeatGrid,
    resolution: &Resolution,
    cues: &CuePoints,
    options: &PlannerOptions,
) -> Result<TransitionPlan> {
    let stretch_ratio_a = resolution.stretch_ratio_for(grid_a.tempo_bpm());
    let stretch_ratio_b = resolution.stretch_ratio_for(grid_b.tempo_bpm());
    for (name, ratio) in [("a", stretch_ratio_a), ("b", stretch_ratio_b)] {
        if !options.bounds.contains(ratio) {
            let msg = format!(
                "stretch ratio {} = {} outside [{}, {}] for {} -> {}",
                name, ratio, options.bounds.min, options.bounds.max, track_a.id, track_b.id
            );
            log::error!("{}", msg);
            return Err(MixError::InternalInvariantViolation(msg));
        }
    }

    let candidates_a = grid_a.downbeat_indices();
    let candidates_b = grid_b.downbeat_indices();
    if candidates_a.is_empty() || candidates_b.is_empty() {
        let (track, grid) = if candidates_a.is_empty() { (track_a, grid_a) } else { (track_b, grid_b) };
        return Err(MixError::NoTransitionRoom {
            track: track.id,
            needed_secs: grid.origin_time + grid.period,
        });
    }

    let bar_a = if grid_a.has_bar_structure() { grid_a.bar_length } else { ASSUMED_BAR };
    let requested_beats = (options.crossfade_bars.max(1) * bar_a) as f64;
    let half = requested_beats / 2.0;

    let mut pos_a = match cues.cue_out_a {
        Some(t) => nearest_position(grid_a, &candidates_a, t),
        None => default_position_a(&candidates_a, half),
    };
    let mut pos_b = match cues.cue_in_b {
        Some(t) => nearest_position(grid_b, &candidates_b, t),
        None => default_position_b(&candidates_b, half),
    };

    // A runs out after its alignment beat, B before its own: move one bar away
    if room_after(grid_a, candidates_a[pos_a]) < 1.0 && pos_a > 0 {
        pos_a -= 1;
    }
    if room_before(grid_b, candidates_b[pos_b]) < 1.0 && pos_b + 1 < candidates_b.len() {
        pos_b += 1;
    }
    let alignment_beat_a = candidates_a[pos_a];
    let alignment_beat_b = candidates_b[pos_b];

    let h = half
        .min(room_before(grid_a, alignment_beat_a))
        .min(room_after(grid_a, alignment_beat_a))
        .min(room_before(grid_b, alignment_beat_b))
        .min(room_after(grid_b, alignment_beat_b));
    if h <= 1e-6 {
        let (track, grid) = if room_before(grid_b, alignment_beat_b).min(room_after(grid_b, alignment_beat_b)) <= h {
            (track_b, grid_b)
        } else {
            (track_a, grid_a)
        };
        return Err(MixError::NoTransitionRoom {
            track: track.id,
            needed_secs: 2.0 * grid.period,
        });
    }

    let mut warnings = Vec::new();
    if !grid_a.has_bar_structure() || !grid_b.has_bar_structure() {
        warnings.push(PlanWarning::NoBarStructure);
    }
    if h < half - 1e-9 {
        log::debug!(
            "{} -> {}: window shrunk from {} to {:.2} beats",
            track_a.id, track_b.id, requested_beats, 2.0 * h
        );
        warnings.push(PlanWarning::TruncatedWindow {
            requested_beats,
            actual_beats: 2.0 * h,
        });
    }

    let (fade_start_a, fade_end_a) = window_around(grid_a, alignment_beat_a, h);
    let (fade_start_b, fade_end_b) = window_around(grid_b, alignment_beat_b, h);

    let cues = CueFrames {
        fade_start_a: to_frames(track_a, fade_start_a),
        fade_end_a: to_frames(track_a, fade_end_a),
        fade_start_b: to_frames(track_b, fade_start_b),
        fade_end_b: to_frames(track_b, fade_end_b),
    };

    Ok(TransitionPlan {
        track_a_id: track_a.id,
        track_b_id: track_b.id,
        stretch_ratio_a,
        stretch_ratio_b,
        fade_start_a,
        fade_end_a,
        fade_start_b,
        fade_end_b,
        key_shift_semitones_b: resolution.key_shift_semitones_b,
        alignment_beat_a,
        alignment_beat_b,
        target_bpm: resolution.target_bpm,
        fade_curve: options.fade_curve,
        cues,
        warnings,
    })
}

/// Candidate whose window would end on A's last downbeat: the downbeat at
/// or before `last - half`, else the first one.
fn default_position_a(candidates: &[usize], half: f64) -> usize {
    let Some(&last) = candidates.last() else { return 0; };
    let target = last as f64 - half;
    candidates
        .iter()
        .rposition(|&c| c as f64 <= target + 1e-9)
        .unwrap_or(0)
}

/// First candidate with a full half-window after B's first downbeat, else the last.
fn default_position_b(candidates: &[usize], half: f64) -> usize {
    let Some(&first) = candidates.first() else { return 0; };
    let target = first as f64 + half;
    candidates
        .iter()
        .position(|&c| c as f64 >= target - 1e-9)
        .unwrap_or(candidates.len().saturating_sub(1))
}

/// Candidate nearest to `time`; earlier on ties.
fn nearest_position(grid: &BeatGrid, candidates: &[usize], time: f64) -> usize {
    let mut best = 0usize;
    let mut best_d = f64::INFINITY;
    for (pos, &c) in candidates.iter().enumerate() {
        let d = grid.time_of(c).map_or(f64::INFINITY, |t| (t - time).abs());
        if d < best_d {
            best_d = d;
            best = pos;
        }
    }
    best
}

/// Beats of audio between the track start and beat `index`.
fn room_before(grid: &BeatGrid, index: usize) -> f64 {
    grid.time_of(index).map_or(0.0, |t| t.max(0.0) / grid.period)
}

/// Beats of audio between beat `index` and the track end.
fn room_after(grid: &BeatGrid, index: usize) -> f64 {
    grid.time_of(index).map_or(0.0, |t| (grid.duration_secs - t).max(0.0) / grid.period)
}

fn window_around(grid: &BeatGrid, index: usize, half_beats: f64) -> (f64, f64) {
    let center = grid.time_of(index).unwrap_or(grid.origin_time);
    let start = (center - half_beats * grid.period).max(0.0);
    let end = (center + half_beats * grid.period).min(grid.duration_secs);
    (start, end)
}

fn to_frames(track: &Track, secs: f64) -> u64 {
    track.frame_at(secs) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{AudioFeatures, MusicalKey};
    use crate::grid::{GridOptions, build_grid};
    use crate::resolver::resolve;

    fn track(id: u32, secs: f64) -> Track {
        // silent audio; only ids, rate and duration matter here
        Track::new(TrackId(id), format!("t{id}"), vec![0.0; (secs * 1_000.0) as usize], 1, 1_000)
    }

    fn fitted(bpm: f64, first: f64, secs: f64) -> BeatGrid {
        let period = 60.0 / bpm;
        let times: Vec<f64> = (0..)
            .map(|i| first + period * i as f64)
            .take_while(|&t| t < secs)
            .collect();
        let downbeats: Vec<usize> = (0..times.len()).step_by(4).collect();
        let f = AudioFeatures::from_beats(times, downbeats, MusicalKey::major(0), secs);
        build_grid(&f, &GridOptions::default()).unwrap()
    }

    fn plan_default(a: &BeatGrid, b: &BeatGrid, ta: &Track, tb: &Track) -> TransitionPlan {
        let r = resolve(a, MusicalKey::major(0), b, MusicalKey::major(0), StretchBounds::default()).unwrap();
        plan(ta, tb, a, b, &r, &CuePoints::default(), &PlannerOptions::default()).unwrap()
    }

    #[test]
    fn default_window_is_four_bars_on_downbeats() {
        let (ta, tb) = (track(1, 60.0), track(2, 60.0));
        let a = fitted(120.0, 0.0, 60.0);
        let b = fitted(120.0, 0.0, 60.0);
        let p = plan_default(&a, &b, &ta, &tb);

        assert!(p.warnings.is_empty(), "{:?}", p.warnings);
        assert!(a.is_downbeat(p.alignment_beat_a));
        assert!(b.is_downbeat(p.alignment_beat_b));
        // 16 beats of 0.5 s
        assert!((p.fade_end_a - p.fade_start_a - 8.0).abs() < 1e-9);
        assert!((p.fade_end_b - p.fade_start_b - 8.0).abs() < 1e-9);
        // ends on A's last downbeat (the final beat at 60 s), starts at B's first (0 s)
        assert!((p.fade_end_a - 60.0).abs() < 1e-9);
        assert!(p.fade_start_b.abs() < 1e-9);
        assert_eq!(p.cues.fade_end_a, 60_000);
        assert_eq!(p.cues.fade_start_b, 0);
        assert_eq!(p.stretch_ratio_a, 1.0);
    }

    #[test]
    fn cue_at_b_start_truncates() {
        let (ta, tb) = (track(1, 60.0), track(2, 60.0));
        let a = fitted(120.0, 0.0, 60.0);
        let b = fitted(120.0, 0.25, 60.0);
        let r = resolve(&a, MusicalKey::major(0), &b, MusicalKey::major(0), StretchBounds::default()).unwrap();
        let cues = CuePoints { cue_out_a: Some(30.0), cue_in_b: Some(0.0) };
        let p = plan(&ta, &tb, &a, &b, &r, &cues, &PlannerOptions::default()).unwrap();

        assert!(p.is_truncated());
        assert!(p.fade_start_b >= 0.0);
        assert!(p.fade_start_a < p.fade_end_a);
        assert!(p.fade_end_b - p.fade_start_b < 8.0);
        // moved one bar forward off the very first downbeat
        assert!((b.time_of(p.alignment_beat_b).unwrap() - 2.25).abs() < 1e-9);
        // both sides of the window stay the same number of beats
        let beats_a = (p.fade_end_a - p.fade_start_a) / a.period;
        let beats_b = (p.fade_end_b - p.fade_start_b) / b.period;
        assert!((beats_a - beats_b).abs() < 1e-9);
    }

    #[test]
    fn fixed_grid_warns() {
        let (ta, tb) = (track(1, 30.0), track(2, 30.0));
        let a = BeatGrid::fixed_tempo(124.0, 0.1, 30.0);
        let b = fitted(126.0, 0.0, 30.0);
        let p = plan_default(&a, &b, &ta, &tb);
        assert!(p.warnings.contains(&PlanWarning::NoBarStructure));
        assert!(p.fade_start_a < p.fade_end_a);
        assert!(p.fade_end_a <= 30.0);
    }

    #[test]
    fn out_of_bounds_ratio_is_a_bug() {
        let (ta, tb) = (track(1, 30.0), track(2, 30.0));
        let a = fitted(120.0, 0.0, 30.0);
        let b = fitted(120.0, 0.0, 30.0);
        let bogus = Resolution {
            target_bpm: 400.0,
            key_shift_semitones_b: 0,
            target_key_b: MusicalKey::major(0),
            anchor: crate::resolver::TempoAnchor::TrackA,
        };
        let err = plan(&ta, &tb, &a, &b, &bogus, &CuePoints::default(), &PlannerOptions::default()).unwrap_err();
        assert!(matches!(err, MixError::InternalInvariantViolation(_)));
        assert!(!err.is_user_facing());
    }

    #[test]
    fn no_room_is_a_planning_error() {
        let (ta, tb) = (track(1, 30.0), track(2, 1.0));
        let a = fitted(120.0, 0.0, 30.0);
        // a single beat at 0 s: nothing before or after it
        let b = BeatGrid::fixed_tempo(120.0, 0.0, 0.0);
        let r = resolve(&a, MusicalKey::major(0), &b, MusicalKey::major(0), StretchBounds::default()).unwrap();
        let err = plan(&ta, &tb, &a, &b, &r, &CuePoints::default(), &PlannerOptions::default()).unwrap_err();

        assert_eq!(err, MixError::NoTransitionRoom { track: TrackId(2), needed_secs: 1.0 });
        assert_eq!(err.reason(), "no_transition_room");
        assert!(err.is_user_facing());
    }

    #[test]
    fn mapping_follows_beat_ratio() {
        let (ta, tb) = (track(1, 60.0), track(2, 60.0));
        let a = fitted(120.0, 0.0, 60.0);
        let b = fitted(125.0, 0.0, 60.0);
        let p = plan_default(&a, &b, &ta, &tb);
        assert!((p.map_a_to_b(p.fade_end_a) - p.fade_end_b).abs() < 1e-9);
        assert!((p.progress_at(p.fade_start_a)).abs() < 1e-12);
        assert_eq!(p.progress_at(p.fade_end_a + 1.0), 1.0);
    }
}
