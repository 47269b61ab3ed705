// src/resolver.rs

use serde::{Deserialize, Serialize};

use crate::analyzer::MusicalKey;
use crate::error::{MixError, Result};
use crate::grid::BeatGrid;

/// Ratios this close outside the bounds are float noise, not violations.
const RATIO_EPS: f64 = 1e-9;

/// Allowed playback-speed factors, inclusive.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StretchBounds {
    pub min: f64,
    pub max: f64,
}

impl Default for StretchBounds {
    fn default() -> Self {
        Self { min: 0.5, max: 2.0 }
    }
}

impl From<(f64, f64)> for StretchBounds {
    fn from((min, max): (f64, f64)) -> Self {
        Self { min, max }
    }
}

impl StretchBounds {
    pub fn contains(&self, ratio: f64) -> bool {
        ratio.is_finite() && ratio >= self.min - RATIO_EPS && ratio <= self.max + RATIO_EPS
    }
}

/// Which tempo the transition runs at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TempoAnchor {
    /// The outgoing track keeps its tempo.
    TrackA,
    /// Both tracks stretch to meet in between.
    Compromise,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub target_bpm: f64,
    /// Pitch shift applied to B, in [-6, 6].
    pub key_shift_semitones_b: i32,
    /// B's key after the shift.
    pub target_key_b: MusicalKey,
    pub anchor: TempoAnchor,
}

impl Resolution {
    /// Playback-speed factor that brings a track at `bpm` to the target.
    pub fn stretch_ratio_for(&self, bpm: f64) -> f64 {
        self.target_bpm / bpm
    }
}

/// Decides the shared tempo and B's pitch shift for a transition from A to B.
pub fn resolve(
    grid_a: &BeatGrid,
    key_a: MusicalKey,
    grid_b: &BeatGrid,
    key_b: MusicalKey,
    bounds: StretchBounds,
) -> Result<Resolution> {
    let (target_bpm, anchor) = resolve_tempo(grid_a.tempo_bpm(), grid_b.tempo_bpm(), bounds)?;
    let (key_shift_semitones_b, target_key_b) = resolve_key_shift(key_a, key_b);
    Ok(Resolution {
        target_bpm,
        key_shift_semitones_b,
        target_key_b,
        anchor,
    })
}

/// A's tempo when B can reach it; otherwise the tempo that minimises the
/// larger of the two log-stretches, which is the geometric mean clamped into
/// the range both tracks can reach.
pub fn resolve_tempo(bpm_a: f64, bpm_b: f64, bounds: StretchBounds) -> Result<(f64, TempoAnchor)> {
    let incompatible = || MixError::IncompatibleTempo {
        bpm_a,
        bpm_b,
        min_ratio: bounds.min,
        max_ratio: bounds.max,
    };
    if !(bpm_a.is_finite() && bpm_b.is_finite() && bpm_a > 0.0 && bpm_b > 0.0) {
        return Err(incompatible());
    }

    if bounds.contains(bpm_a / bpm_b) {
        return Ok((bpm_a, TempoAnchor::TrackA));
    }

    let lo = (bounds.min * bpm_a).max(bounds.min * bpm_b);
    let hi = (bounds.max * bpm_a).min(bounds.max * bpm_b);
    if lo > hi {
        log::debug!("no shared tempo for {:.2} and {:.2} BPM", bpm_a, bpm_b);
        return Err(incompatible());
    }
    let target = (bpm_a * bpm_b).sqrt().clamp(lo, hi);
    log::debug!("compromise tempo {:.2} BPM between {:.2} and {:.2}", target, bpm_a, bpm_b);
    Ok((target, TempoAnchor::Compromise))
}

/// Smallest signed shift moving B onto a key compatible with A in B's own
/// mode. Ties go to no shift, then to the upward shift.
pub fn resolve_key_shift(key_a: MusicalKey, key_b: MusicalKey) -> (i32, MusicalKey) {
    let mut best: Option<(i32, MusicalKey)> = None;
    for candidate in key_a.compatible_keys() {
        if candidate.mode != key_b.mode { continue; }
        let shift = key_b.shift_to(candidate);
        let better = match best {
            None => true,
            Some((current, _)) => {
                shift.abs() < current.abs() || (shift.abs() == current.abs() && shift > current)
            }
        };
        if better {
            best = Some((shift, candidate));
        }
    }
    // the relative key always has the other mode, so some candidate matches
    best.unwrap_or((0, key_b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn grid(bpm: f64) -> BeatGrid {
        BeatGrid::fixed_tempo(bpm, 0.0, 60.0)
    }

    #[test]
    fn a_anchors_when_b_can_follow() {
        let r = resolve(&grid(128.0), MusicalKey::major(0), &grid(130.0), MusicalKey::major(0), StretchBounds::default()).unwrap();
        assert_relative_eq!(r.target_bpm, 128.0, epsilon = 1e-9);
        assert_eq!(r.anchor, TempoAnchor::TrackA);
        assert_relative_eq!(r.stretch_ratio_for(130.0), 128.0 / 130.0, epsilon = 1e-12);
        assert_eq!(r.key_shift_semitones_b, 0);
    }

    #[test]
    fn compromise_when_b_is_out_of_reach() {
        let bounds = StretchBounds { min: 0.8, max: 1.25 };
        let (target, anchor) = resolve_tempo(80.0, 125.0, bounds).unwrap();
        assert_eq!(anchor, TempoAnchor::Compromise);
        assert_relative_eq!(target, 100.0, epsilon = 1e-9);
        assert!(bounds.contains(target / 80.0) && bounds.contains(target / 125.0));
    }

    #[test]
    fn compromise_clamps_into_feasible_range() {
        let bounds = StretchBounds { min: 0.9, max: 1.5 };
        // geometric mean 80 lies below 0.9 * 100 = 90
        let (target, _) = resolve_tempo(100.0, 64.0, bounds).unwrap();
        assert_relative_eq!(target, 90.0, epsilon = 1e-9);
        assert!(bounds.contains(target / 64.0));
    }

    #[test]
    fn too_far_apart() {
        let err = resolve_tempo(60.0, 250.0, StretchBounds::default()).unwrap_err();
        assert!(matches!(err, MixError::IncompatibleTempo { .. }));
    }

    #[test]
    fn f_sharp_major_moves_up_to_g() {
        let (shift, target) = resolve_key_shift(MusicalKey::major(0), MusicalKey::major(6));
        assert_eq!(shift, 1);
        assert_eq!(target, MusicalKey::major(7));
    }

    #[test]
    fn tritone_goes_up() {
        // only compatible minor key for C major is A minor, a tritone from D#
        let (shift, target) = resolve_key_shift(MusicalKey::major(0), MusicalKey::minor(3));
        assert_eq!(shift, 6);
        assert_eq!(target, MusicalKey::minor(9));
    }

    #[test]
    fn relative_key_needs_no_shift() {
        assert_eq!(resolve_key_shift(MusicalKey::major(0), MusicalKey::minor(9)).0, 0);
        assert_eq!(resolve_key_shift(MusicalKey::minor(9), MusicalKey::major(0)).0, 0);
        // fifth up
        assert_eq!(resolve_key_shift(MusicalKey::major(0), MusicalKey::major(7)).0, 0);
    }

    #[test]
    fn shifts_never_exceed_six() {
        for a in 0..12u8 {
            for b in 0..12u8 {
                for (ma, mb) in [(true, true), (true, false), (false, true), (false, false)] {
                    let ka = if ma { MusicalKey::major(a) } else { MusicalKey::minor(a) };
                    let kb = if mb { MusicalKey::major(b) } else { MusicalKey::minor(b) };
                    let (shift, target) = resolve_key_shift(ka, kb);
                    assert!(shift.abs() <= 6);
                    assert_eq!(kb.transposed(shift), target);
                    assert!(ka.compatible_keys().contains(&target));
                }
            }
        }
    }
}
