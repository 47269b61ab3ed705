// src/planner/fade.rs

use std::f32::consts::{FRAC_PI_2, PI};

use serde::{Deserialize, Serialize};

/// Gain law for the crossfade. `t` is fade progress in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FadeCurve {
    /// Straight ramps; the two gains always sum to 1.
    #[default]
    Linear,
    /// Sine/cosine pair; the two powers always sum to 1.
    EqualPower,
    /// Raised-cosine ramps, flat at both ends.
    SCurve,
}

impl FadeCurve {
    /// Outgoing gain: 1 at `t = 0`, 0 at `t = 1`.
    pub fn gain_out(self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        match self {
            FadeCurve::Linear => 1.0 - t,
            FadeCurve::EqualPower => (t * FRAC_PI_2).cos(),
            FadeCurve::SCurve => 0.5 * (1.0 + (PI * t).cos()),
        }
    }

    /// Incoming gain: 0 at `t = 0`, 1 at `t = 1`.
    pub fn gain_in(self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        match self {
            FadeCurve::EqualPower => (t * FRAC_PI_2).sin(),
            other => 1.0 - other.gain_out(t),
        }
    }

    /// `steps + 1` evenly spaced points from `t = 0` to `t = 1`, for a
    /// renderer or UI that wants the curve as data.
    pub fn envelope(self, steps: usize) -> Vec<CurvePoint> {
        let steps = steps.max(1);
        (0..=steps)
            .map(|i| {
                let t = i as f32 / steps as f32;
                CurvePoint { t, gain_out: self.gain_out(t), gain_in: self.gain_in(t) }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub t: f32,
    pub gain_out: f32,
    pub gain_in: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn endpoints() {
        for curve in [FadeCurve::Linear, FadeCurve::EqualPower, FadeCurve::SCurve] {
            assert_abs_diff_eq!(curve.gain_out(0.0), 1.0, epsilon = 1e-6);
            assert_abs_diff_eq!(curve.gain_out(1.0), 0.0, epsilon = 1e-6);
            assert_abs_diff_eq!(curve.gain_in(0.0), 0.0, epsilon = 1e-6);
            assert_abs_diff_eq!(curve.gain_in(1.0), 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn equal_power_keeps_power() {
        for p in FadeCurve::EqualPower.envelope(16) {
            assert_abs_diff_eq!(p.gain_out * p.gain_out + p.gain_in * p.gain_in, 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn linear_midpoint_and_clamp() {
        assert_abs_diff_eq!(FadeCurve::Linear.gain_out(0.5), 0.5);
        assert_eq!(FadeCurve::Linear.gain_out(-1.0), 1.0);
        assert_eq!(FadeCurve::SCurve.envelope(0).len(), 2);
    }
}
