// src/config.rs

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MixError, Result};
use crate::planner::FadeCurve;

/// Engine configuration loaded from an optional TOML file.
/// Every field has a default, so an empty file is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixConfig {
    /// Tempo confidence below this flags the features as low-confidence.
    pub low_confidence_threshold: f64,
    /// Allowed (min, max) stretch ratio for either track.
    pub stretch_ratio_bounds: (f64, f64),
    /// Crossfade length in bars of the outgoing track.
    pub crossfade_bars: u32,
    /// Fewer detected beats than this and grid fitting is refused.
    pub min_beats_for_grid: usize,

    /// Rate the extractor resamples to before analysis.
    pub analysis_sample_rate: u32,
    pub min_bpm: f64,
    pub max_bpm: f64,
    /// Length of the sections used for per-section tempo confidence.
    pub section_secs: f64,
    /// Tracks shorter than this are rejected as `TooShort`.
    pub min_duration_secs: f64,
    /// Max analyzed tracks kept in the feature cache.
    pub cache_capacity: usize,
    /// Number of parallel extraction workers. 0 = auto-detect.
    pub workers: usize,
    pub fade_curve: FadeCurve,
    /// Undo depth for session edits.
    pub history_depth: usize,
}

impl Default for MixConfig {
    fn default() -> Self {
        Self {
            low_confidence_threshold: 0.5,
            stretch_ratio_bounds: (0.5, 2.0),
            crossfade_bars: 4,
            min_beats_for_grid: 8,
            analysis_sample_rate: 22_050,
            min_bpm: 60.0,
            max_bpm: 200.0,
            section_secs: 30.0,
            min_duration_secs: 5.0,
            cache_capacity: 256,
            workers: 0,
            fade_curve: FadeCurve::Linear,
            history_depth: 100,
        }
    }
}

impl MixConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: MixConfig =
            toml::from_str(contents).map_err(|e| MixError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from `path`. Falls back to defaults when the file doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| MixError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&contents)?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let (min_ratio, max_ratio) = self.stretch_ratio_bounds;
        if !(min_ratio > 0.0 && min_ratio <= 1.0 && max_ratio >= 1.0 && max_ratio.is_finite()) {
            return Err(MixError::InvalidConfig(format!(
                "stretch_ratio_bounds must satisfy 0 < min <= 1 <= max, got ({}, {})",
                min_ratio, max_ratio
            )));
        }
        if !(0.0..=1.0).contains(&self.low_confidence_threshold) {
            return Err(MixError::InvalidConfig(format!(
                "low_confidence_threshold must be within [0, 1], got {}",
                self.low_confidence_threshold
            )));
        }
        if self.crossfade_bars == 0 {
            return Err(MixError::InvalidConfig("crossfade_bars must be at least 1".into()));
        }
        if self.min_beats_for_grid < 2 {
            return Err(MixError::InvalidConfig("min_beats_for_grid must be at least 2".into()));
        }
        if !(self.min_bpm > 0.0 && self.max_bpm > self.min_bpm) {
            return Err(MixError::InvalidConfig(format!(
                "bpm range must satisfy 0 < min < max, got ({}, {})",
                self.min_bpm, self.max_bpm
            )));
        }
        if self.analysis_sample_rate < 8_000 {
            return Err(MixError::InvalidConfig(format!(
                "analysis_sample_rate too low: {}",
                self.analysis_sample_rate
            )));
        }
        if self.section_secs <= 0.0 {
            return Err(MixError::InvalidConfig("section_secs must be positive".into()));
        }
        Ok(())
    }

    /// Resolve worker count: 0 -> auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }
}
