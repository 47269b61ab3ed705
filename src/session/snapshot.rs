// src/session/snapshot.rs

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::{Cursor, PairStatus, SessionState, SessionTrack};
use crate::analyzer::MusicalKey;
use crate::grid::GridSource;
use crate::planner::TransitionPlan;
use crate::track::TrackId;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrackSummary {
    pub id: TrackId,
    pub name: String,
    pub duration_secs: f64,
    pub tempo_bpm: f64,
    pub key: MusicalKey,
    pub confidence: f64,
    pub low_confidence: bool,
    pub grid_source: GridSource,
    /// Why the fitted grid was replaced by a fixed-tempo one.
    pub grid_error: Option<String>,
    pub cue_in: Option<f64>,
    pub cue_out: Option<f64>,
}

impl From<&SessionTrack> for TrackSummary {
    fn from(entry: &SessionTrack) -> Self {
        let features = &entry.analysis.features;
        Self {
            id: entry.track.id,
            name: entry.track.name.clone(),
            duration_secs: entry.track.duration_secs(),
            tempo_bpm: features.tempo_bpm,
            key: features.key,
            confidence: features.confidence,
            low_confidence: features.low_confidence,
            grid_source: entry.analysis.grid.source,
            grid_error: entry.analysis.grid_error.as_ref().map(|e| e.reason().to_string()),
            cue_in: entry.cue_in,
            cue_out: entry.cue_out,
        }
    }
}

/// Status of one adjacent pair. `status` is `"ok"`, `"pending"`,
/// `"warning: <reasons>"` or `"failed: <reason>"`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PairReport {
    pub track_a: TrackId,
    pub track_b: TrackId,
    pub status: String,
    pub plan: Option<TransitionPlan>,
}

impl PairReport {
    pub fn new(track_a: TrackId, track_b: TrackId, status: &PairStatus) -> Self {
        let (status, plan) = match status {
            PairStatus::Pending => ("pending".to_string(), None),
            PairStatus::Failed(e) => (format!("failed: {}", e.reason()), None),
            PairStatus::Planned(plan) if plan.warnings.is_empty() => ("ok".to_string(), Some((**plan).clone())),
            PairStatus::Planned(plan) => {
                let reasons: Vec<&str> = plan.warnings.iter().map(|w| w.reason()).collect();
                (format!("warning: {}", reasons.join(", ")), Some((**plan).clone()))
            }
        };
        Self {
            track_a,
            track_b,
            status,
            plan,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Everything a UI needs to draw a session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub tracks: Vec<TrackSummary>,
    pub pairs: Vec<PairReport>,
    pub cursor: Option<Cursor>,
}

impl SessionSnapshot {
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save_to_disk(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn load_from_disk(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let snapshot = serde_json::from_reader(reader)?;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{CueFrames, FadeCurve, PlanWarning};
    use std::sync::Arc;

    fn plan(warnings: Vec<PlanWarning>) -> TransitionPlan {
        TransitionPlan {
            track_a_id: TrackId(1),
            track_b_id: TrackId(2),
            stretch_ratio_a: 1.0,
            stretch_ratio_b: 0.98,
            fade_start_a: 52.0,
            fade_end_a: 60.0,
            fade_start_b: 0.0,
            fade_end_b: 8.0,
            key_shift_semitones_b: -2,
            alignment_beat_a: 112,
            alignment_beat_b: 8,
            target_bpm: 120.0,
            fade_curve: FadeCurve::Linear,
            cues: CueFrames {
                fade_start_a: 2_293_200,
                fade_end_a: 2_646_000,
                fade_start_b: 0,
                fade_end_b: 352_800,
            },
            warnings,
        }
    }

    #[test]
    fn status_strings() {
        let ok = PairReport::new(TrackId(1), TrackId(2), &PairStatus::Planned(Arc::new(plan(vec![]))));
        assert!(ok.is_ok());
        let warned = PairReport::new(
            TrackId(1),
            TrackId(2),
            &PairStatus::Planned(Arc::new(plan(vec![
                PlanWarning::NoBarStructure,
                PlanWarning::TruncatedWindow { requested_beats: 16.0, actual_beats: 10.0 },
            ]))),
        );
        assert_eq!(warned.status, "warning: no_bar_structure, truncated_window");
        assert!(warned.plan.is_some());
        let failed = PairReport::new(
            TrackId(1),
            TrackId(2),
            &PairStatus::Failed(crate::error::MixError::InsufficientBeats { found: 3, required: 8 }),
        );
        assert_eq!(failed.status, "failed: insufficient_beats");
        assert!(failed.plan.is_none());
        assert_eq!(PairReport::new(TrackId(1), TrackId(2), &PairStatus::Pending).status, "pending");
    }

    #[test]
    fn snapshot_json_shape() {
        let snap = SessionSnapshot {
            state: SessionState::Planned,
            tracks: vec![],
            pairs: vec![PairReport::new(TrackId(1), TrackId(2), &PairStatus::Planned(Arc::new(plan(vec![]))))],
            cursor: None,
        };
        let json: serde_json::Value = serde_json::from_str(&snap.to_json_pretty().unwrap()).unwrap();
        assert_eq!(json["state"], "planned");
        assert_eq!(json["pairs"][0]["status"], "ok");
        assert_eq!(json["pairs"][0]["plan"]["key_shift_semitones_b"], -2);
        assert_eq!(json["pairs"][0]["plan"]["fade_curve"], "linear");
    }

    #[test]
    fn disk_round_trip() {
        let snap = SessionSnapshot {
            state: SessionState::Playing,
            tracks: vec![],
            pairs: vec![],
            cursor: Some(Cursor { track: TrackId(4), offset: 12.5 }),
        };
        let path = std::env::temp_dir().join(format!("mix_engine_snapshot_{}.json", std::process::id()));
        snap.save_to_disk(&path).unwrap();
        let loaded = SessionSnapshot::load_from_disk(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(loaded, snap);
    }
}
