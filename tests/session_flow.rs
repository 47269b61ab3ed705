// tests/session_flow.rs

use std::sync::Arc;

use mix_engine::analyzer::{AudioFeatures, MusicalKey};
use mix_engine::cache::TrackAnalysis;
use mix_engine::grid::{GridOptions, grid_or_fixed};
use mix_engine::session::{MixSession, PairStatus, SessionEvent, SessionRegistry, SessionState};
use mix_engine::{MixConfig, MixError, Track, TrackId};

fn analysed(id: u32, bpm: f64, beats: usize, secs: f64, key: MusicalKey) -> SessionEvent {
    let period = 60.0 / bpm;
    let times: Vec<f64> = (0..beats).map(|i| 0.5 + period * i as f64).filter(|&t| t < secs).collect();
    let downbeats = (0..times.len()).step_by(4).collect();
    let features = AudioFeatures::from_beats(times, downbeats, key, secs);
    let (grid, grid_error) = grid_or_fixed(&features, &GridOptions::default());
    SessionEvent::AddTrack {
        track: Track::new(TrackId(id), format!("track {id}"), vec![0.0; (secs * 800.0) as usize], 2, 400),
        analysis: Arc::new(TrackAnalysis {
            features,
            grid,
            grid_error,
        }),
    }
}

#[test]
fn sparse_track_gets_a_fixed_tempo_plan() {
    let s = MixSession::from_config(&MixConfig::default())
        .apply(analysed(1, 124.0, 6, 40.0, MusicalKey::minor(9)))
        .unwrap()
        .apply(analysed(2, 126.0, 80, 40.0, MusicalKey::minor(9)))
        .unwrap()
        .apply(SessionEvent::Replan)
        .unwrap();

    let snap = s.snapshot();
    assert_eq!(snap.tracks[0].grid_error.as_deref(), Some("insufficient_beats"));
    let report = &snap.pairs[0];
    assert!(report.status.starts_with("warning: "), "{}", report.status);
    assert!(report.status.contains("no_bar_structure"));
    assert!(report.plan.is_some());
}

#[test]
fn one_bad_pair_leaves_the_rest_planned() {
    let s = MixSession::default()
        .apply(analysed(1, 50.0, 200, 60.0, MusicalKey::major(0)))
        .unwrap()
        .apply(analysed(2, 210.0, 400, 60.0, MusicalKey::major(0)))
        .unwrap()
        .apply(analysed(3, 205.0, 400, 60.0, MusicalKey::major(7)))
        .unwrap()
        .apply(SessionEvent::Replan)
        .unwrap();

    assert!(matches!(
        s.pair_status(TrackId(1), TrackId(2)),
        Some(PairStatus::Failed(MixError::IncompatibleTempo { .. }))
    ));
    let plan = s.plan_for(TrackId(2), TrackId(3)).unwrap();
    assert_eq!(plan.key_shift_semitones_b, 0);
    assert_eq!(s.state(), SessionState::Planned);

    // dropping the middle track replaces both pairs with one fresh pair
    let s = s.apply(SessionEvent::RemoveTrack { id: TrackId(2) }).unwrap();
    assert_eq!(s.state(), SessionState::Loaded);
    assert_eq!(s.pair_reports().len(), 1);
    assert_eq!(s.pair_reports()[0].status, "pending");
}

#[test]
fn playback_crosses_into_the_next_track() {
    let s = MixSession::default()
        .apply(analysed(1, 128.0, 400, 90.0, MusicalKey::minor(4)))
        .unwrap()
        .apply(analysed(2, 130.0, 400, 90.0, MusicalKey::minor(4)))
        .unwrap()
        .apply(SessionEvent::Replan)
        .unwrap()
        .apply(SessionEvent::Play)
        .unwrap();
    let plan = s.plan_for(TrackId(1), TrackId(2)).unwrap().clone();

    let s = s
        .apply(SessionEvent::Seek { id: TrackId(1), offset: plan.fade_start_a - 1.0 })
        .unwrap();
    assert_eq!(s.state(), SessionState::Playing);

    let s = s.apply(SessionEvent::AdvanceCursor { secs: 2.0 }).unwrap();
    assert_eq!(s.state(), SessionState::Transitioning);
    assert!(s.active_plan().is_some_and(|p| p.progress_at(s.cursor().unwrap().offset) > 0.0));

    let s = s.apply(SessionEvent::AdvanceCursor { secs: plan.fade_end_a - plan.fade_start_a }).unwrap();
    let cursor = s.cursor().unwrap();
    assert_eq!(cursor.track, TrackId(2));
    assert_eq!(s.state(), SessionState::Playing);
    assert!((cursor.offset - plan.map_a_to_b(plan.fade_end_a + 1.0)).abs() < 1e-6);

    let s = s.apply(SessionEvent::Pause).unwrap();
    assert_eq!(s.state(), SessionState::Planned);
    assert_eq!(s.cursor().map(|c| c.track), Some(TrackId(2)));
}

#[test]
fn registry_round_trip() {
    let registry = SessionRegistry::from_config(&MixConfig::default());
    let id = registry.create();
    registry.apply(id, analysed(1, 120.0, 120, 60.0, MusicalKey::major(2))).unwrap();
    registry.apply(id, analysed(2, 121.0, 120, 60.0, MusicalKey::major(9))).unwrap();
    let snap = registry.apply(id, SessionEvent::Replan).unwrap();
    assert_eq!(snap.state, SessionState::Planned);
    assert!(snap.pairs[0].is_ok(), "{}", snap.pairs[0].status);

    let json: serde_json::Value = serde_json::from_str(&snap.to_json_pretty().unwrap()).unwrap();
    assert_eq!(json["tracks"][1]["key"]["mode"], "major");
    assert_eq!(json["pairs"][0]["track_a"], 1);

    // undo the second add, then replay it
    let undone = registry.undo(id).unwrap().unwrap();
    assert_eq!(undone.tracks.len(), 1);
    assert!(undone.pairs.is_empty());
    let redone = registry.redo(id).unwrap().unwrap();
    assert_eq!(redone.pairs[0].status, "ok");

    registry.apply(id, SessionEvent::Close).unwrap();
    assert!(matches!(registry.snapshot(id), Err(MixError::UnknownSession(_))));
}
