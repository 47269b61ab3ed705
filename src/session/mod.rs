// src/session/mod.rs

pub mod events;
pub mod history;
pub mod registry;
pub mod snapshot;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::TrackAnalysis;
use crate::config::MixConfig;
use crate::error::{MixError, Result};
use crate::planner::{self, CuePoints, PlannerOptions, TransitionPlan};
use crate::resolver::resolve;
use crate::track::{Track, TrackId};

pub use events::SessionEvent;
pub use history::History;
pub use registry::{SessionId, SessionRegistry};
pub use snapshot::{PairReport, SessionSnapshot, TrackSummary};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Empty,
    /// Tracks present, at least one adjacent pair not planned yet.
    Loaded,
    /// Every adjacent pair planned or failed.
    Planned,
    Playing,
    /// Cursor inside the crossfade window of its outgoing pair.
    Transitioning,
    Closed,
}

impl SessionState {
    pub fn name(self) -> &'static str {
        match self {
            SessionState::Empty => "empty",
            SessionState::Loaded => "loaded",
            SessionState::Planned => "planned",
            SessionState::Playing => "playing",
            SessionState::Transitioning => "transitioning",
            SessionState::Closed => "closed",
        }
    }
}

/// Playback position, in seconds of the track's own timeline.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    pub track: TrackId,
    pub offset: f64,
}

#[derive(Clone, Debug)]
pub struct SessionTrack {
    pub track: Track,
    pub analysis: Arc<TrackAnalysis>,
    pub cue_in: Option<f64>,
    pub cue_out: Option<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PairStatus {
    Pending,
    Planned(Arc<TransitionPlan>),
    Failed(MixError),
}

/// An ordered set of tracks, one plan slot per adjacent pair, and a cursor.
/// Values are immutable: every event produces a new session.
#[derive(Clone, Debug)]
pub struct MixSession {
    tracks: Vec<SessionTrack>,
    pairs: BTreeMap<(TrackId, TrackId), PairStatus>,
    cursor: Option<Cursor>,
    playing: bool,
    closed: bool,
    options: Arc<PlannerOptions>,
}

impl Default for MixSession {
    fn default() -> Self {
        Self::new(PlannerOptions::default())
    }
}

impl MixSession {
    pub fn new(options: PlannerOptions) -> Self {
        Self {
            tracks: Vec::new(),
            pairs: BTreeMap::new(),
            cursor: None,
            playing: false,
            closed: false,
            options: Arc::new(options),
        }
    }

    pub fn from_config(config: &MixConfig) -> Self {
        Self::new(PlannerOptions::from_config(config))
    }

    pub fn state(&self) -> SessionState {
        if self.closed {
            return SessionState::Closed;
        }
        if self.playing {
            return if self.active_plan().is_some() {
                SessionState::Transitioning
            } else {
                SessionState::Playing
            };
        }
        if self.tracks.is_empty() {
            SessionState::Empty
        } else if self.pairs.values().any(|p| matches!(p, PairStatus::Pending)) {
            SessionState::Loaded
        } else {
            SessionState::Planned
        }
    }

    pub fn cursor(&self) -> Option<Cursor> {
        self.cursor
    }

    pub fn tracks(&self) -> &[SessionTrack] {
        &self.tracks
    }

    pub fn track_ids(&self) -> Vec<TrackId> {
        self.tracks.iter().map(|t| t.track.id).collect()
    }

    pub fn pair_status(&self, a: TrackId, b: TrackId) -> Option<&PairStatus> {
        self.pairs.get(&(a, b))
    }

    pub fn plan_for(&self, a: TrackId, b: TrackId) -> Option<&TransitionPlan> {
        match self.pairs.get(&(a, b)) {
            Some(PairStatus::Planned(plan)) => Some(plan),
            _ => None,
        }
    }

    /// Plan whose outgoing window holds the cursor right now.
    pub fn active_plan(&self) -> Option<&TransitionPlan> {
        let cursor = self.cursor?;
        let idx = self.index_of(cursor.track)?;
        let next = self.tracks.get(idx + 1)?;
        let plan = self.plan_for(cursor.track, next.track.id)?;
        (cursor.offset >= plan.fade_start_a && cursor.offset < plan.fade_end_a).then_some(plan)
    }

    /// Applies `event` and returns the resulting session. `self` is untouched.
    pub fn apply(&self, event: SessionEvent) -> Result<MixSession> {
        let invalid = |event: &SessionEvent, state: SessionState| MixError::InvalidTransition {
            event: event.name(),
            state: state.name(),
        };
        let state = self.state();
        if state == SessionState::Closed {
            return Err(invalid(&event, state));
        }

        let mut next = self.clone();
        match event {
            SessionEvent::AddTrack { track, analysis } => {
                let end = next.tracks.len();
                next.insert_at(end, track, analysis)?;
            }
            SessionEvent::InsertTrack { index, track, analysis } => {
                let index = index.min(next.tracks.len());
                next.insert_at(index, track, analysis)?;
            }
            SessionEvent::RemoveTrack { id } => next.remove(id)?,
            SessionEvent::MoveTrack { id, to_index } => {
                let from = next.index_of(id).ok_or(MixError::UnknownTrack(id))?;
                let entry = next.tracks.remove(from);
                let to = to_index.min(next.tracks.len());
                next.tracks.insert(to, entry);
                next.reconcile_pairs();
            }
            SessionEvent::SetCuePoints { id, cue_in, cue_out } => {
                let idx = next.index_of(id).ok_or(MixError::UnknownTrack(id))?;
                let entry = &mut next.tracks[idx];
                let duration = entry.track.duration_secs();
                entry.cue_in = cue_in.filter(|t| t.is_finite()).map(|t| t.clamp(0.0, duration));
                entry.cue_out = cue_out.filter(|t| t.is_finite()).map(|t| t.clamp(0.0, duration));
                if idx > 0 {
                    let prev = next.tracks[idx - 1].track.id;
                    next.pairs.insert((prev, id), PairStatus::Pending);
                }
                if let Some(after) = next.tracks.get(idx + 1) {
                    let after = after.track.id;
                    next.pairs.insert((id, after), PairStatus::Pending);
                }
            }
            SessionEvent::Replan => next.replan(),
            SessionEvent::Play => {
                if next.tracks.is_empty() || next.playing {
                    return Err(invalid(&SessionEvent::Play, state));
                }
                let resume = next.cursor.filter(|c| next.index_of(c.track).is_some());
                let first = next.tracks[0].track.id;
                next.cursor = Some(resume.unwrap_or(Cursor { track: first, offset: 0.0 }));
                next.playing = true;
            }
            SessionEvent::Pause => {
                if !next.playing {
                    return Err(invalid(&SessionEvent::Pause, state));
                }
                next.playing = false;
            }
            SessionEvent::Seek { id, offset } => {
                let idx = next.index_of(id).ok_or(MixError::UnknownTrack(id))?;
                let duration = next.tracks[idx].track.duration_secs();
                let offset = if offset.is_finite() { offset.clamp(0.0, duration) } else { 0.0 };
                next.cursor = Some(Cursor { track: id, offset });
            }
            SessionEvent::AdvanceCursor { secs } => {
                if !next.playing {
                    return Err(invalid(&SessionEvent::AdvanceCursor { secs }, state));
                }
                next.advance(secs);
            }
            SessionEvent::Close => {
                next.closed = true;
                next.playing = false;
                next.cursor = None;
            }
        }

        let after = next.state();
        if after != state {
            log::debug!("session {} -> {}", state.name(), after.name());
        }
        Ok(next)
    }

    /// Per-pair plan status, in play order.
    pub fn pair_reports(&self) -> Vec<PairReport> {
        self.tracks
            .windows(2)
            .map(|w| {
                let (a, b) = (w[0].track.id, w[1].track.id);
                PairReport::new(a, b, self.pairs.get(&(a, b)).unwrap_or(&PairStatus::Pending))
            })
            .collect()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state(),
            tracks: self.tracks.iter().map(TrackSummary::from).collect(),
            pairs: self.pair_reports(),
            cursor: self.cursor,
        }
    }

    /// Tracks, cues and plans from `edits`, playback from `self`. Used by
    /// undo/redo so stepping through edits does not rewind the cursor.
    pub fn restore_edits(&self, edits: &MixSession) -> MixSession {
        let mut next = edits.clone();
        next.closed = self.closed;
        match self.cursor.filter(|c| next.index_of(c.track).is_some()) {
            Some(cursor) => {
                next.cursor = Some(cursor);
                next.playing = self.playing;
            }
            None => {
                next.cursor = None;
                next.playing = false;
            }
        }
        next
    }

    fn index_of(&self, id: TrackId) -> Option<usize> {
        self.tracks.iter().position(|t| t.track.id == id)
    }

    fn insert_at(&mut self, index: usize, track: Track, analysis: Arc<TrackAnalysis>) -> Result<()> {
        if self.index_of(track.id).is_some() {
            return Err(MixError::DuplicateTrack(track.id));
        }
        log::debug!("adding {} ({}) at {}", track.id, track.name, index);
        self.tracks.insert(
            index,
            SessionTrack {
                track,
                analysis,
                cue_in: None,
                cue_out: None,
            },
        );
        self.reconcile_pairs();
        Ok(())
    }

    fn remove(&mut self, id: TrackId) -> Result<()> {
        let idx = self.index_of(id).ok_or(MixError::UnknownTrack(id))?;
        let following = self.tracks.get(idx + 1).map(|t| t.track.id);
        self.tracks.remove(idx);
        if self.cursor.is_some_and(|c| c.track == id) {
            match following {
                Some(next) => self.cursor = Some(Cursor { track: next, offset: 0.0 }),
                None => {
                    self.cursor = None;
                    self.playing = false;
                }
            }
        }
        self.reconcile_pairs();
        Ok(())
    }

    /// Rebuilds the pair map for the current order. Pairs that are still
    /// adjacent keep their status; new pairs start pending.
    fn reconcile_pairs(&mut self) {
        let mut pairs = BTreeMap::new();
        for w in self.tracks.windows(2) {
            let key = (w[0].track.id, w[1].track.id);
            let status = self.pairs.remove(&key).unwrap_or(PairStatus::Pending);
            pairs.insert(key, status);
        }
        self.pairs = pairs;
    }

    fn replan(&mut self) {
        for i in 0..self.tracks.len().saturating_sub(1) {
            let (a, b) = (&self.tracks[i], &self.tracks[i + 1]);
            let key = (a.track.id, b.track.id);
            if !matches!(self.pairs.get(&key), Some(PairStatus::Pending) | None) {
                continue;
            }
            let status = match plan_pair(a, b, &self.options) {
                Ok(plan) => PairStatus::Planned(Arc::new(plan)),
                Err(e) => {
                    if e.is_user_facing() {
                        log::warn!("{} -> {}: {}", key.0, key.1, e);
                    }
                    PairStatus::Failed(e)
                }
            };
            self.pairs.insert(key, status);
        }
    }

    /// Moves the cursor `secs` forward through the set, following each
    /// planned crossfade onto the next track or hard-cutting at the end of
    /// a track without one.
    fn advance(&mut self, secs: f64) {
        let Some(mut cursor) = self.cursor else { return; };
        let mut remaining = if secs.is_finite() { secs.max(0.0) } else { 0.0 };

        loop {
            let Some(idx) = self.index_of(cursor.track) else {
                self.cursor = None;
                self.playing = false;
                return;
            };
            let target = cursor.offset + remaining;
            let duration = self.tracks[idx].track.duration_secs();
            let next_id = self.tracks.get(idx + 1).map(|t| t.track.id);

            // (fade_end_a, fade_end_b, where B is at `target`)
            let handover = next_id
                .and_then(|n| self.plan_for(cursor.track, n))
                .map(|p| (p.fade_end_a, p.fade_end_b, p.map_a_to_b(target)));

            match (next_id, handover) {
                (Some(next), Some((fade_end_a, fade_end_b, landed))) if target >= fade_end_a => {
                    log::debug!("crossfade {} -> {} complete, B at {:.3}s", cursor.track, next, landed);
                    remaining = (landed - fade_end_b).max(0.0);
                    cursor = Cursor { track: next, offset: fade_end_b };
                }
                (Some(next), None) if target >= duration => {
                    log::debug!("hard cut {} -> {}", cursor.track, next);
                    remaining = target - duration;
                    cursor = Cursor { track: next, offset: 0.0 };
                }
                (None, _) if target >= duration => {
                    log::debug!("end of set");
                    self.cursor = None;
                    self.playing = false;
                    return;
                }
                _ => {
                    cursor.offset = target;
                    break;
                }
            }
        }
        self.cursor = Some(cursor);
    }
}

fn plan_pair(a: &SessionTrack, b: &SessionTrack, options: &PlannerOptions) -> Result<TransitionPlan> {
    let (grid_a, grid_b) = (&a.analysis.grid, &b.analysis.grid);
    let resolution = resolve(grid_a, a.analysis.features.key, grid_b, b.analysis.features.key, options.bounds)?;
    let cues = CuePoints {
        cue_out_a: a.cue_out,
        cue_in_b: b.cue_in,
    };
    planner::plan(&a.track, &b.track, grid_a, grid_b, &resolution, &cues, options)
}
