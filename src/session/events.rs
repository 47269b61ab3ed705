// src/session/events.rs

use std::sync::Arc;

use crate::cache::TrackAnalysis;
use crate::track::{Track, TrackId};

/// Everything that can happen to a session. Applied with
/// [`MixSession::apply`](super::MixSession::apply).
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Append a track. Its analysis comes from the feature cache.
    AddTrack { track: Track, analysis: Arc<TrackAnalysis> },
    /// Insert before position `index` (clamped to the end).
    InsertTrack { index: usize, track: Track, analysis: Arc<TrackAnalysis> },
    RemoveTrack { id: TrackId },
    /// Move a track so it ends up at position `to_index` (clamped).
    MoveTrack { id: TrackId, to_index: usize },
    /// Manual cue points in track-local seconds. `cue_in` is where the track
    /// should enter, `cue_out` where it should hand over.
    SetCuePoints { id: TrackId, cue_in: Option<f64>, cue_out: Option<f64> },
    /// Plan every pending pair.
    Replan,
    /// Start or resume playback. Allowed before `Replan` too: any pair still
    /// pending or failed when the cursor reaches the end of its outgoing track
    /// is a hard cut to the start of the next one.
    Play,
    Pause,
    Seek { id: TrackId, offset: f64 },
    /// Move the cursor forward by `secs` of the current track's own time.
    AdvanceCursor { secs: f64 },
    Close,
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::AddTrack { .. } => "add_track",
            SessionEvent::InsertTrack { .. } => "insert_track",
            SessionEvent::RemoveTrack { .. } => "remove_track",
            SessionEvent::MoveTrack { .. } => "move_track",
            SessionEvent::SetCuePoints { .. } => "set_cue_points",
            SessionEvent::Replan => "replan",
            SessionEvent::Play => "play",
            SessionEvent::Pause => "pause",
            SessionEvent::Seek { .. } => "seek",
            SessionEvent::AdvanceCursor { .. } => "advance_cursor",
            SessionEvent::Close => "close",
        }
    }

    /// Edits change the tracklist or cues and are what undo/redo step through.
    pub fn is_edit(&self) -> bool {
        matches!(
            self,
            SessionEvent::AddTrack { .. }
                | SessionEvent::InsertTrack { .. }
                | SessionEvent::RemoveTrack { .. }
                | SessionEvent::MoveTrack { .. }
                | SessionEvent::SetCuePoints { .. }
        )
    }
}
