// src/error.rs

use thiserror::Error;

use uuid::Uuid;

use crate::track::TrackId;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MixError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Track too short: {duration_secs:.2}s (need at least {min_secs:.1}s)")]
    TooShort { duration_secs: f64, min_secs: f64 },

    /// Planning found no beats of room around an alignment point in this track.
    #[error("No room for a transition window in track {track}: needs {needed_secs:.2}s around the alignment beat")]
    NoTransitionRoom { track: TrackId, needed_secs: f64 },

    #[error("Insufficient beats for a grid: found {found}, need {required}")]
    InsufficientBeats { found: usize, required: usize },

    #[error("Incompatible tempo: {bpm_a:.2} BPM and {bpm_b:.2} BPM cannot meet within stretch bounds [{min_ratio}, {max_ratio}]")]
    IncompatibleTempo {
        bpm_a: f64,
        bpm_b: f64,
        min_ratio: f64,
        max_ratio: f64,
    },

    /// Planner produced a state the resolver should have ruled out. Always a bug.
    #[error("Internal invariant violation: {0}")]
    InternalInvariantViolation(String),

    #[error("Unknown track: {0}")]
    UnknownTrack(TrackId),

    #[error("Track already in session: {0}")]
    DuplicateTrack(TrackId),

    #[error("Unknown session: {0}")]
    UnknownSession(Uuid),

    #[error("Event {event} not allowed in state {state}")]
    InvalidTransition { event: &'static str, state: &'static str },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Decode error: {0}")]
    Decode(String),
}

impl MixError {
    /// Short machine-friendly reason, used in per-pair status reports.
    pub fn reason(&self) -> &'static str {
        match self {
            MixError::UnsupportedFormat(_) => "unsupported_format",
            MixError::TooShort { .. } => "too_short",
            MixError::NoTransitionRoom { .. } => "no_transition_room",
            MixError::InsufficientBeats { .. } => "insufficient_beats",
            MixError::IncompatibleTempo { .. } => "incompatible_tempo",
            MixError::InternalInvariantViolation(_) => "internal_invariant_violation",
            MixError::UnknownTrack(_) => "unknown_track",
            MixError::DuplicateTrack(_) => "duplicate_track",
            MixError::UnknownSession(_) => "unknown_session",
            MixError::InvalidTransition { .. } => "invalid_transition",
            MixError::InvalidConfig(_) => "invalid_config",
            MixError::Decode(_) => "decode",
        }
    }

    /// False only for errors that indicate a bug in this crate.
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, MixError::InternalInvariantViolation(_))
    }
}

pub type Result<T> = std::result::Result<T, MixError>;
