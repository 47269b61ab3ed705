// src/lib.rs

pub mod analyzer;
pub mod cache;
pub mod config;
pub mod decoder;
pub mod error;
pub mod grid;
pub mod planner;
pub mod resolver;
pub mod service;
pub mod session;
pub mod track;

pub use analyzer::{AudioFeatures, FeatureExtractor, KeyMode, MusicalKey};
pub use cache::{FeatureCache, TrackAnalysis};
pub use config::MixConfig;
pub use error::{MixError, Result};
pub use grid::BeatGrid;
pub use planner::{CuePoints, TransitionPlan};
pub use resolver::{Resolution, StretchBounds};
pub use service::AnalysisService;
pub use session::{MixSession, SessionEvent, SessionRegistry, SessionSnapshot, SessionState};
pub use track::{Track, TrackId};
