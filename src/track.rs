// src/track.rs

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

/// Identifier for a track.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(pub u32);

impl TrackId {
    /// Process-unique id for freshly ingested tracks.
    pub fn next() -> Self {
        static NEXT: AtomicU32 = AtomicU32::new(1);
        TrackId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "track-{}", self.0)
    }
}

/// Hash of a track's decoded samples and format. Two tracks with the same
/// audio share one analysis regardless of their `TrackId`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub u64);

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Immutable decoded audio. Samples are interleaved and shared, so clones are cheap.
#[derive(Clone, Debug)]
pub struct Track {
    pub id: TrackId,
    pub name: String,
    samples: Arc<[f32]>,
    channels: usize,
    sample_rate: u32,
    hash: ContentHash,
}

impl Track {
    pub fn new(id: TrackId, name: impl Into<String>, samples: Vec<f32>, channels: usize, sample_rate: u32) -> Self {
        let hash = content_hash(&samples, channels, sample_rate);
        Self {
            id,
            name: name.into(),
            samples: samples.into(),
            channels,
            sample_rate,
            hash,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn content_hash(&self) -> ContentHash {
        self.hash
    }

    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels
        }
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frames() as f64 / self.sample_rate as f64
        }
    }

    /// Seconds -> frame offset, clamped to the track.
    pub fn frame_at(&self, secs: f64) -> usize {
        let frame = (secs.max(0.0) * self.sample_rate as f64).round() as usize;
        frame.min(self.frames())
    }
}

fn content_hash(samples: &[f32], channels: usize, sample_rate: u32) -> ContentHash {
    let mut hasher = DefaultHasher::new();
    channels.hash(&mut hasher);
    sample_rate.hash(&mut hasher);
    samples.len().hash(&mut hasher);
    for s in samples {
        s.to_bits().hash(&mut hasher);
    }
    ContentHash(hasher.finish())
}
