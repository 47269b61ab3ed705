// src/service.rs
//! Decode, analyze and cache tracks. The entry point for everything that
//! needs features or grids.

use std::path::Path;
use std::sync::Arc;

use rayon::ThreadPool;

use crate::analyzer::FeatureExtractor;
use crate::cache::{CacheStats, FeatureCache, TrackAnalysis};
use crate::config::MixConfig;
use crate::decoder::{AudioDecoder, SymphoniaDecoder};
use crate::error::{MixError, Result};
use crate::grid::{GridOptions, grid_or_fixed};
use crate::track::{Track, TrackId};

pub struct AnalysisService {
    decoder: Arc<dyn AudioDecoder>,
    extractor: FeatureExtractor,
    grid_options: GridOptions,
    cache: FeatureCache,
    pool: ThreadPool,
}

impl AnalysisService {
    /// Service with the symphonia decoder.
    pub fn new(config: &MixConfig) -> Result<Self> {
        Self::with_decoder(config, Arc::new(SymphoniaDecoder))
    }

    pub fn with_decoder(config: &MixConfig, decoder: Arc<dyn AudioDecoder>) -> Result<Self> {
        config.validate()?;
        let workers = config.resolve_workers();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("mix-analysis-{i}"))
            .build()
            .map_err(|e| MixError::InvalidConfig(format!("worker pool: {e}")))?;
        log::info!("analysis service: {} workers, cache capacity {}", workers, config.cache_capacity);
        Ok(Self {
            decoder,
            extractor: FeatureExtractor::from_config(config),
            grid_options: GridOptions::from_config(config),
            cache: FeatureCache::new(config.cache_capacity),
            pool,
        })
    }

    /// Decodes `bytes` into a new track with a fresh id.
    pub fn ingest(&self, bytes: &[u8], hint: Option<&str>, name: impl Into<String>) -> Result<Track> {
        let audio = self.decoder.decode(bytes, hint)?;
        let track = Track::new(TrackId::next(), name, audio.samples, audio.channels, audio.sample_rate);
        log::debug!(
            "ingested {} '{}': {:.2}s, {} ch @ {} Hz",
            track.id,
            track.name,
            track.duration_secs(),
            track.channels(),
            track.sample_rate()
        );
        Ok(track)
    }

    pub fn ingest_file(&self, path: &Path) -> Result<Track> {
        let bytes = std::fs::read(path).map_err(|e| MixError::Decode(format!("{}: {}", path.display(), e)))?;
        let hint = path.extension().and_then(|e| e.to_str());
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("untitled")
            .to_string();
        self.ingest(&bytes, hint, name)
    }

    /// Features and grid for `track`, extracted at most once per content.
    /// A grid that cannot be fitted falls back to fixed tempo; the reason
    /// stays in `grid_error`.
    pub fn analyze(&self, track: &Track) -> Result<Arc<TrackAnalysis>> {
        self.cache.get_or_compute(track.content_hash(), || {
            let features = self.extractor.extract(track)?;
            let (grid, grid_error) = grid_or_fixed(&features, &self.grid_options);
            if let Some(e) = &grid_error {
                log::warn!("{}: {}, using fixed {:.2} BPM grid", track.name, e, grid.tempo_bpm());
            }
            Ok(TrackAnalysis {
                features,
                grid,
                grid_error,
            })
        })
    }

    /// Analyzes tracks on the worker pool. Results keep the input order.
    pub fn analyze_all(&self, tracks: &[Track]) -> Vec<Result<Arc<TrackAnalysis>>> {
        log::info!("analyzing {} tracks", tracks.len());
        self.pool.install(|| {
            use rayon::prelude::*;
            tracks.par_iter().map(|track| self.analyze(track)).collect()
        })
    }

    pub fn cache(&self) -> &FeatureCache {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
