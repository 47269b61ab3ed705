// src/main.rs

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use mix_engine::cache::TrackAnalysis;
use mix_engine::planner::{self, CuePoints, PlannerOptions};
use mix_engine::resolver::resolve;
use mix_engine::session::{SessionEvent, SessionRegistry};
use mix_engine::{AnalysisService, MixConfig, MixError, Track};

#[derive(Parser)]
#[command(name = "mixplan", version, about = "Beat-matched transition planner for DJ sets")]
struct Cli {
    /// TOML config file. Missing file means defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Crossfade length in bars, overrides the config
    #[arg(long, global = true)]
    bars: Option<u32>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print tempo, beats, downbeats, key and grid for each file
    Analyze {
        files: Vec<PathBuf>,
    },

    /// Plan a single transition from A into B
    Plan {
        a: PathBuf,
        b: PathBuf,

        /// Where A should hand over, in seconds of A
        #[arg(long)]
        cue_out: Option<f64>,

        /// Where B should come in, in seconds of B
        #[arg(long)]
        cue_in: Option<f64>,
    },

    /// Build a session from files in play order and plan every transition
    Session {
        files: Vec<PathBuf>,

        /// Also write the session snapshot to this file
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct AnalyzeReport<'a> {
    path: &'a Path,
    #[serde(skip_serializing_if = "Option::is_none")]
    analysis: Option<TrackAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<'a> AnalyzeReport<'a> {
    fn new(path: &'a Path, outcome: mix_engine::Result<Arc<TrackAnalysis>>) -> Self {
        match outcome {
            Ok(analysis) => Self {
                path,
                analysis: Some((*analysis).clone()),
                error: None,
            },
            Err(e) => {
                log::warn!("{}: {}", path.display(), e);
                Self {
                    path,
                    analysis: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    let mut config = match &cli.config {
        Some(path) => MixConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => MixConfig::default(),
    };
    if let Some(bars) = cli.bars {
        config.crossfade_bars = bars;
    }
    let service = AnalysisService::new(&config).context("starting analysis service")?;

    match cli.command {
        Commands::Analyze { files } => {
            let decoded = ingest_all(&service, &files);
            let ok: Vec<Track> = decoded.iter().flatten().cloned().collect();
            let mut analyzed = service.analyze_all(&ok).into_iter();
            let reports: Vec<AnalyzeReport> = files
                .iter()
                .zip(decoded)
                .map(|(path, track)| {
                    let outcome = track.and_then(|_| {
                        analyzed
                            .next()
                            .unwrap_or_else(|| Err(MixError::InternalInvariantViolation("analysis count mismatch".into())))
                    });
                    AnalyzeReport::new(path, outcome)
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }

        Commands::Plan { a, b, cue_out, cue_in } => {
            let track_a = service.ingest_file(&a).with_context(|| format!("decoding {}", a.display()))?;
            let track_b = service.ingest_file(&b).with_context(|| format!("decoding {}", b.display()))?;
            let analysis_a = service.analyze(&track_a).with_context(|| format!("analyzing {}", a.display()))?;
            let analysis_b = service.analyze(&track_b).with_context(|| format!("analyzing {}", b.display()))?;

            let options = PlannerOptions::from_config(&config);
            let resolution = resolve(
                &analysis_a.grid,
                analysis_a.features.key,
                &analysis_b.grid,
                analysis_b.features.key,
                options.bounds,
            )?;
            let cues = CuePoints {
                cue_out_a: cue_out,
                cue_in_b: cue_in,
            };
            let plan = planner::plan(
                &track_a,
                &track_b,
                &analysis_a.grid,
                &analysis_b.grid,
                &resolution,
                &cues,
                &options,
            )?;
            for w in &plan.warnings {
                log::warn!("{}", w.reason());
            }
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }

        Commands::Session { files, out } => {
            let registry = SessionRegistry::from_config(&config);
            let id = registry.create();

            let tracks: Vec<Track> = ingest_all(&service, &files)
                .into_iter()
                .zip(&files)
                .filter_map(|(t, path)| match t {
                    Ok(t) => Some(t),
                    Err(e) => {
                        log::warn!("skipping {}: {}", path.display(), e);
                        None
                    }
                })
                .collect();
            let analyses = service.analyze_all(&tracks);

            for (track, analysis) in tracks.into_iter().zip(analyses) {
                match analysis {
                    Ok(analysis) => {
                        registry.apply(id, SessionEvent::AddTrack { track, analysis })?;
                    }
                    Err(e) => log::warn!("skipping {}: {}", track.name, e),
                }
            }
            let snapshot = registry.apply(id, SessionEvent::Replan)?;
            if let Some(path) = out {
                snapshot
                    .save_to_disk(&path)
                    .with_context(|| format!("writing {}", path.display()))?;
                log::info!("snapshot written to {}", path.display());
            }
            println!("{}", snapshot.to_json_pretty()?);
        }
    }

    log::debug!("cache: {:?}", service.cache_stats());
    Ok(())
}

fn ingest_all(service: &AnalysisService, files: &[PathBuf]) -> Vec<mix_engine::Result<Track>> {
    files.iter().map(|path| service.ingest_file(path)).collect()
}
