//! Cross-source overlap report straight from a snapshot directory
//!
//! Usage: analyze-overlap <snapshot_dir> [--depth N | --all] [--output report.json]

use anyhow::{Context, Result};
use clap::Parser;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chart_aggregator::analysis::{analyze, AnalyzerOptions};
use chart_aggregator::config::{DEFAULT_OVERLAP_DEPTH, DEFAULT_SOURCE_LIMIT};
use chart_aggregator::models::{OverlapReport, PerSourceTracks, SourceProfile};
use chart_aggregator::profile::profile_sources;
use chart_aggregator::progress::{create_spinner, format_duration, set_log_only};
use chart_aggregator::provider::{FetchContext, FetchRequest, SourceProvider};
use chart_aggregator::safety::validate_output_path;
use chart_aggregator::{CancelToken, SnapshotProvider};

#[derive(Parser)]
#[command(name = "analyze-overlap")]
#[command(about = "Overlap, exclusivity and correlation across chart snapshots")]
struct Args {
    snapshot_dir: PathBuf,

    /// Per-source depth used for overlap
    #[arg(long, default_value_t = DEFAULT_OVERLAP_DEPTH)]
    depth: usize,

    /// Use every track of every source (ignores --depth)
    #[arg(long)]
    all: bool,

    /// Tracks read from each snapshot
    #[arg(long, default_value_t = DEFAULT_SOURCE_LIMIT as usize)]
    limit: usize,

    /// Write the report here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    #[arg(long)]
    log_only: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OverlapOutput {
    overlap_report: OverlapReport,
    source_profiles: BTreeMap<String, SourceProfile>,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chart_aggregator=info,analyze_overlap=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    set_log_only(args.log_only);
    let start = Instant::now();

    if let Some(output) = &args.output {
        validate_output_path(output, &[], Some(args.snapshot_dir.as_path()))?;
    }

    let provider = SnapshotProvider::new(&args.snapshot_dir);
    let configs = provider.discover()?;
    tracing::info!("Found {} charts in {}", configs.len(), args.snapshot_dir.display());

    let spinner = create_spinner("Loading snapshots");
    let loaded: Vec<(String, Vec<_>)> = configs
        .par_iter()
        .filter_map(|config| {
            let request = FetchRequest {
                limit: args.limit,
                ..FetchRequest::from_config(config)
            };
            let ctx = FetchContext::new(CancelToken::new(), Instant::now() + Duration::from_secs(60));
            match provider.fetch(&request, &ctx) {
                Ok(tracks) => Some((config.source.clone(), tracks)),
                Err(e) => {
                    tracing::warn!("{}: {}", config.source, e);
                    None
                }
            }
        })
        .collect();
    spinner.finish_and_clear();

    // Charts of one source count as one list, like in a run
    let mut per_source = PerSourceTracks::new();
    for (source, tracks) in loaded {
        per_source.entry(source).or_default().extend(tracks);
    }
    let options = AnalyzerOptions {
        depth: (!args.all).then_some(args.depth),
    };

    let output = OverlapOutput {
        overlap_report: analyze(&per_source, options),
        source_profiles: profile_sources(&per_source),
    };
    let json = serde_json::to_string_pretty(&output)?;

    match &args.output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write report {}", path.display()))?;
            eprintln!("Report written to {}", path.display());
        }
        None => println!("{}", json),
    }

    eprintln!(
        "Analyzed {} sources in {}",
        per_source.len(),
        format_duration(start.elapsed())
    );
    Ok(())
}
