use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chart_aggregator::config::{DEFAULT_MAX_CONCURRENCY, DEFAULT_SOURCE_TIMEOUT};
use chart_aggregator::models::{FetchStatus, RunResult};
use chart_aggregator::progress::{format_duration, set_log_only};
use chart_aggregator::safety::validate_output_path;
use chart_aggregator::{
    CancelToken, ChartPipeline, FetchOptions, ProviderRegistry, RunRequest, SnapshotProvider,
};

#[derive(Parser)]
#[command(name = "chart-aggregator")]
#[command(about = "Merge chart snapshots from several sources into one ranked chart")]
struct Args {
    /// Run request (JSON)
    request: PathBuf,

    /// Directory of `<source>_<chartType>.json` snapshots
    snapshot_dir: PathBuf,

    /// Write the full run result as JSON
    #[arg(long)]
    output: Option<PathBuf>,

    /// Write run statistics as JSON
    #[arg(long)]
    stats: Option<PathBuf>,

    /// Sources fetched concurrently
    #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENCY)]
    workers: usize,

    /// Per-source fetch timeout
    #[arg(long, default_value_t = DEFAULT_SOURCE_TIMEOUT.as_secs())]
    timeout_secs: u64,

    /// Deadline for the whole fetch stage
    #[arg(long)]
    run_timeout_secs: Option<u64>,

    /// Disable progress bars (log lines only)
    #[arg(long)]
    log_only: bool,

    /// Chart rows printed in the summary
    #[arg(long, default_value = "20")]
    show: usize,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chart_aggregator=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_summary(result: &RunResult, show: usize) {
    println!("\n{:=<60}", "");
    println!("Sources ({:.1}% succeeded)", result.success_rate);
    for status in &result.per_source_status {
        let detail = match status.status {
            FetchStatus::Success => format!("{} tracks", status.track_count),
            _ => status.error.clone().unwrap_or_default(),
        };
        println!(
            "  {:<12} {:<10} {:<9} {:>6}ms  {}",
            status.source, status.chart_type, status.status.to_string(), status.elapsed_ms, detail
        );
    }

    println!("\nChart (top {} of {})", show.min(result.ranked_chart.len()), result.ranked_chart.len());
    for track in result.ranked_chart.iter().take(show) {
        println!(
            "  {:>3}. {} - {}  [{:.2}, {} sources, {}]",
            track.position,
            track.artist,
            track.title,
            track.total_score,
            track.source_count(),
            track.trend_strength
        );
    }

    let report = &result.overlap_report;
    println!(
        "\nOverlap: {} unique tracks, {} shared ({:.2}%)",
        report.total_unique_tracks, report.shared_track_count, report.overlap_percentage
    );
    for (pair, correlation) in &report.pairwise_correlation {
        if correlation.sufficient_data {
            println!(
                "  {:<28} r = {:>6.3} over {} tracks",
                pair, correlation.correlation_coefficient, correlation.common_track_count
            );
        }
    }
    if !result.identity_warnings.is_empty() {
        println!("\nPossible identity splits: {}", result.identity_warnings.len());
        for miss in result.identity_warnings.iter().take(5) {
            println!("  {} ~ {} ({:.3})", miss.key_a, miss.key_b, miss.similarity);
        }
    }
    println!("{:=<60}", "");
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    set_log_only(args.log_only);

    let start = Instant::now();

    if let Some(output) = &args.output {
        validate_output_path(output, &[args.request.as_path()], Some(args.snapshot_dir.as_path()))?;
    }
    if let Some(stats) = &args.stats {
        validate_output_path(stats, &[args.request.as_path()], Some(args.snapshot_dir.as_path()))?;
    }

    let request = RunRequest::from_file(&args.request)?;

    let snapshots = Arc::new(SnapshotProvider::new(&args.snapshot_dir));
    let mut registry = ProviderRegistry::new();
    for source in &request.sources {
        registry.register(source.source.clone(), snapshots.clone());
    }

    let options = FetchOptions {
        max_concurrency: args.workers,
        per_source_timeout: Duration::from_secs(args.timeout_secs),
        run_timeout: args.run_timeout_secs.map(Duration::from_secs),
    };

    let pipeline = ChartPipeline::new(registry, options).with_progress(true);
    let (result, stats) = pipeline
        .run_with_stats(&request, &CancelToken::new())
        .context("Invalid run configuration")?;

    print_summary(&result, args.show);

    if let Some(output) = &args.output {
        let json = serde_json::to_string_pretty(&result)?;
        std::fs::write(output, json)
            .with_context(|| format!("Failed to write result {}", output.display()))?;
        println!("Result written to {}", output.display());
    }
    if let Some(path) = &args.stats {
        stats.write_to_file(path)?;
        println!("Stats written to {}", path.display());
    }

    println!("Elapsed: {}", format_duration(start.elapsed()));
    Ok(())
}
