//! One aggregation run end to end: validate, fetch, score, rank, analyze.

use std::time::Instant;

use crate::analysis::{analyze, AnalyzerOptions};
use crate::config::{FetchOptions, RunRequest};
use crate::error::ConfigResult;
use crate::models::{RunResult, RunStats};
use crate::normalize::{near_misses, NEAR_MISS_THRESHOLD};
use crate::orchestrator::{success_rate, CancelToken, FetchOrchestrator, FetchOutcome};
use crate::profile::profile_sources;
use crate::provider::ProviderRegistry;
use crate::ranking::{rank, source_statistics};
use crate::scoring::aggregate;

pub struct ChartPipeline {
    orchestrator: FetchOrchestrator,
}

impl ChartPipeline {
    pub fn new(registry: ProviderRegistry, options: FetchOptions) -> Self {
        Self {
            orchestrator: FetchOrchestrator::new(registry, options),
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.orchestrator = self.orchestrator.with_progress(show);
        self
    }

    /// Run once. Configuration problems are returned before anything is
    /// fetched; source failures only show up in `per_source_status`.
    pub fn run(&self, request: &RunRequest, cancel: &CancelToken) -> ConfigResult<RunResult> {
        self.run_with_stats(request, cancel).map(|(result, _)| result)
    }

    pub fn run_with_stats(
        &self,
        request: &RunRequest,
        cancel: &CancelToken,
    ) -> ConfigResult<(RunResult, RunStats)> {
        request.validate()?;
        self.orchestrator.options().validate()?;

        let started = Instant::now();
        tracing::info!(
            "Starting run: {} sources, chart limit {}",
            request.sources.len(),
            request.limit
        );

        let outcome = self.orchestrator.fetch_all(&request.sources, cancel);
        let (result, mut stats) = assemble(request, outcome);

        stats.elapsed_seconds = started.elapsed().as_secs_f64();
        stats.log_phase("run");
        Ok((result, stats))
    }
}

/// Everything after the fetch stage. Synchronous and deterministic for a
/// given request and outcome.
pub fn assemble(request: &RunRequest, outcome: FetchOutcome) -> (RunResult, RunStats) {
    let mut stats = RunStats::default();
    for status in &outcome.results {
        stats.record_status(status);
    }
    if stats.successful_sources == 0 {
        tracing::warn!("No source returned data; the chart will be empty");
    }

    let weights = request.weights();
    let index = aggregate(&outcome.tracks, &weights);
    stats.unique_tracks = index.len();

    let chart = rank(index, request.chart_limit());
    stats.ranked_tracks = chart.len();

    let requested: Vec<String> = request.sources.iter().map(|s| s.source.clone()).collect();
    let source_statistics = source_statistics(&chart, &requested, &weights);

    let overlap_report = analyze(
        &outcome.tracks,
        AnalyzerOptions {
            depth: Some(request.overlap_depth()),
        },
    );
    let source_profiles = profile_sources(&outcome.tracks);

    let chart_keys: Vec<_> = chart.iter().map(|t| t.key.clone()).collect();
    let identity_warnings = near_misses(&chart_keys, NEAR_MISS_THRESHOLD);
    stats.identity_warnings = identity_warnings.len();
    for miss in &identity_warnings {
        tracing::debug!("Possible identity split: {} ~ {} ({:.3})", miss.key_a, miss.key_b, miss.similarity);
    }

    let result = RunResult {
        success_rate: success_rate(&outcome.results),
        per_source_status: outcome.results,
        ranked_chart: chart,
        overlap_report,
        source_statistics,
        source_profiles,
        identity_warnings,
    };
    (result, stats)
}
