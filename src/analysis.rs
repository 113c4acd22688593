//! Cross-source analysis: overlap, exclusivity and rank correlation.
//!
//! Works on the same per-source lists the scorer sees and resolves identity
//! through [`crate::normalize::resolve`], so "shared" here means exactly what
//! it means in the ranked chart.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::DEFAULT_OVERLAP_DEPTH;
use crate::models::{
    CanonicalKey, ExclusiveTrack, OverlapReport, PairCorrelation, PerSourceTracks, RawTrack,
};

/// Shared keys listed per correlation entry
const SAMPLE_TRACKS: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AnalyzerOptions {
    /// Per-source depth considered; `None` uses every track
    pub depth: Option<usize>,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self {
            depth: Some(DEFAULT_OVERLAP_DEPTH),
        }
    }
}

/// One source reduced to its best rank and first entry per key.
struct SourceView<'a> {
    best_rank: BTreeMap<CanonicalKey, u32>,
    first_seen: BTreeMap<CanonicalKey, &'a RawTrack>,
}

impl<'a> SourceView<'a> {
    fn build(tracks: &'a [RawTrack], depth: Option<usize>) -> Self {
        let mut ordered: Vec<&RawTrack> = tracks.iter().collect();
        ordered.sort_by_key(|t| t.rank);
        let depth = depth.unwrap_or(ordered.len());

        let mut view = SourceView {
            best_rank: BTreeMap::new(),
            first_seen: BTreeMap::new(),
        };
        for track in ordered.into_iter().take(depth) {
            let key = track.key();
            view.best_rank
                .entry(key.clone())
                .and_modify(|r| *r = (*r).min(track.rank))
                .or_insert(track.rank);
            view.first_seen.entry(key).or_insert(track);
        }
        view
    }

    fn keys(&self) -> BTreeSet<&CanonicalKey> {
        self.best_rank.keys().collect()
    }

    fn len(&self) -> usize {
        self.best_rank.len()
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        round_to(100.0 * part as f64 / whole as f64, 2)
    }
}

/// Pearson coefficient, `None` for fewer than two points or zero variance.
pub fn pearson(pairs: &[(f64, f64)]) -> Option<f64> {
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / n;

    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for &(x, y) in pairs {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }
    Some(cov / (var_x * var_y).sqrt())
}

fn correlate(a: &SourceView<'_>, b: &SourceView<'_>) -> PairCorrelation {
    let mut shared: Vec<(&CanonicalKey, u32, u32)> = a
        .best_rank
        .iter()
        .filter_map(|(key, &ra)| b.best_rank.get(key).map(|&rb| (key, ra, rb)))
        .collect();
    shared.sort_by(|x, y| x.1.cmp(&y.1).then_with(|| x.0.cmp(y.0)));

    let points: Vec<(f64, f64)> = shared.iter().map(|&(_, ra, rb)| (ra as f64, rb as f64)).collect();
    let coefficient = pearson(&points);

    PairCorrelation {
        correlation_coefficient: coefficient.map(|c| round_to(c, 3)).unwrap_or(0.0),
        common_track_count: shared.len(),
        sufficient_data: coefficient.is_some(),
        sample_tracks: shared
            .iter()
            .take(SAMPLE_TRACKS)
            .map(|(key, _, _)| (*key).clone())
            .collect(),
    }
}

/// Build the overlap report for every source present in `per_source`.
pub fn analyze(per_source: &PerSourceTracks, options: AnalyzerOptions) -> OverlapReport {
    let views: BTreeMap<&String, SourceView<'_>> = per_source
        .iter()
        .map(|(source, tracks)| (source, SourceView::build(tracks, options.depth)))
        .collect();

    // Number of sources listing each key
    let mut presence: BTreeMap<&CanonicalKey, usize> = BTreeMap::new();
    for view in views.values() {
        for key in view.best_rank.keys() {
            *presence.entry(key).or_insert(0) += 1;
        }
    }

    let mut report = OverlapReport {
        total_unique_tracks: presence.len(),
        shared_track_count: presence.values().filter(|&&n| n >= 2).count(),
        ..OverlapReport::default()
    };
    report.overlap_percentage = percentage(report.shared_track_count, report.total_unique_tracks);

    for (&source, view) in &views {
        report.per_source_track_count.insert(source.clone(), view.len());

        let keys_a = view.keys();
        let row: BTreeMap<String, f64> = views
            .iter()
            .map(|(&other, other_view)| {
                let value = if other == source {
                    100.0
                } else {
                    let keys_b = other_view.keys();
                    let union = keys_a.union(&keys_b).count();
                    percentage(keys_a.intersection(&keys_b).count(), union)
                };
                (other.clone(), value)
            })
            .collect();
        report.overlap_matrix.insert(source.clone(), row);

        let mut exclusives: Vec<ExclusiveTrack> = view
            .best_rank
            .iter()
            .filter(|(key, _)| presence.get(key).copied() == Some(1))
            .filter_map(|(key, &rank)| {
                view.first_seen.get(key).map(|track| ExclusiveTrack {
                    key: key.clone(),
                    title: track.title.clone(),
                    artist: track.artist.clone(),
                    rank,
                })
            })
            .collect();
        exclusives.sort_by(|x, y| x.rank.cmp(&y.rank).then_with(|| x.key.cmp(&y.key)));

        report
            .exclusivity_rate
            .insert(source.clone(), percentage(exclusives.len(), view.len()));
        report.exclusive_tracks.insert(source.clone(), exclusives);
    }

    let sources: Vec<&&String> = views.keys().collect();
    for (i, a) in sources.iter().enumerate() {
        for b in &sources[i + 1..] {
            let correlation = correlate(&views[**a], &views[**b]);
            report
                .pairwise_correlation
                .insert(format!("{}_vs_{}", a, b), correlation);
        }
    }

    tracing::debug!(
        "Overlap: {} unique keys, {} shared across sources",
        report.total_unique_tracks,
        report.shared_track_count
    );
    report
}
