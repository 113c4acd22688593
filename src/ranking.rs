//! Final chart ordering plus per-track trend and consistency labels.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::config::SourceWeights;
use crate::models::{AggregateIndex, AggregatedTrack, SourceStatistics, TrendStrength};

/// Rank variance at which consistency bottoms out at 0
const CONSISTENCY_VARIANCE_SCALE: f64 = 10_000.0;

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Chart order: score desc, then best per-source rank, then key.
/// Total on any input, so the chart is reproducible.
pub fn chart_order(a: &AggregatedTrack, b: &AggregatedTrack) -> Ordering {
    b.total_score
        .total_cmp(&a.total_score)
        .then_with(|| a.best_rank().cmp(&b.best_rank()))
        .then_with(|| a.key.cmp(&b.key))
}

/// Order, truncate to `limit` and finalize position, trend and consistency.
pub fn rank(index: AggregateIndex, limit: usize) -> Vec<AggregatedTrack> {
    let mut tracks: Vec<AggregatedTrack> = index.into_values().collect();
    tracks.sort_by(chart_order);
    tracks.truncate(limit);

    for (i, track) in tracks.iter_mut().enumerate() {
        track.position = i + 1;
        track.trend_strength = trend_strength(track.source_count(), track.mean_rank());
        track.consistency = consistency(track.per_source_rank.values().copied());
    }
    tracks
}

/// Label how broadly and how high a track charts.
pub fn trend_strength(source_count: usize, mean_rank: Option<f64>) -> TrendStrength {
    let mean = mean_rank.unwrap_or(f64::INFINITY);
    if source_count >= 3 && mean <= 20.0 {
        TrendStrength::VeryStrong
    } else if source_count >= 2 && mean <= 30.0 {
        TrendStrength::Strong
    } else if source_count >= 2 || mean <= 50.0 {
        TrendStrength::Moderate
    } else {
        TrendStrength::Weak
    }
}

/// Agreement of per-source ranks: 1.0 for a single source, otherwise
/// `max(0, 1 - sample_variance / 10000)` rounded to 3 decimals.
pub fn consistency(ranks: impl IntoIterator<Item = u32>) -> f64 {
    let ranks: Vec<f64> = ranks.into_iter().map(|r| r as f64).collect();
    if ranks.len() < 2 {
        return 1.0;
    }
    let n = ranks.len() as f64;
    let mean = ranks.iter().sum::<f64>() / n;
    let variance = ranks.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    round_to((1.0 - variance / CONSISTENCY_VARIANCE_SCALE).max(0.0), 3)
}

/// How much each requested source contributed to the final chart.
pub fn source_statistics(
    chart: &[AggregatedTrack],
    sources: &[String],
    weights: &SourceWeights,
) -> BTreeMap<String, SourceStatistics> {
    sources
        .iter()
        .map(|source| {
            let ranks: Vec<u32> = chart
                .iter()
                .filter_map(|t| t.per_source_rank.get(source).copied())
                .collect();
            let avg = if ranks.is_empty() {
                0.0
            } else {
                ranks.iter().map(|&r| r as f64).sum::<f64>() / ranks.len() as f64
            };
            let stats = SourceStatistics {
                contributing_tracks: ranks.len(),
                weight: weights.weight_for(source),
                avg_rank_contribution: round_to(avg, 2),
            };
            (source.clone(), stats)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawTrack;
    use crate::normalize::resolve;

    fn track(title: &str, score: f64, ranks: &[(&str, u32)]) -> AggregatedTrack {
        let raw = RawTrack::new(title, "Artist", 1, "x", "top");
        let mut t = AggregatedTrack::seed(resolve(title, "Artist"), &raw);
        t.total_score = score;
        for &(source, rank) in ranks {
            t.contributing_sources.insert(source.to_string());
            t.per_source_rank.insert(source.to_string(), rank);
        }
        t
    }

    fn index(tracks: Vec<AggregatedTrack>) -> AggregateIndex {
        tracks.into_iter().map(|t| (t.key.clone(), t)).collect()
    }

    #[test]
    fn test_rank_orders_by_score_and_assigns_positions() {
        let chart = rank(
            index(vec![
                track("Low", 10.0, &[("a", 50)]),
                track("High", 90.0, &[("a", 1)]),
                track("Mid", 40.0, &[("a", 9)]),
            ]),
            10,
        );
        let titles: Vec<&str> = chart.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["High", "Mid", "Low"]);
        assert_eq!(chart[0].position, 1);
        assert_eq!(chart[2].position, 3);
    }

    #[test]
    fn test_rank_tie_breaks_on_best_rank_then_key() {
        let chart = rank(
            index(vec![
                track("Bravo", 50.0, &[("a", 4)]),
                track("Alpha", 50.0, &[("a", 4)]),
                track("Charlie", 50.0, &[("a", 2)]),
            ]),
            10,
        );
        let titles: Vec<&str> = chart.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["Charlie", "Alpha", "Bravo"]);
    }

    #[test]
    fn test_rank_truncates_to_limit() {
        let tracks = (1..=5).map(|i| track(&format!("S{i}"), i as f64, &[("a", i)])).collect();
        let chart = rank(index(tracks), 2);
        assert_eq!(chart.len(), 2);
        assert_eq!(chart[0].title, "S5");
        assert!(rank(AggregateIndex::default(), 5).is_empty());
    }

    #[test]
    fn test_trend_strength_rules() {
        assert_eq!(trend_strength(3, Some(20.0)), TrendStrength::VeryStrong);
        assert_eq!(trend_strength(3, Some(25.0)), TrendStrength::Strong);
        assert_eq!(trend_strength(2, Some(30.0)), TrendStrength::Strong);
        assert_eq!(trend_strength(2, Some(80.0)), TrendStrength::Moderate);
        assert_eq!(trend_strength(1, Some(50.0)), TrendStrength::Moderate);
        assert_eq!(trend_strength(1, Some(51.0)), TrendStrength::Weak);
        assert_eq!(trend_strength(0, None), TrendStrength::Weak);
    }

    #[test]
    fn test_consistency() {
        assert_eq!(consistency([7]), 1.0);
        assert_eq!(consistency([1, 101]), 0.5);
        assert_eq!(consistency([1, 300]), 0.0);
        assert_eq!(consistency([5, 5, 5]), 1.0);
    }

    #[test]
    fn test_ranked_track_labels() {
        let chart = rank(index(vec![track("Hit", 90.0, &[("a", 1), ("b", 3), ("c", 5)])]), 10);
        assert_eq!(chart[0].trend_strength, TrendStrength::VeryStrong);
        assert_eq!(chart[0].consistency, 1.0);
    }

    #[test]
    fn test_source_statistics() {
        let chart = vec![
            track("One", 90.0, &[("a", 1), ("b", 4)]),
            track("Two", 80.0, &[("a", 2)]),
        ];
        let sources = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let stats = source_statistics(&chart, &sources, &SourceWeights::default());
        assert_eq!(stats["a"].contributing_tracks, 2);
        assert_eq!(stats["a"].avg_rank_contribution, 1.5);
        assert_eq!(stats["b"].contributing_tracks, 1);
        assert_eq!(stats["c"].contributing_tracks, 0);
        assert_eq!(stats["c"].avg_rank_contribution, 0.0);
        assert_eq!(stats["c"].weight, 0.1);
    }
}
