//! Weighted score aggregation across sources.
//!
//! Each raw track contributes a weighted score to its canonical key:
//!
//! ```text
//! rank_score       = max(1, 101 - rank)
//! popularity_score = popularity, or 50 when the source gives none
//! engagement_score = min(50, views-or-plays / 1_000_000)
//! raw_score        = rank_score*0.5 + popularity_score*0.3 + engagement_score*0.2
//! contribution     = raw_score * weight(source)
//! ```

use crate::config::SourceWeights;
use crate::models::{AggregateIndex, AggregatedTrack, PerSourceTracks, RawTrack, TrackSignal};

// ============================================================================
// Score Components
// ============================================================================

/// Popularity assumed when a source reports none
pub const NEUTRAL_POPULARITY: f64 = 50.0;

/// Engagement is counted in millions and capped here
pub const ENGAGEMENT_CAP: f64 = 50.0;

pub const RANK_FACTOR: f64 = 0.5;
pub const POPULARITY_FACTOR: f64 = 0.3;
pub const ENGAGEMENT_FACTOR: f64 = 0.2;

/// Position score: 100 for rank 1, never below 1.
pub fn rank_score(rank: u32) -> f64 {
    (101.0 - rank as f64).max(1.0)
}

pub fn popularity_score(signal: &TrackSignal) -> f64 {
    signal.popularity.unwrap_or(NEUTRAL_POPULARITY)
}

pub fn engagement_score(signal: &TrackSignal) -> f64 {
    (signal.engagement_count() as f64 / 1_000_000.0).min(ENGAGEMENT_CAP)
}

/// Unweighted score of one chart entry.
pub fn raw_score(track: &RawTrack) -> f64 {
    rank_score(track.rank) * RANK_FACTOR
        + popularity_score(&track.signal) * POPULARITY_FACTOR
        + engagement_score(&track.signal) * ENGAGEMENT_FACTOR
}

/// Weighted contribution of one chart entry to its canonical key.
pub fn contribution(track: &RawTrack, weight: f64) -> f64 {
    raw_score(track) * weight
}

// ============================================================================
// Aggregation
// ============================================================================

/// Merge all source lists into one entry per canonical key.
///
/// Sources are visited in id order and tracks in list order, so display
/// title/artist are first-seen and totals do not depend on how the caller
/// assembled the map. A source listing the same key twice adds both
/// contributions and keeps its best rank.
pub fn aggregate(per_source: &PerSourceTracks, weights: &SourceWeights) -> AggregateIndex {
    let mut index = AggregateIndex::default();

    for (source, tracks) in per_source {
        let weight = weights.weight_for(source);
        for track in tracks {
            let key = track.key();
            let entry = index
                .entry(key.clone())
                .or_insert_with(|| AggregatedTrack::seed(key, track));

            entry.total_score += contribution(track, weight);
            entry.contributing_sources.insert(source.clone());
            entry
                .per_source_rank
                .entry(source.clone())
                .and_modify(|best| *best = (*best).min(track.rank))
                .or_insert(track.rank);
        }
    }

    tracing::debug!(
        "Aggregated {} tracks from {} sources into {} keys",
        per_source.values().map(Vec::len).sum::<usize>(),
        per_source.len(),
        index.len()
    );
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::resolve;
    use std::collections::BTreeMap;

    fn weights(pairs: &[(&str, f64)]) -> SourceWeights {
        SourceWeights::new(pairs.iter().map(|&(s, w)| (s.to_string(), w)).collect())
    }

    #[test]
    fn test_rank_score_bounds() {
        assert_eq!(rank_score(1), 100.0);
        assert_eq!(rank_score(3), 98.0);
        assert_eq!(rank_score(100), 1.0);
        assert_eq!(rank_score(250), 1.0);
        for r in 1..150 {
            assert!(rank_score(r) >= rank_score(r + 1));
        }
    }

    #[test]
    fn test_engagement_capped_at_fifty() {
        let signal = TrackSignal {
            view_count: Some(2_500_000),
            ..TrackSignal::default()
        };
        assert_eq!(engagement_score(&signal), 2.5);
        let signal = TrackSignal {
            play_count: Some(900_000_000),
            ..TrackSignal::default()
        };
        assert_eq!(engagement_score(&signal), ENGAGEMENT_CAP);
    }

    #[test]
    fn test_raw_score_defaults() {
        // 100*0.5 + 50*0.3 + 0*0.2
        assert_eq!(raw_score(&RawTrack::new("S", "A", 1, "x", "top")), 65.0);
        let track = RawTrack::new("S", "A", 1, "x", "top").with_popularity(80.0);
        assert_eq!(raw_score(&track), 74.0);
    }

    #[test]
    fn test_two_sources_merge_into_one_key() {
        let mut per_source = BTreeMap::new();
        per_source.insert("A".to_string(), vec![RawTrack::new("Song X", "Artist Y", 1, "A", "top")]);
        per_source.insert("B".to_string(), vec![RawTrack::new("Song X", "Artist Y", 3, "B", "top")]);

        let index = aggregate(&per_source, &weights(&[("A", 1.0), ("B", 0.5)]));

        assert_eq!(index.len(), 1);
        let track = &index[&resolve("Song X", "Artist Y")];
        // 65 * 1.0 + 64 * 0.5
        assert_eq!(track.total_score, 97.0);
        assert_eq!(track.source_count(), 2);
        assert_eq!(track.per_source_rank["A"], 1);
        assert_eq!(track.per_source_rank["B"], 3);
    }

    #[test]
    fn test_unknown_source_uses_fallback_weight() {
        let mut per_source = BTreeMap::new();
        per_source.insert("mystery".to_string(), vec![RawTrack::new("S", "A", 1, "mystery", "top")]);
        let index = aggregate(&per_source, &SourceWeights::default());
        let total = index.values().next().unwrap().total_score;
        assert!((total - 6.5).abs() < 1e-9);
    }

    #[test]
    fn test_duplicate_key_within_source_keeps_best_rank() {
        let mut per_source = BTreeMap::new();
        per_source.insert(
            "A".to_string(),
            vec![
                RawTrack::new("Song", "Artist", 5, "A", "top"),
                RawTrack::new("Song (feat. Guest)", "Artist", 2, "A", "top"),
            ],
        );
        let index = aggregate(&per_source, &weights(&[("A", 1.0)]));
        let track = &index[&resolve("Song", "Artist")];
        assert_eq!(track.per_source_rank["A"], 2);
        assert_eq!(track.title, "Song");
        // (96*0.5 + 15) + (99*0.5 + 15)
        assert_eq!(track.total_score, 127.5);
    }

    #[test]
    fn test_aggregation_is_order_independent() {
        let first_list = vec![
            RawTrack::new("One", "X", 1, "first", "top"),
            RawTrack::new("Two", "Y", 2, "first", "top").with_popularity(70.0),
            RawTrack::new("Two (feat. Z)", "Y", 9, "first", "top").with_popularity(33.3),
        ];
        let second_list = vec![
            RawTrack::new("Two", "Y", 1, "second", "top").with_view_count(3_000_000),
            RawTrack::new("Three", "Z", 2, "second", "top"),
            RawTrack::new("One", "X", 7, "second", "top").with_popularity(12.7),
        ];

        // Source ids sort one way here...
        let mut forward = BTreeMap::new();
        forward.insert("a".to_string(), first_list.clone());
        forward.insert("b".to_string(), second_list.clone());
        let forward_weights = weights(&[("a", 0.3), ("b", 0.7)]);

        // ...and the other way here, with each list reversed as well
        let mut backward = BTreeMap::new();
        backward.insert("a".to_string(), second_list.into_iter().rev().collect::<Vec<_>>());
        backward.insert("b".to_string(), first_list.into_iter().rev().collect::<Vec<_>>());
        let backward_weights = weights(&[("a", 0.7), ("b", 0.3)]);

        let first = aggregate(&forward, &forward_weights);
        let second = aggregate(&backward, &backward_weights);
        assert_eq!(first.len(), 3);
        assert_eq!(second.len(), 3);
        for (key, track) in &first {
            let other = &second[key];
            assert!((track.total_score - other.total_score).abs() < 1e-9, "{}", key);
            assert_eq!(track.source_count(), other.source_count());
            let mut ranks: Vec<u32> = track.per_source_rank.values().copied().collect();
            let mut other_ranks: Vec<u32> = other.per_source_rank.values().copied().collect();
            ranks.sort_unstable();
            other_ranks.sort_unstable();
            assert_eq!(ranks, other_ranks);
        }
    }
}
