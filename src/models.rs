//! Core data models for chart aggregation.
//!
//! This module contains the struct definitions, type aliases, and enums
//! shared by the fetch, scoring, ranking and analysis stages. Everything
//! here is scoped to a single aggregation run.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::normalize::resolve;

// ============================================================================
// Type Aliases
// ============================================================================

/// Raw track lists keyed by source id. Ordered so every consumer visits
/// sources in the same sequence.
pub type PerSourceTracks = BTreeMap<String, Vec<RawTrack>>;

/// Pre-ranking aggregate keyed by canonical identity.
pub type AggregateIndex = FxHashMap<CanonicalKey, AggregatedTrack>;

// ============================================================================
// Track Identity
// ============================================================================

/// Normalized `artist|title` identity used to merge one song across sources.
/// Only [`crate::normalize::resolve`] builds these.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalKey(String);

impl CanonicalKey {
    pub(crate) fn from_parts(artist_norm: &str, title_norm: &str) -> Self {
        Self(format!("{}|{}", artist_norm, title_norm))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Raw Source Models
// ============================================================================

/// Popularity/engagement signals a source may report for a track.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackSignal {
    /// Source-reported popularity, 0-100
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub popularity: Option<f64>,
    /// Scrobble/stream count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub play_count: Option<u64>,
    /// Video view count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_count: Option<u64>,
}

impl TrackSignal {
    /// Engagement count used for scoring: views first, then plays.
    pub fn engagement_count(&self) -> u64 {
        self.view_count.or(self.play_count).unwrap_or(0)
    }
}

/// One entry of one source's chart, normalized at the provider boundary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTrack {
    pub title: String,
    pub artist: String,
    /// 1-based chart position within the source
    pub rank: u32,
    pub source: String,
    pub source_chart_type: String,
    #[serde(default)]
    pub signal: TrackSignal,
}

impl RawTrack {
    /// Build a track without signals. A rank of 0 is lifted to 1.
    pub fn new(
        title: impl Into<String>,
        artist: impl Into<String>,
        rank: u32,
        source: impl Into<String>,
        source_chart_type: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
            rank: rank.max(1),
            source: source.into(),
            source_chart_type: source_chart_type.into(),
            signal: TrackSignal::default(),
        }
    }

    /// Attach a popularity signal, clamped to 0-100. Non-finite values are dropped.
    pub fn with_popularity(mut self, popularity: f64) -> Self {
        self.signal.popularity = popularity.is_finite().then(|| popularity.clamp(0.0, 100.0));
        self
    }

    pub fn with_play_count(mut self, play_count: u64) -> Self {
        self.signal.play_count = Some(play_count);
        self
    }

    pub fn with_view_count(mut self, view_count: u64) -> Self {
        self.signal.view_count = Some(view_count);
        self
    }

    /// Canonical identity of this track.
    pub fn key(&self) -> CanonicalKey {
        resolve(&self.title, &self.artist)
    }
}

// ============================================================================
// Fetch Results
// ============================================================================

/// Terminal state of one source fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchStatus {
    Success,
    Failed,
    TimedOut,
    /// Run was cancelled (or hit its deadline) before this fetch finished
    Cancelled,
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchStatus::Success => write!(f, "Success"),
            FetchStatus::Failed => write!(f, "Failed"),
            FetchStatus::TimedOut => write!(f, "TimedOut"),
            FetchStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Diagnostic for one requested `(source, chart type)` fetch in a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFetchResult {
    pub source: String,
    pub chart_type: String,
    pub status: FetchStatus,
    pub track_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Time from queueing to the terminal state, waiting for a slot included
    pub elapsed_ms: u64,
}

impl SourceFetchResult {
    pub fn is_success(&self) -> bool {
        self.status == FetchStatus::Success
    }
}

// ============================================================================
// Aggregation Models
// ============================================================================

/// Qualitative label for how broadly and highly a track charts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendStrength {
    VeryStrong,
    Strong,
    Moderate,
    Weak,
}

impl fmt::Display for TrendStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrendStrength::VeryStrong => write!(f, "Very Strong"),
            TrendStrength::Strong => write!(f, "Strong"),
            TrendStrength::Moderate => write!(f, "Moderate"),
            TrendStrength::Weak => write!(f, "Weak"),
        }
    }
}

/// One song merged across every source that reported it.
///
/// `position`, `trend_strength` and `consistency` hold placeholder values
/// until the ranking engine finalizes the track.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedTrack {
    /// 1-based position in the ranked chart (0 before ranking)
    pub position: usize,
    pub key: CanonicalKey,
    /// Display title, first-seen wins
    pub title: String,
    /// Display artist, first-seen wins
    pub artist: String,
    pub total_score: f64,
    pub contributing_sources: BTreeSet<String>,
    pub per_source_rank: BTreeMap<String, u32>,
    pub trend_strength: TrendStrength,
    pub consistency: f64,
}

impl AggregatedTrack {
    pub(crate) fn seed(key: CanonicalKey, first: &RawTrack) -> Self {
        Self {
            position: 0,
            key,
            title: first.title.clone(),
            artist: first.artist.clone(),
            total_score: 0.0,
            contributing_sources: BTreeSet::new(),
            per_source_rank: BTreeMap::new(),
            trend_strength: TrendStrength::Weak,
            consistency: 1.0,
        }
    }

    pub fn source_count(&self) -> usize {
        self.contributing_sources.len()
    }

    /// Lowest (best) rank across contributing sources.
    pub fn best_rank(&self) -> u32 {
        self.per_source_rank.values().copied().min().unwrap_or(u32::MAX)
    }

    /// Mean of per-source ranks, `None` when no source contributed.
    pub fn mean_rank(&self) -> Option<f64> {
        if self.per_source_rank.is_empty() {
            return None;
        }
        let sum: f64 = self.per_source_rank.values().map(|&r| r as f64).sum();
        Some(sum / self.per_source_rank.len() as f64)
    }
}

/// How much one source contributed to the final chart.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStatistics {
    pub contributing_tracks: usize,
    pub weight: f64,
    /// Mean rank this source gave to charted tracks (0 when none)
    pub avg_rank_contribution: f64,
}

// ============================================================================
// Cross-Source Analysis Models
// ============================================================================

/// Track found in exactly one source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExclusiveTrack {
    pub key: CanonicalKey,
    pub title: String,
    pub artist: String,
    pub rank: u32,
}

/// Rank agreement between two sources over their shared tracks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairCorrelation {
    /// Pearson coefficient of rank positions, 0 when data is insufficient
    pub correlation_coefficient: f64,
    pub common_track_count: usize,
    /// False when fewer than 2 shared tracks or a source's ranks have no variance
    pub sufficient_data: bool,
    pub sample_tracks: Vec<CanonicalKey>,
}

/// Overlap, exclusivity and correlation across sources.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlapReport {
    pub total_unique_tracks: usize,
    pub per_source_track_count: BTreeMap<String, usize>,
    /// Jaccard similarity as a percentage
    pub overlap_matrix: BTreeMap<String, BTreeMap<String, f64>>,
    pub exclusive_tracks: BTreeMap<String, Vec<ExclusiveTrack>>,
    pub exclusivity_rate: BTreeMap<String, f64>,
    /// Keyed "sourceA_vs_sourceB" with sourceA < sourceB
    pub pairwise_correlation: BTreeMap<String, PairCorrelation>,
    /// Keys present in two or more sources
    pub shared_track_count: usize,
    pub overlap_percentage: f64,
}

/// Artist with its number of entries in one source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtistCount {
    pub artist: String,
    pub count: usize,
    pub percentage: f64,
}

/// Descriptive profile of one source's chart.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceProfile {
    pub total_tracks: usize,
    pub unique_artists: usize,
    pub diversity_score: f64,
    pub top_artists: Vec<ArtistCount>,
    pub top10_dominance: f64,
    pub genre_share: BTreeMap<String, f64>,
    pub avg_title_length: f64,
}

/// Two distinct keys that look like the same song but did not merge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearMiss {
    pub key_a: CanonicalKey,
    pub key_b: CanonicalKey,
    pub similarity: f64,
}

// ============================================================================
// Run Output
// ============================================================================

/// Complete structured result of one aggregation run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub success_rate: f64,
    pub per_source_status: Vec<SourceFetchResult>,
    pub ranked_chart: Vec<AggregatedTrack>,
    pub overlap_report: OverlapReport,
    pub source_statistics: BTreeMap<String, SourceStatistics>,
    pub source_profiles: BTreeMap<String, SourceProfile>,
    pub identity_warnings: Vec<NearMiss>,
}

// ============================================================================
// Statistics (Instrumentation)
// ============================================================================

/// Run-level counters for logging and the `--stats` file. Source counters
/// count requested charts, so a source asked for two charts counts twice.
#[derive(Default, Debug, Clone, Serialize)]
pub struct RunStats {
    pub requested_sources: usize,
    pub successful_sources: usize,
    pub failed_sources: usize,
    pub timed_out_sources: usize,
    pub cancelled_sources: usize,

    pub tracks_collected: usize,
    pub unique_tracks: usize,
    pub ranked_tracks: usize,
    pub identity_warnings: usize,

    pub elapsed_seconds: f64,
}

impl RunStats {
    /// Count one terminal fetch state.
    pub fn record_status(&mut self, result: &SourceFetchResult) {
        self.requested_sources += 1;
        match result.status {
            FetchStatus::Success => {
                self.successful_sources += 1;
                self.tracks_collected += result.track_count;
            }
            FetchStatus::Failed => self.failed_sources += 1,
            FetchStatus::TimedOut => self.timed_out_sources += 1,
            FetchStatus::Cancelled => self.cancelled_sources += 1,
        }
    }

    /// Log stats as pretty JSON
    pub fn log_phase(&self, phase: &str) {
        if let Ok(json) = serde_json::to_string_pretty(self) {
            tracing::info!("[STATS:{}]\n{}", phase, json);
        }
    }

    /// Write stats to a JSON file
    pub fn write_to_file(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_track_rank_floor_and_popularity_clamp() {
        let track = RawTrack::new("Song", "Artist", 0, "melon", "realtime").with_popularity(140.0);
        assert_eq!(track.rank, 1);
        assert_eq!(track.signal.popularity, Some(100.0));

        let track = RawTrack::new("Song", "Artist", 3, "melon", "realtime").with_popularity(f64::NAN);
        assert_eq!(track.signal.popularity, None);
    }

    #[test]
    fn test_engagement_prefers_views() {
        let signal = TrackSignal {
            popularity: None,
            play_count: Some(10),
            view_count: Some(20),
        };
        assert_eq!(signal.engagement_count(), 20);
        assert_eq!(TrackSignal::default().engagement_count(), 0);
    }

    #[test]
    fn test_run_stats_record_status() {
        let mut stats = RunStats::default();

        let ok = SourceFetchResult {
            source: "a".into(),
            chart_type: "top".into(),
            status: FetchStatus::Success,
            track_count: 5,
            error: None,
            elapsed_ms: 1,
        };
        let timed_out = SourceFetchResult {
            status: FetchStatus::TimedOut,
            track_count: 0,
            ..ok.clone()
        };
        stats.record_status(&ok);
        stats.record_status(&timed_out);

        assert_eq!(stats.requested_sources, 2);
        assert_eq!(stats.successful_sources, 1);
        assert_eq!(stats.tracks_collected, 5);
        assert_eq!(stats.timed_out_sources, 1);
    }

    #[test]
    fn test_raw_track_json_shape() {
        let track = RawTrack::new("Song", "Artist", 2, "youtube", "music").with_view_count(5);
        let json = serde_json::to_value(&track).unwrap();
        assert_eq!(json["sourceChartType"], "music");
        assert_eq!(json["signal"]["viewCount"], 5);
        assert!(json["signal"].get("popularity").is_none());
    }
}
