//! Source provider boundary.
//!
//! A provider turns one `(source, chart type)` request into a list of
//! [`RawTrack`]s. Whatever shape a source uses on the wire is normalized here;
//! nothing downstream sees provider-specific fields.

use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::SourceConfig;
use crate::error::ProviderError;
use crate::models::RawTrack;
use crate::orchestrator::CancelToken;

// ============================================================================
// Provider Contract
// ============================================================================

/// What to fetch.
#[derive(Clone, Debug, PartialEq)]
pub struct FetchRequest {
    pub source: String,
    pub chart_type: String,
    pub limit: usize,
}

impl FetchRequest {
    pub fn from_config(config: &SourceConfig) -> Self {
        Self {
            source: config.source.clone(),
            chart_type: config.chart_type.clone(),
            limit: config.fetch_limit(),
        }
    }
}

/// Cancellation and deadline handed to a provider for one fetch.
///
/// Providers that block should poll [`FetchContext::is_cancelled`] or wait on
/// [`CancelToken::signal`] so an abandoned fetch stops promptly.
#[derive(Clone, Debug)]
pub struct FetchContext {
    cancel: CancelToken,
    deadline: Instant,
}

impl FetchContext {
    pub fn new(cancel: CancelToken, deadline: Instant) -> Self {
        Self { cancel, deadline }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Time left before the orchestrator gives up on this fetch.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// A source of ranked tracks. Must be safe to call from several workers.
pub trait SourceProvider: Send + Sync {
    fn fetch(&self, request: &FetchRequest, ctx: &FetchContext)
        -> Result<Vec<RawTrack>, ProviderError>;
}

/// Providers keyed by source id.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn SourceProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, source: impl Into<String>, provider: Arc<dyn SourceProvider>) {
        self.providers.insert(source.into(), provider);
    }

    pub fn with(mut self, source: impl Into<String>, provider: Arc<dyn SourceProvider>) -> Self {
        self.register(source, provider);
        self
    }

    pub fn get(&self, source: &str) -> Option<Arc<dyn SourceProvider>> {
        self.providers.get(source).cloned()
    }

    pub fn contains(&self, source: &str) -> bool {
        self.providers.contains_key(source)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

// ============================================================================
// Static Provider
// ============================================================================

/// In-memory charts keyed by chart type.
#[derive(Clone, Debug, Default)]
pub struct StaticProvider {
    charts: BTreeMap<String, Vec<RawTrack>>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chart(mut self, chart_type: impl Into<String>, tracks: Vec<RawTrack>) -> Self {
        self.charts.insert(chart_type.into(), tracks);
        self
    }
}

impl SourceProvider for StaticProvider {
    fn fetch(
        &self,
        request: &FetchRequest,
        _ctx: &FetchContext,
    ) -> Result<Vec<RawTrack>, ProviderError> {
        self.charts
            .get(&request.chart_type)
            .map(|tracks| tracks.iter().take(request.limit).cloned().collect())
            .ok_or_else(|| {
                ProviderError::Unavailable(format!(
                    "no '{}' chart for {}",
                    request.chart_type, request.source
                ))
            })
    }
}

// ============================================================================
// Snapshot Provider
// ============================================================================

/// Reads chart snapshots saved as JSON files.
///
/// Lookup order for a request: `<dir>/<source>_<chartType>.json`, then
/// `<dir>/<source>.json`. A file holds either an array of records or an
/// object with a `tracks` array.
///
/// The last underscore in a file stem separates source from chart type, so
/// a source id containing underscores needs the chart suffix:
/// `apple_music_top.json` is source `apple_music`, chart `top`.
#[derive(Clone, Debug)]
pub struct SnapshotProvider {
    dir: PathBuf,
}

impl SnapshotProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshot file that would serve this request, if any.
    pub fn snapshot_path(&self, source: &str, chart_type: &str) -> Option<PathBuf> {
        let candidates = [
            self.dir.join(format!("{}_{}.json", source, chart_type)),
            self.dir.join(format!("{}.json", source)),
        ];
        candidates.into_iter().find(|p| p.is_file())
    }

    /// Every `.json` file in the snapshot directory, sorted.
    pub fn snapshot_files(&self) -> Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read snapshot directory {}", self.dir.display()))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// One source config per snapshot file, named `<source>[_<chartType>].json`.
    /// A source may have several chart files; `<source>.json` stands for
    /// chart `top` and loses to an explicit `<source>_top.json`.
    pub fn discover(&self) -> Result<Vec<SourceConfig>> {
        let mut configs: Vec<SourceConfig> = Vec::new();
        for path in self.snapshot_files()? {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let (source, chart_type) = match stem.rsplit_once('_') {
                Some((source, chart_type)) if !chart_type.is_empty() => (source, chart_type),
                _ => (stem, "top"),
            };
            if source.is_empty() {
                continue;
            }
            if configs.iter().any(|c| c.source == source && c.chart_type == chart_type) {
                tracing::warn!("Ignoring extra snapshot {} for {}/{}", path.display(), source, chart_type);
                continue;
            }
            configs.push(SourceConfig::new(source, chart_type));
        }
        Ok(configs)
    }
}

impl SourceProvider for SnapshotProvider {
    fn fetch(&self, request: &FetchRequest, ctx: &FetchContext) -> Result<Vec<RawTrack>, ProviderError> {
        if ctx.is_cancelled() || ctx.remaining().is_zero() {
            return Err(ProviderError::Timeout);
        }
        let path = self
            .snapshot_path(&request.source, &request.chart_type)
            .ok_or_else(|| {
                ProviderError::Unavailable(format!(
                    "no snapshot for {}/{} in {}",
                    request.source,
                    request.chart_type,
                    self.dir.display()
                ))
            })?;
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| ProviderError::Unavailable(format!("{}: {}", path.display(), e)))?;
        let payload: Value = serde_json::from_str(&raw)
            .map_err(|e| ProviderError::ParseFailure(format!("{}: {}", path.display(), e)))?;

        let tracks = parse_records(&payload, &request.source, &request.chart_type)?;
        Ok(tracks.into_iter().take(request.limit).collect())
    }
}

// ============================================================================
// Record Normalization
// ============================================================================

/// First string value among `fields`, trimmed and non-empty.
fn text_field(record: &Value, fields: &[&str]) -> Option<String> {
    fields
        .iter()
        .filter_map(|f| record.get(*f))
        .filter_map(|v| match v {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .find(|s| !s.is_empty())
}

/// First numeric value among `fields`; numeric strings ("1,234") are accepted.
fn number_field(record: &Value, fields: &[&str]) -> Option<f64> {
    fields
        .iter()
        .filter_map(|f| record.get(*f))
        .filter_map(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().replace(',', "").parse::<f64>().ok(),
            _ => None,
        })
        .find(|n| n.is_finite())
}

fn count_field(record: &Value, fields: &[&str]) -> Option<u64> {
    number_field(record, fields).filter(|n| *n >= 0.0).map(|n| n as u64)
}

/// Normalize one loosely shaped record. `None` when title or artist is missing.
pub fn normalize_record(record: &Value, index: usize, source: &str, chart_type: &str) -> Option<RawTrack> {
    let title = text_field(record, &["title", "name"])?;
    let artist = text_field(record, &["artist", "main_artist"])?;
    let rank = number_field(record, &["rank", "position"])
        .filter(|r| *r >= 1.0 && *r <= u32::MAX as f64)
        .map(|r| r as u32)
        .unwrap_or(index as u32 + 1);

    let mut track = RawTrack::new(title, artist, rank, source, chart_type);
    if let Some(popularity) = number_field(record, &["popularity"]) {
        track = track.with_popularity(popularity);
    }
    if let Some(plays) = count_field(record, &["playcount", "play_count", "listeners"]) {
        track = track.with_play_count(plays);
    }
    if let Some(views) = count_field(record, &["view_count", "viewCount"]) {
        track = track.with_view_count(views);
    }
    Some(track)
}

/// Normalize a snapshot payload: an array of records or `{"tracks": [...]}`.
pub fn parse_records(payload: &Value, source: &str, chart_type: &str) -> Result<Vec<RawTrack>, ProviderError> {
    let records = match payload {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("tracks") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(ProviderError::ParseFailure(
                    "expected an array of tracks or an object with a 'tracks' array".to_string(),
                ))
            }
        },
        _ => {
            return Err(ProviderError::ParseFailure(
                "expected an array of tracks".to_string(),
            ))
        }
    };

    let tracks: Vec<RawTrack> = records
        .iter()
        .enumerate()
        .filter_map(|(i, record)| normalize_record(record, i, source, chart_type))
        .collect();

    let skipped = records.len() - tracks.len();
    if skipped > 0 {
        tracing::warn!("{}: skipped {} records without title or artist", source, skipped);
    }
    Ok(tracks)
}
