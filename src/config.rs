//! Run configuration: the request a caller submits, the source weight table
//! and the fetch budget.
//!
//! Validation happens here, before any fetch is attempted.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};

// ============================================================================
// Defaults
// ============================================================================

/// Tracks requested from each source when the request does not say
pub const DEFAULT_SOURCE_LIMIT: i64 = 100;

/// Worker budget for concurrent fetches
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Time box for a single source fetch
pub const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-source depth considered by the overlap analysis
pub const DEFAULT_OVERLAP_DEPTH: usize = 100;

/// Weight for sources missing from the weight table
pub const DEFAULT_UNKNOWN_WEIGHT: f64 = 0.1;

/// Built-in weights: official charts highest, view-driven charts lowest.
pub const DEFAULT_WEIGHTS: &[(&str, f64)] = &[
    ("billboard", 0.30),
    ("spotify", 0.25),
    ("lastfm", 0.25),
    ("youtube", 0.20),
];

// ============================================================================
// Source Weights
// ============================================================================

/// Per-source weight lookup with a low fallback for unknown sources.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceWeights {
    weights: BTreeMap<String, f64>,
    fallback: f64,
}

impl SourceWeights {
    pub fn new(weights: BTreeMap<String, f64>) -> Self {
        Self {
            weights,
            fallback: DEFAULT_UNKNOWN_WEIGHT,
        }
    }

    /// Built-in table overlaid with caller overrides.
    pub fn with_overrides(overrides: &BTreeMap<String, f64>) -> Self {
        let mut weights: BTreeMap<String, f64> = DEFAULT_WEIGHTS
            .iter()
            .map(|&(source, weight)| (source.to_string(), weight))
            .collect();
        weights.extend(overrides.iter().map(|(k, v)| (k.clone(), *v)));
        Self::new(weights)
    }

    pub fn weight_for(&self, source: &str) -> f64 {
        self.weights.get(source).copied().unwrap_or(self.fallback)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        for (source, &weight) in &self.weights {
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConfigError::InvalidWeight {
                    source_id: source.clone(),
                    weight,
                });
            }
        }
        Ok(())
    }
}

impl Default for SourceWeights {
    fn default() -> Self {
        Self::with_overrides(&BTreeMap::new())
    }
}

// ============================================================================
// Run Request
// ============================================================================

/// One source to fetch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    pub source: String,
    #[serde(default = "default_chart_type")]
    pub chart_type: String,
    /// Tracks to request; defaults to [`DEFAULT_SOURCE_LIMIT`]
    #[serde(default)]
    pub limit: Option<i64>,
}

fn default_chart_type() -> String {
    "top".to_string()
}

impl SourceConfig {
    pub fn new(source: impl Into<String>, chart_type: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            chart_type: chart_type.into(),
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Effective fetch limit. Only meaningful after validation.
    pub fn fetch_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_SOURCE_LIMIT).max(0) as usize
    }
}

/// What a caller asks one run to do.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub sources: Vec<SourceConfig>,
    /// Size of the ranked chart
    pub limit: i64,
    /// Overrides on top of the built-in weight table
    #[serde(default)]
    pub source_weights: BTreeMap<String, f64>,
    /// Per-source depth for overlap analysis; defaults to [`DEFAULT_OVERLAP_DEPTH`]
    #[serde(default)]
    pub overlap_depth: Option<usize>,
}

impl RunRequest {
    pub fn new(sources: Vec<SourceConfig>, limit: i64) -> Self {
        Self {
            sources,
            limit,
            source_weights: BTreeMap::new(),
            overlap_depth: None,
        }
    }

    pub fn with_weight(mut self, source: impl Into<String>, weight: f64) -> Self {
        self.source_weights.insert(source.into(), weight);
        self
    }

    /// Load a request from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read run request {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse run request {}", path.display()))
    }

    pub fn weights(&self) -> SourceWeights {
        SourceWeights::with_overrides(&self.source_weights)
    }

    pub fn chart_limit(&self) -> usize {
        self.limit.max(0) as usize
    }

    pub fn overlap_depth(&self) -> usize {
        self.overlap_depth.unwrap_or(DEFAULT_OVERLAP_DEPTH)
    }

    /// Reject configurations that would make the run meaningless.
    ///
    /// Checks:
    /// - at least one source, each with a non-empty id
    /// - no `(source, chart type)` pair requested twice; one source may ask
    ///   for several chart types
    /// - positive chart limit and positive per-source limits
    /// - finite, non-negative weights
    pub fn validate(&self) -> ConfigResult<()> {
        if self.sources.is_empty() {
            return Err(ConfigError::EmptySources);
        }
        if self.limit <= 0 {
            return Err(ConfigError::NonPositiveLimit(self.limit));
        }

        let mut seen = HashSet::new();
        for config in &self.sources {
            if config.source.trim().is_empty() {
                return Err(ConfigError::EmptySourceId);
            }
            if !seen.insert((config.source.as_str(), config.chart_type.as_str())) {
                return Err(ConfigError::DuplicateChart {
                    source_id: config.source.clone(),
                    chart_type: config.chart_type.clone(),
                });
            }
            if let Some(limit) = config.limit {
                if limit <= 0 {
                    return Err(ConfigError::NonPositiveSourceLimit {
                        source_id: config.source.clone(),
                        limit,
                    });
                }
            }
        }

        self.weights().validate()
    }
}

// ============================================================================
// Fetch Options
// ============================================================================

/// Concurrency and time budget for the fetch stage.
#[derive(Clone, Debug, PartialEq)]
pub struct FetchOptions {
    pub max_concurrency: usize,
    pub per_source_timeout: Duration,
    /// Overall deadline for the fetch stage; unfinished sources become Cancelled
    pub run_timeout: Option<Duration>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            per_source_timeout: DEFAULT_SOURCE_TIMEOUT,
            run_timeout: None,
        }
    }
}

impl FetchOptions {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.per_source_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RunRequest {
        RunRequest::new(
            vec![SourceConfig::new("melon", "realtime"), SourceConfig::new("spotify", "top")],
            50,
        )
    }

    #[test]
    fn test_valid_request() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn test_empty_sources_rejected() {
        let req = RunRequest::new(vec![], 10);
        assert_eq!(req.validate(), Err(ConfigError::EmptySources));
    }

    #[test]
    fn test_non_positive_limits_rejected() {
        let mut req = request();
        req.limit = 0;
        assert_eq!(req.validate(), Err(ConfigError::NonPositiveLimit(0)));

        let req = RunRequest::new(vec![SourceConfig::new("melon", "realtime").with_limit(-5)], 10);
        assert!(matches!(
            req.validate(),
            Err(ConfigError::NonPositiveSourceLimit { limit: -5, .. })
        ));
    }

    #[test]
    fn test_negative_weight_rejected() {
        let req = request().with_weight("melon", -1.0);
        assert!(matches!(req.validate(), Err(ConfigError::InvalidWeight { .. })));

        let req = request().with_weight("melon", f64::NAN);
        assert!(matches!(req.validate(), Err(ConfigError::InvalidWeight { .. })));
    }

    #[test]
    fn test_several_charts_per_source_allowed() {
        let req = RunRequest::new(
            vec![SourceConfig::new("melon", "realtime"), SourceConfig::new("melon", "daily")],
            10,
        );
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_duplicate_chart_rejected() {
        let req = RunRequest::new(
            vec![
                SourceConfig::new("melon", "realtime"),
                SourceConfig::new("melon", "daily"),
                SourceConfig::new("melon", "realtime").with_limit(20),
            ],
            10,
        );
        assert_eq!(
            req.validate(),
            Err(ConfigError::DuplicateChart {
                source_id: "melon".into(),
                chart_type: "realtime".into(),
            })
        );
    }

    #[test]
    fn test_weights_overlay_defaults() {
        let weights = request().with_weight("melon", 0.4).with_weight("spotify", 1.0).weights();
        assert_eq!(weights.weight_for("melon"), 0.4);
        assert_eq!(weights.weight_for("spotify"), 1.0);
        assert_eq!(weights.weight_for("billboard"), 0.30);
        assert_eq!(weights.weight_for("unheard-of"), DEFAULT_UNKNOWN_WEIGHT);
    }

    #[test]
    fn test_request_json_defaults() {
        let req: RunRequest = serde_json::from_str(
            r#"{"sources": [{"source": "bugs"}, {"source": "vibe", "chartType": "chart", "limit": 20}], "limit": 25}"#,
        )
        .unwrap();
        assert_eq!(req.sources[0].chart_type, "top");
        assert_eq!(req.sources[0].fetch_limit(), 100);
        assert_eq!(req.sources[1].fetch_limit(), 20);
        assert_eq!(req.overlap_depth(), DEFAULT_OVERLAP_DEPTH);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_fetch_options_validation() {
        assert!(FetchOptions::default().validate().is_ok());
        let opts = FetchOptions {
            max_concurrency: 0,
            ..FetchOptions::default()
        };
        assert_eq!(opts.validate(), Err(ConfigError::ZeroConcurrency));
        let opts = FetchOptions {
            per_source_timeout: Duration::ZERO,
            ..FetchOptions::default()
        };
        assert_eq!(opts.validate(), Err(ConfigError::ZeroTimeout));
    }
}
