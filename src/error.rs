//! Error types for chart aggregation.
//!
//! Two families: failures reported by a single source (recovered locally and
//! surfaced as a [`crate::models::SourceFetchResult`]) and configuration errors
//! that reject a run before any fetch starts.

use thiserror::Error;

/// Error returned by a source provider for one fetch.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    /// Source could not be reached or has no provider registered
    #[error("source unavailable: {0}")]
    Unavailable(String),

    /// Source refused the request because of rate limiting
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Source responded but the payload could not be turned into tracks
    #[error("parse failure: {0}")]
    ParseFailure(String),

    /// Source reported its own timeout
    #[error("source timed out")]
    Timeout,
}

/// Fatal run configuration error, raised before any fetch is attempted.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("at least one source must be requested")]
    EmptySources,

    #[error("chart limit must be positive, got {0}")]
    NonPositiveLimit(i64),

    #[error("fetch limit for source '{source_id}' must be positive, got {limit}")]
    NonPositiveSourceLimit { source_id: String, limit: i64 },

    #[error("weight for source '{source_id}' must be a non-negative number, got {weight}")]
    InvalidWeight { source_id: String, weight: f64 },

    #[error("chart '{chart_type}' of source '{source_id}' requested more than once")]
    DuplicateChart { source_id: String, chart_type: String },

    #[error("source id must not be empty")]
    EmptySourceId,

    #[error("max concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("per-source timeout must be greater than zero")]
    ZeroTimeout,
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_messages() {
        assert_eq!(
            ProviderError::Unavailable("HTTP 503".into()).to_string(),
            "source unavailable: HTTP 503"
        );
        assert_eq!(ProviderError::Timeout.to_string(), "source timed out");
    }

    #[test]
    fn test_config_error_names_source() {
        let err = ConfigError::InvalidWeight {
            source_id: "youtube".into(),
            weight: -0.5,
        };
        assert!(err.to_string().contains("youtube"));
        assert!(err.to_string().contains("-0.5"));
    }
}
