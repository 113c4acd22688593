//! Multi-source chart aggregation library - shared modules for all binaries.

pub mod analysis;
pub mod config;
pub mod error;
pub mod models;
pub mod normalize;
pub mod orchestrator;
pub mod pipeline;
pub mod profile;
pub mod progress;
pub mod provider;
pub mod ranking;
pub mod safety;
pub mod scoring;

pub use config::{FetchOptions, RunRequest, SourceConfig, SourceWeights};
pub use error::{ConfigError, ProviderError};
pub use models::{AggregatedTrack, CanonicalKey, RawTrack, RunResult, SourceFetchResult};
pub use orchestrator::CancelToken;
pub use pipeline::ChartPipeline;
pub use provider::{ProviderRegistry, SnapshotProvider, SourceProvider, StaticProvider};
