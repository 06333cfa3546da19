//! hlsforge - HLS ingest and adaptive-bitrate transcoding
//!
//! Hexagonal Architecture:
//! - domain/: Pure business logic (quality ladder, playlists, jobs) and ffmpeg/ffprobe drivers
//! - ports/: Trait definitions (object store, media command runner)
//! - adapters/: Concrete implementations
//! - application/: Generic services (publisher, orchestrator)
//! - config: Environment configuration
//!
//! # Features
//! - `s3`: S3/MinIO object store adapter (default)

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod ports;

// Re-exports for convenience
pub use application::IngestPipeline;
pub use config::{PipelineConfig, RetryPolicy, StoreConfig};
pub use domain::hls;
pub use domain::jobs::{IngestJob, IngestOutcome, JobState};
pub use domain::quality::{QualityCeiling, QualityLevel, LADDER};
pub use error::{PipelineError, PipelineResult};
