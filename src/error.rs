//! Error taxonomy for the ingest pipeline.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::ports::storage::StoreError;

/// Top-level error reported to the caller of [`crate::application::orchestrator::IngestPipeline`].
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("probe failed: {0}")]
    Probe(#[from] ProbeError),
    #[error("encode failed: {0}")]
    Encode(#[from] EncodeError),
    #[error("publish failed: {0}")]
    Publish(#[from] PublishError),
    #[error("invalid job: {0}")]
    InvalidJob(String),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("could not run ffprobe: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("ffprobe exited with {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },
    #[error("unreadable ffprobe output: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("no video stream in source")]
    NoVideoStream,
    #[error("source reports no usable duration")]
    MissingDuration,
    #[error("video stream is {width}x{height}, below the 2x2 minimum")]
    InvalidDimensions { width: u32, height: u32 },
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("could not run ffmpeg for {level}: {source}")]
    Spawn {
        level: String,
        source: std::io::Error,
    },
    #[error("ffmpeg exited with {code:?} for {level}: {stderr}")]
    Failed {
        level: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("rendition {level} produced invalid output: {reason}")]
    InvalidOutput { level: String, reason: String },
    #[error("thumbnail generation failed: {reason}")]
    Thumbnail { reason: String },
    #[error("encoding did not finish within {0:?}")]
    Timeout(Duration),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("walking output tree failed: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("{path} is outside the output root")]
    OutsideRoot { path: PathBuf },
    #[error("reading {path} failed: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("upload of {key} failed after {attempts} attempt(s): {source}")]
    Store {
        key: String,
        attempts: u32,
        source: StoreError,
    },
    #[error("master playlist missing from output tree")]
    MissingMaster,
    #[error("thumbnail missing from output tree")]
    MissingThumbnail,
}

/// Failure to release a job's working directory. Logged, never returned to the caller.
#[derive(Debug, Error)]
#[error("cleanup of {path} failed: {source}")]
pub struct CleanupError {
    pub path: PathBuf,
    pub source: std::io::Error,
}

pub type PipelineResult<T> = Result<T, PipelineError>;
