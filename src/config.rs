//! Configuration loaded from the environment (and `.env` when present).

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::domain::av::rendition::{EncoderPreset, EncoderSettings};

/// Exponential backoff for transient object-store failures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per object, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-indexed): `base * 2^retry`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let multiplier = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Settings for a single-host pipeline run.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Parent of the per-job `video-<job_id>` working directories
    pub work_root: PathBuf,
    pub ffmpeg: String,
    pub ffprobe: String,
    /// Target HLS segment length in seconds
    pub segment_seconds: u32,
    pub preset: EncoderPreset,
    /// Maximum concurrent ffmpeg encodes per job
    pub encode_parallelism: usize,
    /// Upper bound on the whole encoding fan-out
    pub encode_timeout: Option<Duration>,
    /// Maximum concurrent uploads per job
    pub upload_concurrency: usize,
    pub upload_retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_root: env::temp_dir(),
            ffmpeg: String::from("ffmpeg"),
            ffprobe: String::from("ffprobe"),
            segment_seconds: 6,
            preset: EncoderPreset::default(),
            encode_parallelism: 2,
            encode_timeout: None,
            upload_concurrency: 8,
            upload_retry: RetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        let defaults = Self::default();

        Self {
            work_root: env::var("WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_root),
            ffmpeg: env::var("FFMPEG_BIN").unwrap_or(defaults.ffmpeg),
            ffprobe: env::var("FFPROBE_BIN").unwrap_or(defaults.ffprobe),
            segment_seconds: parse_var("HLS_SEGMENT_SECONDS", defaults.segment_seconds),
            preset: parse_var("ENCODER_PRESET", defaults.preset),
            encode_parallelism: parse_var("ENCODE_PARALLELISM", defaults.encode_parallelism).max(1),
            encode_timeout: env::var("ENCODE_TIMEOUT_SECS")
                .ok()
                .and_then(|secs| secs.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            upload_concurrency: parse_var("UPLOAD_CONCURRENCY", defaults.upload_concurrency).max(1),
            upload_retry: RetryPolicy {
                max_attempts: parse_var("UPLOAD_MAX_ATTEMPTS", defaults.upload_retry.max_attempts)
                    .max(1),
                base_delay: Duration::from_millis(parse_var("UPLOAD_RETRY_BASE_MS", 200u64)),
                max_delay: defaults.upload_retry.max_delay,
            },
        }
    }

    pub fn encoder_settings(&self) -> EncoderSettings {
        EncoderSettings {
            ffmpeg: self.ffmpeg.clone(),
            segment_seconds: self.segment_seconds,
            preset: self.preset,
            progress: None,
        }
    }
}

/// Connection settings for an S3-compatible store (MinIO by default).
#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    /// Overrides `<endpoint>/<bucket>` as the prefix of returned URLs
    pub public_base_url: Option<String>,
}

impl StoreConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        Self {
            endpoint: env::var("MINIO_ENDPOINT")
                .unwrap_or_else(|_| String::from("http://localhost:9000")),
            bucket: env::var("MINIO_BUCKET").unwrap_or_else(|_| String::from("videos")),
            access_key_id: env::var("MINIO_ACCESS_KEY")
                .unwrap_or_else(|_| String::from("minioadmin")),
            secret_access_key: env::var("MINIO_SECRET_KEY")
                .unwrap_or_else(|_| String::from("minioadmin123")),
            region: env::var("MINIO_REGION").unwrap_or_else(|_| String::from("us-east-1")),
            public_base_url: env::var("PUBLIC_BASE_URL").ok().filter(|url| !url.is_empty()),
        }
    }

    /// Prefix that object keys are appended to when building public URLs.
    pub fn public_base(&self) -> String {
        match &self.public_base_url {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("{}/{}", self.endpoint.trim_end_matches('/'), self.bucket),
        }
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(variable = name, value = %raw, "Ignoring unparsable setting");
            default
        }),
        Err(_) => default,
    }
}
