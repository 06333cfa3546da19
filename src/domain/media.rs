use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, PipelineResult};

/// Container extensions accepted for upload.
pub const SUPPORTED_EXTENSIONS: [&str; 8] = ["mp4", "avi", "mov", "mkv", "webm", "flv", "wmv", "m4v"];

pub fn is_supported_video(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|supported| supported.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

/// An uploaded file sitting on local storage, owned by one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMedia {
    pub path: PathBuf,
    pub content_type: String,
    pub size: u64,
}

impl SourceMedia {
    pub async fn from_path(path: impl Into<PathBuf>) -> PipelineResult<Self> {
        let path = path.into();
        if !is_supported_video(&path) {
            return Err(PipelineError::InvalidJob(format!(
                "unsupported video format: {}",
                path.display()
            )));
        }

        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|source| PipelineError::Io {
                path: path.clone(),
                source,
            })?;
        if !metadata.is_file() {
            return Err(PipelineError::InvalidJob(format!(
                "{} is not a file",
                path.display()
            )));
        }

        Ok(Self {
            content_type: content_type_for(&path).to_string(),
            size: metadata.len(),
            path,
        })
    }

    /// File extension used when staging a copy in the working directory.
    pub fn extension(&self) -> &str {
        self.path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("mp4")
    }
}

fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("mkv") => "video/x-matroska",
        Some("webm") => "video/webm",
        Some("avi") => "video/x-msvideo",
        Some("flv") => "video/x-flv",
        Some("wmv") => "video/x-ms-wmv",
        _ => "application/octet-stream",
    }
}

/// Snapshot produced once by the prober.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaMetadata {
    pub duration_seconds: f64,
    pub width: u32,
    pub height: u32,
    /// Container bitrate in bits per second, 0 when unknown.
    pub bitrate: u64,
    /// Set when the video stream carried no dimensions and 1920x1080 was assumed.
    pub dimensions_assumed: bool,
    pub has_audio: bool,
}

impl MediaMetadata {
    /// Whole seconds, as persisted by the caller.
    pub fn duration_whole_seconds(&self) -> u64 {
        self.duration_seconds.max(0.0).floor() as u64
    }
}
