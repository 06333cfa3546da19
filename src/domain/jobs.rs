use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;
use uuid::Uuid;

use super::media::MediaMetadata;
use super::quality::QualityCeiling;
use crate::error::PipelineError;

fn job_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,127}$").expect("job id pattern is valid")
    })
}

/// Job ids become both a directory name and an object key prefix.
pub fn is_valid_job_id(job_id: &str) -> bool {
    job_id_pattern().is_match(job_id)
}

#[derive(Debug, Clone)]
pub struct IngestJob {
    pub job_id: String,
    pub source_path: PathBuf,
    pub max_quality: QualityCeiling,
}

impl IngestJob {
    pub fn new(
        job_id: impl Into<String>,
        source_path: impl Into<PathBuf>,
        max_quality: QualityCeiling,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            source_path: source_path.into(),
            max_quality,
        }
    }

    pub fn with_generated_id(source_path: impl Into<PathBuf>, max_quality: QualityCeiling) -> Self {
        Self::new(Uuid::new_v4().to_string(), source_path, max_quality)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if !is_valid_job_id(&self.job_id) {
            return Err(PipelineError::InvalidJob(format!(
                "job id {:?} is not usable as a key prefix",
                self.job_id
            )));
        }
        Ok(())
    }
}

/// Pipeline progress. `Failed` is reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobState {
    Received,
    Probed,
    Encoding,
    Composed,
    Published,
    Cleaned,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Cleaned | JobState::Failed)
    }

    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Received, Probed)
            | (Probed, Encoding)
            | (Encoding, Composed)
            | (Composed, Published)
            | (Published, Cleaned) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What the caller persists after a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub job_id: String,
    pub playlist_url: String,
    pub thumbnail_url: String,
    pub metadata: MediaMetadata,
    /// Names of the published renditions, ascending.
    pub renditions: Vec<String>,
}
