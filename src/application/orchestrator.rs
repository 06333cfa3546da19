use std::path::{Path, PathBuf};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::domain::av::probe::probe;
use crate::domain::av::rendition::{EncoderSettings, RenditionEncoder};
use crate::domain::av::thumbnails::generate_thumbnail;
use crate::domain::hls::{MasterPlaylist, MASTER_PLAYLIST_NAME, THUMBNAIL_NAME};
use crate::domain::jobs::{is_valid_job_id, IngestJob, IngestOutcome, JobState};
use crate::domain::media::{SourceMedia, SUPPORTED_EXTENSIONS};
use crate::domain::quality::QualityCeiling;
use crate::domain::av::progress::RenditionProgress;
use crate::error::{CleanupError, EncodeError, PipelineError, PipelineResult, PublishError};
use crate::ports::media::MediaCommandRunner;
use crate::ports::storage::ObjectStore;

use super::publisher::ArtifactPublisher;

/// Subdirectory of the working directory holding the publishable tree.
const HLS_DIR: &str = "hls";

/// A job-scoped scratch directory, removed when the job ends.
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
    released: bool,
}

impl WorkDir {
    /// Create the directory, failing if it already exists.
    ///
    /// A leftover directory from a crashed or concurrent run with the same
    /// job id is never adopted or removed.
    pub async fn acquire(path: PathBuf) -> PipelineResult<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| PipelineError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        match tokio::fs::create_dir(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(PipelineError::InvalidJob(format!(
                    "working directory {} already exists",
                    path.display()
                )))
            }
            Err(source) => return Err(PipelineError::Io { path, source }),
        }
        Ok(Self {
            path,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the directory and everything in it.
    pub async fn release(mut self) -> Result<(), CleanupError> {
        self.released = true;
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CleanupError {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if !self.released {
            // the run future was dropped before it could release asynchronously
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %e, "Failed to remove work dir");
                }
            }
        }
    }
}

struct StateTracker<'a> {
    job_id: &'a str,
    state: JobState,
}

impl<'a> StateTracker<'a> {
    fn new(job_id: &'a str) -> Self {
        info!(job_id, state = %JobState::Received, "Job received");
        Self {
            job_id,
            state: JobState::Received,
        }
    }

    fn advance(&mut self, next: JobState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        info!(job_id = self.job_id, from = %self.state, to = %next, "Job state changed");
        self.state = next;
    }
}

/// Drives one source file through probe, encode, compose, publish and cleanup.
pub struct IngestPipeline<R, S> {
    runner: R,
    store: S,
    config: PipelineConfig,
    encoder: EncoderSettings,
}

impl<R, S> IngestPipeline<R, S>
where
    R: MediaCommandRunner,
    S: ObjectStore,
{
    pub fn new(runner: R, store: S, config: PipelineConfig) -> Self {
        let encoder = config.encoder_settings();
        Self {
            runner,
            store,
            config,
            encoder,
        }
    }

    /// Forward per-rendition encoding progress to `sink`.
    pub fn with_progress(mut self, sink: UnboundedSender<RenditionProgress>) -> Self {
        self.encoder.progress = Some(sink);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// `work_root/video-<job_id>`
    pub fn work_dir_for(&self, job_id: &str) -> PathBuf {
        self.config.work_root.join(format!("video-{}", job_id))
    }

    /// Run a job whose source already sits on local disk.
    ///
    /// The source file belongs to the pipeline from here on and is removed
    /// whatever the outcome.
    pub async fn run(&self, job: IngestJob) -> PipelineResult<IngestOutcome> {
        if let Err(err) = job.validate() {
            remove_source(&job.job_id, &job.source_path).await;
            return Err(err);
        }

        let work = match WorkDir::acquire(self.work_dir_for(&job.job_id)).await {
            Ok(work) => work,
            Err(err) => {
                remove_source(&job.job_id, &job.source_path).await;
                return Err(err);
            }
        };
        self.run_in(job, work).await
    }

    /// Stage uploaded bytes as `input.<extension>` in the job's working directory, then run.
    pub async fn ingest_bytes(
        &self,
        job_id: &str,
        data: &[u8],
        extension: &str,
        max_quality: QualityCeiling,
    ) -> PipelineResult<IngestOutcome> {
        if !is_valid_job_id(job_id) {
            return Err(PipelineError::InvalidJob(format!(
                "job id {:?} is not usable as a key prefix",
                job_id
            )));
        }
        let extension = extension.trim_start_matches('.').to_ascii_lowercase();
        if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(PipelineError::InvalidJob(format!(
                "unsupported video format: .{}",
                extension
            )));
        }

        let work = WorkDir::acquire(self.work_dir_for(job_id)).await?;
        let source_path = work.path().join(format!("input.{}", extension));
        if let Err(source) = tokio::fs::write(&source_path, data).await {
            release_work_dir(job_id, work).await;
            return Err(PipelineError::Io {
                path: source_path,
                source,
            });
        }
        info!(job_id, bytes = data.len(), path = %source_path.display(), "Staged upload");

        self.run_in(IngestJob::new(job_id, source_path, max_quality), work)
            .await
    }

    async fn run_in(&self, job: IngestJob, work: WorkDir) -> PipelineResult<IngestOutcome> {
        let mut tracker = StateTracker::new(&job.job_id);
        let result = self.execute(&job, work.path(), &mut tracker).await;

        if let Err(err) = &result {
            error!(job_id = %job.job_id, error = %err, "Job failed");
            tracker.advance(JobState::Failed);
        }

        release_work_dir(&job.job_id, work).await;
        remove_source(&job.job_id, &job.source_path).await;

        if result.is_ok() {
            tracker.advance(JobState::Cleaned);
        }
        result
    }

    async fn execute(
        &self,
        job: &IngestJob,
        work_dir: &Path,
        tracker: &mut StateTracker<'_>,
    ) -> PipelineResult<IngestOutcome> {
        let source = SourceMedia::from_path(&job.source_path).await?;
        info!(
            job_id = %job.job_id,
            size = source.size,
            content_type = %source.content_type,
            "Probing source"
        );

        let metadata = probe(&self.runner, &self.config.ffprobe, &source.path).await?;
        if metadata.dimensions_assumed {
            warn!(job_id = %job.job_id, "Encoding with assumed source dimensions");
        }
        tracker.advance(JobState::Probed);

        let hls_root = work_dir.join(HLS_DIR);
        tokio::fs::create_dir_all(&hls_root)
            .await
            .map_err(|source| PipelineError::Io {
                path: hls_root.clone(),
                source,
            })?;

        tracker.advance(JobState::Encoding);
        generate_thumbnail(
            &self.runner,
            &self.config.ffmpeg,
            &source.path,
            &hls_root.join(THUMBNAIL_NAME),
            &metadata,
        )
        .await?;

        let levels = job.max_quality.enabled_levels();
        info!(
            job_id = %job.job_id,
            levels = ?levels.iter().map(|level| level.name).collect::<Vec<_>>(),
            "Encoding renditions"
        );
        let encoder = RenditionEncoder::new(&self.runner, &self.encoder);
        let fan_out = encoder.encode_all(
            &source.path,
            &hls_root,
            &levels,
            &metadata,
            self.config.encode_parallelism,
        );
        let renditions = match self.config.encode_timeout {
            Some(limit) => tokio::time::timeout(limit, fan_out)
                .await
                .map_err(|_| EncodeError::Timeout(limit))??,
            None => fan_out.await?,
        };

        let master = MasterPlaylist::compose(&renditions);
        let master_path = hls_root.join(MASTER_PLAYLIST_NAME);
        master
            .write_to(&master_path)
            .await
            .map_err(|source| PipelineError::Io {
                path: master_path.clone(),
                source,
            })?;
        tracker.advance(JobState::Composed);

        let publisher = ArtifactPublisher::new(
            &self.store,
            self.config.upload_concurrency,
            &self.config.upload_retry,
        )
        .require_thumbnail();
        let artifact = publisher.publish(&hls_root, &job.job_id).await?;
        let thumbnail_url = artifact
            .thumbnail_url
            .ok_or(PublishError::MissingThumbnail)?;
        tracker.advance(JobState::Published);

        Ok(IngestOutcome {
            job_id: job.job_id.clone(),
            playlist_url: artifact.master_url,
            thumbnail_url,
            metadata,
            renditions: renditions
                .iter()
                .map(|rendition| rendition.level.name.to_string())
                .collect(),
        })
    }
}

async fn release_work_dir(job_id: &str, work: WorkDir) {
    if let Err(err) = work.release().await {
        warn!(job_id, error = %err, "Cleanup failed");
    }
}

async fn remove_source(job_id: &str, path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(source) => {
            let err = CleanupError {
                path: path.to_path_buf(),
                source,
            };
            warn!(job_id, error = %err, "Cleanup failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryStore;
    use crate::ports::media::MockMediaCommandRunner;
    use tempfile::tempdir;

    fn pipeline(work_root: &Path) -> IngestPipeline<MockMediaCommandRunner, InMemoryStore> {
        let config = PipelineConfig {
            work_root: work_root.to_path_buf(),
            ..PipelineConfig::default()
        };
        IngestPipeline::new(MockMediaCommandRunner::new(), InMemoryStore::new(), config)
    }

    #[tokio::test]
    async fn work_dir_is_removed_on_release_and_drop() {
        let root = tempdir().unwrap();

        let work = WorkDir::acquire(root.path().join("video-a")).await.unwrap();
        std::fs::write(work.path().join("input.mp4"), b"x").unwrap();
        work.release().await.unwrap();
        assert!(!root.path().join("video-a").exists());

        let dropped = WorkDir::acquire(root.path().join("video-b")).await.unwrap();
        std::fs::create_dir(dropped.path().join("hls")).unwrap();
        drop(dropped);
        assert!(!root.path().join("video-b").exists());
    }

    #[tokio::test]
    async fn existing_work_dir_is_not_adopted() {
        let root = tempdir().unwrap();
        let path = root.path().join("nested").join("video-a");
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("stale.ts"), b"old").unwrap();

        let err = WorkDir::acquire(path.clone()).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidJob(_)));
        assert!(path.join("stale.ts").exists());

        let fresh = WorkDir::acquire(root.path().join("nested").join("video-b"))
            .await
            .unwrap();
        assert!(fresh.path().is_dir());
    }

    #[tokio::test]
    async fn invalid_job_id_removes_source_without_work_dir() {
        let root = tempdir().unwrap();
        let source = root.path().join("upload.mp4");
        std::fs::write(&source, b"x").unwrap();
        let pipeline = pipeline(root.path());

        let err = pipeline
            .run(IngestJob::new("../escape", &source, QualityCeiling::default()))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::InvalidJob(_)));
        assert!(!source.exists());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn unsupported_extension_is_rejected_before_staging() {
        let root = tempdir().unwrap();
        let pipeline = pipeline(root.path());

        let err = pipeline
            .ingest_bytes("job1", b"not a video", "txt", QualityCeiling::default())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::InvalidJob(_)));
        assert!(!pipeline.work_dir_for("job1").exists());
        assert!(pipeline.store().is_empty());
    }

    #[test]
    fn work_dirs_are_job_scoped() {
        let pipeline = pipeline(Path::new("/var/tmp/ingest"));
        assert_eq!(
            pipeline.work_dir_for("abc"),
            PathBuf::from("/var/tmp/ingest/video-abc")
        );
    }
}
