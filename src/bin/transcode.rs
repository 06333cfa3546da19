//! Transcode Binary
//!
//! Runs the ingest pipeline once on a local video file and prints the outcome as JSON.
//! The input file is copied into the job's working directory and left untouched.
//! Encoding progress is reported on stderr.
//!
//! Usage: transcode <input> [max_quality] [job_id]
//!
//! Environment Variables:
//! - MINIO_ENDPOINT, MINIO_BUCKET, MINIO_ACCESS_KEY, MINIO_SECRET_KEY, MINIO_REGION: object store
//! - PUBLIC_BASE_URL: prefix for returned URLs
//! - LOCAL_STORE_DIR: publish into this directory instead of the object store
//! - WORK_DIR, FFMPEG_BIN, FFPROBE_BIN, HLS_SEGMENT_SECONDS, ENCODE_PARALLELISM, ...: pipeline

use hlsforge::adapters::aws::s3::S3Adapter;
use hlsforge::adapters::local::{FsAdapter, ProcessRunner};
use hlsforge::domain::av::progress::RenditionProgress;
use hlsforge::domain::jobs::IngestOutcome;
use hlsforge::{IngestPipeline, PipelineConfig, QualityCeiling, StoreConfig};
use std::path::PathBuf;
use tokio::sync::mpsc::{self, UnboundedSender};
use uuid::Uuid;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let input = args
        .next()
        .map(PathBuf::from)
        .ok_or("usage: transcode <input> [max_quality] [job_id]")?;
    let ceiling: QualityCeiling = match args.next() {
        Some(name) => name.parse()?,
        None => QualityCeiling::default(),
    };
    let job_id = args.next().unwrap_or_else(|| Uuid::new_v4().to_string());

    let extension = input
        .extension()
        .and_then(|ext| ext.to_str())
        .ok_or("input has no file extension")?
        .to_string();
    let data = tokio::fs::read(&input).await?;

    let config = PipelineConfig::from_env();
    let store_config = StoreConfig::from_env();

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<RenditionProgress>();
    let printer = tokio::spawn(async move {
        while let Some(progress) = progress_rx.recv().await {
            eprintln!(
                "[{}] {:5.1}% at {} ({} fps)",
                progress.level,
                progress.percent,
                progress.timemark,
                progress
                    .fps
                    .map_or_else(|| "?".to_string(), |fps| format!("{:.1}", fps))
            );
        }
    });

    let outcome = match std::env::var("LOCAL_STORE_DIR") {
        Ok(dir) => {
            let mut store = FsAdapter::new(dir);
            if let Some(base) = &store_config.public_base_url {
                store = store.with_public_base(base.as_str());
            }
            let pipeline = IngestPipeline::new(ProcessRunner::new(), store, config);
            run(pipeline, progress_tx, &job_id, &data, &extension, ceiling).await?
        }
        Err(_) => {
            let store = S3Adapter::from_config(&store_config).await;
            tracing::info!(bucket = store.bucket(), endpoint = %store_config.endpoint, "Publishing to object store");
            let pipeline = IngestPipeline::new(ProcessRunner::new(), store, config);
            run(pipeline, progress_tx, &job_id, &data, &extension, ceiling).await?
        }
    };
    // the pipeline and its sender are gone, so the printer drains and exits
    printer.await?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn run<S>(
    pipeline: IngestPipeline<ProcessRunner, S>,
    progress: UnboundedSender<RenditionProgress>,
    job_id: &str,
    data: &[u8],
    extension: &str,
    ceiling: QualityCeiling,
) -> Result<IngestOutcome, BoxError>
where
    S: hlsforge::ports::storage::ObjectStore,
{
    let pipeline = pipeline.with_progress(progress);
    Ok(pipeline.ingest_bytes(job_id, data, extension, ceiling).await?)
}
