use async_trait::async_trait;
use hlsforge::adapters::memory::InMemoryStore;
use hlsforge::domain::hls::{segment_file_name, MasterPlaylist, MediaPlaylist};
use hlsforge::error::{EncodeError, PipelineError, ProbeError, PublishError};
use hlsforge::ports::media::{CommandOutput, MediaCommandRunner};
use hlsforge::{IngestJob, IngestPipeline, PipelineConfig, QualityCeiling};
use serde_json::json;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, TempDir};

const SEGMENT_SECONDS: f64 = 6.0;

/// Stands in for ffprobe/ffmpeg by writing the files they would produce.
struct ScriptedRunner {
    probe_ok: bool,
    width: u32,
    height: u32,
    segments: usize,
    failing_level: Option<&'static str>,
    encode_delay: Option<Duration>,
    loses_thumbnail: bool,
}

impl ScriptedRunner {
    fn source(width: u32, height: u32, segments: usize) -> Self {
        Self {
            probe_ok: true,
            width,
            height,
            segments,
            failing_level: None,
            encode_delay: None,
            loses_thumbnail: false,
        }
    }

    fn ok() -> CommandOutput {
        CommandOutput {
            code: Some(0),
            ..Default::default()
        }
    }

    fn probe(&self) -> CommandOutput {
        if !self.probe_ok {
            return CommandOutput {
                code: Some(1),
                stdout: Vec::new(),
                stderr: b"moov atom not found\ninput.mp4: Invalid data found when processing input"
                    .to_vec(),
            };
        }
        let duration = self.segments as f64 * SEGMENT_SECONDS;
        let stdout = json!({
            "streams": [
                { "codec_type": "video", "width": self.width, "height": self.height },
                { "codec_type": "audio" }
            ],
            "format": { "duration": format!("{:.6}", duration), "bit_rate": "4500000" }
        });
        CommandOutput {
            code: Some(0),
            stdout: stdout.to_string().into_bytes(),
            stderr: Vec::new(),
        }
    }

    async fn encode(&self, playlist_path: &Path) -> std::io::Result<CommandOutput> {
        if let Some(delay) = self.encode_delay {
            tokio::time::sleep(delay).await;
        }
        let level_dir = playlist_path.parent().unwrap_or(Path::new("."));
        let level = level_dir
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        if self.failing_level == Some(level) {
            return Ok(CommandOutput {
                code: Some(1),
                stdout: Vec::new(),
                stderr: b"Conversion failed!".to_vec(),
            });
        }

        let mut playlist = MediaPlaylist::new(SEGMENT_SECONDS as u64);
        playlist.playlist_type = Some("VOD".to_string());
        for index in 0..self.segments {
            let name = segment_file_name(index);
            tokio::fs::write(level_dir.join(&name), format!("{}-{}", level, index)).await?;
            playlist.add_segment(SEGMENT_SECONDS, name);
        }
        tokio::fs::write(playlist_path, playlist.render()).await?;

        if self.loses_thumbnail {
            let thumbnail = level_dir.join("..").join("thumbnail.jpg");
            match tokio::fs::remove_file(thumbnail).await {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e),
                _ => {}
            }
        }
        Ok(CommandOutput {
            code: Some(0),
            stdout: b"out_time_us=0\nprogress=end\n".to_vec(),
            stderr: Vec::new(),
        })
    }
}

#[async_trait]
impl MediaCommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[OsString]) -> std::io::Result<CommandOutput> {
        let last = args.last().map(PathBuf::from).unwrap_or_default();
        match program {
            "ffprobe" => Ok(self.probe()),
            "ffmpeg" if args.iter().any(|arg| arg == "-frames:v") => {
                tokio::fs::write(&last, b"\xff\xd8\xff\xe0").await?;
                Ok(Self::ok())
            }
            "ffmpeg" => self.encode(&last).await,
            other => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                other.to_string(),
            )),
        }
    }
}

struct Harness {
    root: TempDir,
    store: Arc<InMemoryStore>,
    pipeline: IngestPipeline<ScriptedRunner, Arc<InMemoryStore>>,
}

impl Harness {
    fn new(runner: ScriptedRunner) -> Self {
        Self::with_config(runner, |_| {})
    }

    fn with_config(runner: ScriptedRunner, tweak: impl FnOnce(&mut PipelineConfig)) -> Self {
        let root = tempdir().unwrap();
        let mut config = PipelineConfig {
            work_root: root.path().join("work"),
            encode_parallelism: 3,
            ..PipelineConfig::default()
        };
        tweak(&mut config);
        let store = Arc::new(InMemoryStore::new());
        let pipeline = IngestPipeline::new(runner, store.clone(), config);
        Self {
            root,
            store,
            pipeline,
        }
    }

    fn upload(&self, name: &str) -> PathBuf {
        let path = self.root.path().join(name);
        std::fs::write(&path, b"fake video bytes").unwrap();
        path
    }

    fn work_dir_is_gone(&self, job_id: &str) -> bool {
        !self.pipeline.work_dir_for(job_id).exists()
    }
}

fn ceiling(name: &str) -> QualityCeiling {
    name.parse().unwrap()
}

#[tokio::test]
async fn ceiling_720p_on_1080p_source_yields_three_variants() {
    let harness = Harness::new(ScriptedRunner::source(1920, 1080, 2));
    let source = harness.upload("upload.mp4");

    let outcome = harness
        .pipeline
        .run(IngestJob::new("job-a", &source, ceiling("720p")))
        .await
        .unwrap();

    assert_eq!(outcome.renditions, vec!["360p", "480p", "720p"]);
    assert_eq!(outcome.playlist_url, "memory://job-a/master.m3u8");
    assert_eq!(outcome.thumbnail_url, "memory://job-a/thumbnail.jpg");
    assert_eq!((outcome.metadata.width, outcome.metadata.height), (1920, 1080));

    let master = harness.store.get("job-a/master.m3u8").unwrap();
    let master = MasterPlaylist::parse(std::str::from_utf8(&master.body).unwrap()).unwrap();
    let entries: Vec<(u64, u32, u32)> = master
        .variants
        .iter()
        .map(|variant| (variant.bandwidth, variant.width, variant.height))
        .collect();
    assert_eq!(
        entries,
        vec![
            (928_000, 640, 360),
            (1_528_000, 852, 480),
            (2_928_000, 1280, 720),
        ]
    );
    assert!(!source.exists());
    assert!(harness.work_dir_is_gone("job-a"));
}

#[tokio::test]
async fn probe_failure_leaves_no_work_dir() {
    let mut runner = ScriptedRunner::source(1920, 1080, 2);
    runner.probe_ok = false;
    let harness = Harness::new(runner);
    let source = harness.upload("corrupt.mp4");

    let err = harness
        .pipeline
        .run(IngestJob::new("job-b", &source, QualityCeiling::default()))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Probe(ProbeError::Failed { .. })));
    assert!(harness.work_dir_is_gone("job-b"));
    assert!(!source.exists());
    assert!(harness.store.is_empty());
}

#[tokio::test]
async fn one_failing_level_publishes_nothing() {
    let mut runner = ScriptedRunner::source(1920, 1080, 3);
    runner.failing_level = Some("720p");
    let harness = Harness::new(runner);
    let source = harness.upload("upload.mov");

    let err = harness
        .pipeline
        .run(IngestJob::new("job-c", &source, ceiling("720p")))
        .await
        .unwrap_err();

    match err {
        PipelineError::Encode(EncodeError::Failed { level, .. }) => assert_eq!(level, "720p"),
        other => panic!("unexpected error {:?}", other),
    }
    assert!(harness.store.keys_with_prefix("job-c/").is_empty());
    assert!(harness.work_dir_is_gone("job-c"));
}

#[tokio::test]
async fn full_run_publishes_complete_tree() {
    let harness = Harness::new(ScriptedRunner::source(1280, 720, 8));
    let source = harness.upload("upload.mkv");

    let outcome = harness
        .pipeline
        .run(IngestJob::new("job-d", &source, ceiling("720p")))
        .await
        .unwrap();
    assert_eq!(outcome.renditions.len(), 3);

    let keys = harness.store.keys_with_prefix("job-d/");
    let mut playlists: Vec<String> = keys
        .iter()
        .filter(|key| key.ends_with("/playlist.m3u8"))
        .cloned()
        .collect();
    let segments = keys.iter().filter(|key| key.ends_with(".ts")).count();
    assert_eq!(keys.len(), 1 + 3 + 24 + 1);
    assert_eq!(playlists.len(), 3);
    assert_eq!(segments, 24);
    assert!(keys.contains(&"job-d/master.m3u8".to_string()));
    assert!(keys.contains(&"job-d/thumbnail.jpg".to_string()));

    let master = harness.store.get("job-d/master.m3u8").unwrap();
    let master = MasterPlaylist::parse(std::str::from_utf8(&master.body).unwrap()).unwrap();
    let mut resolved: Vec<String> = master
        .variants
        .iter()
        .map(|variant| format!("job-d/{}", variant.uri))
        .collect();
    resolved.sort();
    playlists.sort();
    assert_eq!(resolved, playlists);

    let segment = harness.store.get("job-d/480p/segment_007.ts").unwrap();
    assert_eq!(segment.meta.content_type, "video/MP2T");
    assert!(harness.work_dir_is_gone("job-d"));
}

#[tokio::test]
async fn ingest_bytes_stages_and_cleans_up() {
    let harness = Harness::new(ScriptedRunner::source(640, 360, 1));

    let outcome = harness
        .pipeline
        .ingest_bytes("job-e", b"raw upload", ".MP4", ceiling("360p"))
        .await
        .unwrap();

    assert_eq!(outcome.renditions, vec!["360p"]);
    // master, one sub-playlist, one segment, thumbnail
    assert_eq!(harness.store.keys_with_prefix("job-e/").len(), 4);
    assert!(harness.work_dir_is_gone("job-e"));
}

#[tokio::test]
async fn slow_encoders_hit_the_timeout() {
    let mut runner = ScriptedRunner::source(1920, 1080, 1);
    runner.encode_delay = Some(Duration::from_secs(5));
    let harness = Harness::with_config(runner, |config| {
        config.encode_timeout = Some(Duration::from_millis(50));
    });
    let source = harness.upload("upload.webm");

    let err = harness
        .pipeline
        .run(IngestJob::new("job-f", &source, QualityCeiling::default()))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Encode(EncodeError::Timeout(_))));
    assert!(harness.store.is_empty());
    assert!(harness.work_dir_is_gone("job-f"));
}

#[tokio::test]
async fn invalid_job_id_is_rejected() {
    let harness = Harness::new(ScriptedRunner::source(1920, 1080, 1));
    let source = harness.upload("upload.mp4");

    let err = harness
        .pipeline
        .run(IngestJob::new("a/b", &source, QualityCeiling::default()))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::InvalidJob(_)));
    assert!(harness.store.is_empty());
    assert!(!harness.root.path().join("work").exists());
}

#[tokio::test]
async fn leftover_work_dir_is_never_published() {
    let harness = Harness::new(ScriptedRunner::source(1920, 1080, 1));
    let stale = harness.pipeline.work_dir_for("job-x").join("hls").join("1080p");
    std::fs::create_dir_all(&stale).unwrap();
    std::fs::write(stale.join("playlist.m3u8"), "#EXTM3U\n").unwrap();
    std::fs::write(stale.join("segment_000.ts"), b"stale").unwrap();
    let source = harness.upload("upload.mp4");

    let err = harness
        .pipeline
        .run(IngestJob::new("job-x", &source, ceiling("720p")))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::InvalidJob(_)));
    assert!(harness.store.is_empty());
    assert!(stale.join("segment_000.ts").exists());
    assert!(!source.exists());
}

#[tokio::test]
async fn missing_thumbnail_fails_before_upload() {
    let mut runner = ScriptedRunner::source(1280, 720, 2);
    runner.loses_thumbnail = true;
    let harness = Harness::new(runner);
    let source = harness.upload("upload.mp4");

    let err = harness
        .pipeline
        .run(IngestJob::new("job-g", &source, ceiling("480p")))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Publish(PublishError::MissingThumbnail)
    ));
    assert!(harness.store.is_empty());
    assert!(harness.work_dir_is_gone("job-g"));
}

#[tokio::test]
async fn progress_reaches_the_sink_for_every_rendition() {
    let harness = Harness::new(ScriptedRunner::source(1280, 720, 2));
    let source = harness.upload("upload.mp4");
    let Harness {
        root: _root,
        store,
        pipeline,
    } = harness;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let pipeline = pipeline.with_progress(tx);

    pipeline
        .run(IngestJob::new("job-h", &source, ceiling("480p")))
        .await
        .unwrap();

    let mut finished = Vec::new();
    while let Ok(report) = rx.try_recv() {
        assert_eq!(report.percent, 100.0);
        finished.push(report.level);
    }
    finished.sort();
    assert_eq!(finished, vec!["360p", "480p"]);
    assert!(!store.is_empty());
}
