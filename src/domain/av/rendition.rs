//! Per-quality HLS encoding.

use futures::stream::{self, StreamExt, TryStreamExt};
use std::ffi::OsString;
use std::path::Path;
use std::str::FromStr;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, info, warn};

use super::progress::{ProgressParser, RenditionProgress};
use crate::domain::hls::{MediaPlaylist, RenditionOutput, MEDIA_PLAYLIST_NAME, SEGMENT_PATTERN};
use crate::domain::media::MediaMetadata;
use crate::domain::quality::QualityLevel;
use crate::error::EncodeError;
use crate::ports::media::MediaCommandRunner;

/// x264 speed/quality trade-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncoderPreset {
    UltraFast,
    #[default]
    Fast,
    Medium,
    Slow,
}

impl EncoderPreset {
    pub fn as_x264(&self) -> &'static str {
        match self {
            EncoderPreset::UltraFast => "ultrafast",
            EncoderPreset::Fast => "fast",
            EncoderPreset::Medium => "medium",
            EncoderPreset::Slow => "slow",
        }
    }
}

impl FromStr for EncoderPreset {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ultrafast" => Ok(EncoderPreset::UltraFast),
            "fast" => Ok(EncoderPreset::Fast),
            "medium" => Ok(EncoderPreset::Medium),
            "slow" => Ok(EncoderPreset::Slow),
            other => Err(format!("unknown encoder preset {:?}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EncoderSettings {
    pub ffmpeg: String,
    /// Target segment length passed to `-hls_time`.
    pub segment_seconds: u32,
    pub preset: EncoderPreset,
    /// Receives progress reports from every rendition while it encodes.
    pub progress: Option<UnboundedSender<RenditionProgress>>,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            segment_seconds: 6,
            preset: EncoderPreset::default(),
            progress: None,
        }
    }
}

pub struct RenditionEncoder<'a, R: ?Sized> {
    runner: &'a R,
    settings: &'a EncoderSettings,
}

impl<'a, R> RenditionEncoder<'a, R>
where
    R: MediaCommandRunner + ?Sized,
{
    pub fn new(runner: &'a R, settings: &'a EncoderSettings) -> Self {
        Self { runner, settings }
    }

    pub fn encode_args(
        &self,
        source: &Path,
        level_dir: &Path,
        level: &QualityLevel,
        dimensions: (u32, u32),
        has_audio: bool,
    ) -> Vec<OsString> {
        let segment = self.settings.segment_seconds.max(1);
        let (width, height) = dimensions;

        let mut args: Vec<OsString> = Vec::with_capacity(48);
        push_all(
            &mut args,
            &["-hide_banner", "-nostdin", "-nostats", "-progress", "pipe:1", "-y", "-i"],
        );
        args.push(source.as_os_str().to_owned());

        push_all(&mut args, &["-map", "0:v:0"]);
        if has_audio {
            push_all(&mut args, &["-map", "0:a:0"]);
        }
        push_all(
            &mut args,
            &[
                "-vf",
                &format!("scale={}:{},setsar=1", width, height),
                "-c:v",
                "libx264",
                "-profile:v",
                "baseline",
                "-level",
                level.h264_level,
                "-preset",
                self.settings.preset.as_x264(),
                "-pix_fmt",
                "yuv420p",
                "-b:v",
                &format!("{}k", level.video_kbps),
                "-maxrate",
                &format!("{}k", level.video_kbps * 107 / 100),
                "-bufsize",
                &format!("{}k", level.video_kbps * 2),
                // keyframes on segment boundaries keep renditions switchable
                "-force_key_frames",
                &format!("expr:gte(t,n_forced*{})", segment),
                "-sc_threshold",
                "0",
            ],
        );
        if has_audio {
            push_all(
                &mut args,
                &["-c:a", "aac", "-b:a", &format!("{}k", level.audio_kbps), "-ac", "2"],
            );
        } else {
            push_all(&mut args, &["-an"]);
        }
        push_all(
            &mut args,
            &[
                "-start_number",
                "0",
                "-hls_time",
                &segment.to_string(),
                "-hls_list_size",
                "0",
                "-hls_playlist_type",
                "vod",
                "-hls_segment_filename",
            ],
        );
        args.push(level_dir.join(SEGMENT_PATTERN).into_os_string());
        args.push(OsString::from("-f"));
        args.push(OsString::from("hls"));
        args.push(level_dir.join(MEDIA_PLAYLIST_NAME).into_os_string());
        args
    }

    /// Encode one quality level into `output_dir/<level>/`.
    pub async fn encode(
        &self,
        source: &Path,
        output_dir: &Path,
        level: &QualityLevel,
        metadata: &MediaMetadata,
    ) -> Result<RenditionOutput, EncodeError> {
        let level_dir = output_dir.join(level.name);
        tokio::fs::create_dir_all(&level_dir)
            .await
            .map_err(|source| EncodeError::Io {
                path: level_dir.clone(),
                source,
            })?;

        let (width, height) = level.target_dimensions(metadata.width, metadata.height);
        info!(level = level.name, width, height, "Encoding rendition");

        let args = self.encode_args(source, &level_dir, level, (width, height), metadata.has_audio);
        let (lines_tx, mut lines_rx) = mpsc::unbounded_channel();
        let run = self
            .runner
            .run_streaming(&self.settings.ffmpeg, &args, lines_tx);
        let report = async {
            let mut parser = ProgressParser::new(level.name, metadata.duration_seconds);
            while let Some(line) = lines_rx.recv().await {
                if let Some(progress) = parser.feed(&line) {
                    debug!(
                        level = progress.level,
                        percent = progress.percent,
                        fps = ?progress.fps,
                        timemark = %progress.timemark,
                        "Encoding progress"
                    );
                    if let Some(sink) = &self.settings.progress {
                        let _ = sink.send(progress);
                    }
                }
            }
        };
        let (output, ()) = tokio::join!(run, report);
        let output = output.map_err(|source| EncodeError::Spawn {
            level: level.name.to_string(),
            source,
        })?;

        if !output.success() {
            return Err(EncodeError::Failed {
                level: level.name.to_string(),
                code: output.code,
                stderr: output.stderr_tail(),
            });
        }

        let playlist = verify_rendition(&level_dir, level).await?;
        let encoded_seconds = playlist.total_duration();
        debug!(
            level = level.name,
            segments = playlist.segments.len(),
            encoded_seconds,
            "Rendition verified"
        );
        let drift = (encoded_seconds - metadata.duration_seconds).abs();
        if drift > f64::from(self.settings.segment_seconds) {
            warn!(
                level = level.name,
                encoded_seconds,
                source_seconds = metadata.duration_seconds,
                "Rendition duration differs from source by more than a segment"
            );
        }

        Ok(RenditionOutput {
            level: *level,
            width,
            height,
            playlist_uri: format!("{}/{}", level.name, MEDIA_PLAYLIST_NAME),
            segments: playlist.segments,
        })
    }

    /// Encode every level with at most `parallelism` ffmpeg processes.
    ///
    /// The first failure aborts the remaining encodes; results are ordered by level height.
    pub async fn encode_all(
        &self,
        source: &Path,
        output_dir: &Path,
        levels: &[QualityLevel],
        metadata: &MediaMetadata,
        parallelism: usize,
    ) -> Result<Vec<RenditionOutput>, EncodeError> {
        let mut renditions: Vec<RenditionOutput> = stream::iter(levels.iter())
            .map(|level| self.encode(source, output_dir, level, metadata))
            .buffer_unordered(parallelism.max(1))
            .try_collect()
            .await?;

        renditions.sort_by_key(|rendition| rendition.level.height);
        Ok(renditions)
    }
}

fn push_all(args: &mut Vec<OsString>, values: &[&str]) {
    args.extend(values.iter().map(OsString::from));
}

/// Check that ffmpeg left a complete VOD playlist whose segments all exist on disk.
async fn verify_rendition(level_dir: &Path, level: &QualityLevel) -> Result<MediaPlaylist, EncodeError> {
    let invalid = |reason: String| EncodeError::InvalidOutput {
        level: level.name.to_string(),
        reason,
    };

    let playlist_path = level_dir.join(MEDIA_PLAYLIST_NAME);
    let text = tokio::fs::read_to_string(&playlist_path)
        .await
        .map_err(|e| invalid(format!("cannot read {}: {}", playlist_path.display(), e)))?;
    let playlist = MediaPlaylist::parse(&text).map_err(invalid)?;

    if !playlist.end_list {
        return Err(invalid("playlist is not terminated with #EXT-X-ENDLIST".into()));
    }
    if playlist.segments.is_empty() {
        return Err(invalid("playlist lists no segments".into()));
    }
    playlist.check_contiguous().map_err(invalid)?;

    for segment in &playlist.segments {
        let path = level_dir.join(&segment.uri);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Err(invalid(format!("segment {} missing on disk", segment.uri))),
        }
    }

    Ok(playlist)
}
