use serde::Deserialize;
use std::ffi::OsString;
use std::path::Path;
use tracing::{debug, warn};

use crate::domain::media::MediaMetadata;
use crate::error::ProbeError;
use crate::ports::media::MediaCommandRunner;

/// Used only when ffprobe reports a video stream without dimensions.
pub const FALLBACK_DIMENSIONS: (u32, u32) = (1920, 1080);

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
    disposition: Option<FfprobeDisposition>,
    tags: Option<FfprobeTags>,
    #[serde(default)]
    side_data_list: Vec<FfprobeSideData>,
}

#[derive(Debug, Deserialize)]
struct FfprobeTags {
    rotate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeSideData {
    rotation: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FfprobeDisposition {
    #[serde(default)]
    attached_pic: u8,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
}

impl FfprobeStream {
    fn is_video(&self) -> bool {
        // cover art in audio files shows up as a one-frame video stream
        self.codec_type.as_deref() == Some("video")
            && self
                .disposition
                .as_ref()
                .map_or(true, |disposition| disposition.attached_pic == 0)
    }

    fn is_audio(&self) -> bool {
        self.codec_type.as_deref() == Some("audio")
    }

    /// Display rotation in degrees, normalised to `0..360`.
    ///
    /// Newer ffprobe reports it in the display matrix side data, older builds in `tags.rotate`.
    fn rotation(&self) -> i64 {
        let degrees = self
            .side_data_list
            .iter()
            .find_map(|side_data| side_data.rotation)
            .or_else(|| {
                let tag = self.tags.as_ref().and_then(|tags| tags.rotate.as_deref());
                parse_number::<f64>(tag)
            })
            .unwrap_or(0.0);
        (degrees.round() as i64).rem_euclid(360)
    }
}

pub fn probe_args(path: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "-v",
        "error",
        "-print_format",
        "json",
        "-show_format",
        "-show_streams",
    ]
    .iter()
    .map(OsString::from)
    .collect();
    args.push(path.as_os_str().to_owned());
    args
}

/// Extract duration, dimensions and bitrate from a local media file.
pub async fn probe<R>(runner: &R, ffprobe: &str, path: &Path) -> Result<MediaMetadata, ProbeError>
where
    R: MediaCommandRunner + ?Sized,
{
    let output = runner
        .run(ffprobe, &probe_args(path))
        .await
        .map_err(ProbeError::Spawn)?;

    if !output.success() {
        return Err(ProbeError::Failed {
            code: output.code,
            stderr: output.stderr_tail(),
        });
    }

    let metadata = parse_probe_output(&output.stdout)?;
    debug!(path = %path.display(), ?metadata, "Probed source");
    Ok(metadata)
}

pub fn parse_probe_output(stdout: &[u8]) -> Result<MediaMetadata, ProbeError> {
    let probed: FfprobeOutput = serde_json::from_slice(stdout)?;

    let video = probed
        .streams
        .iter()
        .find(|stream| stream.is_video())
        .ok_or(ProbeError::NoVideoStream)?;
    let has_audio = probed.streams.iter().any(FfprobeStream::is_audio);

    let duration_seconds = probed
        .format
        .as_ref()
        .and_then(|format| parse_number::<f64>(format.duration.as_deref()))
        .or_else(|| parse_number::<f64>(video.duration.as_deref()))
        .filter(|duration| duration.is_finite() && *duration > 0.0)
        .ok_or(ProbeError::MissingDuration)?;

    let bitrate = probed
        .format
        .as_ref()
        .and_then(|format| parse_number::<u64>(format.bit_rate.as_deref()))
        .unwrap_or(0);

    let (width, height, dimensions_assumed) = match (video.width, video.height) {
        (Some(w), Some(h)) if w < 2 || h < 2 => {
            return Err(ProbeError::InvalidDimensions {
                width: w,
                height: h,
            })
        }
        (Some(w), Some(h)) => (w, h, false),
        _ => {
            let (w, h) = FALLBACK_DIMENSIONS;
            warn!(
                width = w,
                height = h,
                "Video stream has no dimensions, assuming fallback"
            );
            (w, h, true)
        }
    };

    // ffmpeg auto-rotates on decode, so quarter turns swap the frame the encoder sees
    let rotation = video.rotation();
    let (width, height) = if rotation == 90 || rotation == 270 {
        debug!(rotation, "Source is rotated, swapping dimensions");
        (height, width)
    } else {
        (width, height)
    };

    Ok(MediaMetadata {
        duration_seconds,
        width,
        height,
        bitrate,
        dimensions_assumed,
        has_audio,
    })
}

fn parse_number<T: std::str::FromStr>(value: Option<&str>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::quality::QualityLevel;
    use crate::ports::media::{CommandOutput, MockMediaCommandRunner};
    use serde_json::json;

    fn ok(stdout: serde_json::Value) -> CommandOutput {
        CommandOutput {
            code: Some(0),
            stdout: stdout.to_string().into_bytes(),
            stderr: Vec::new(),
        }
    }

    #[test]
    fn parses_dimensions_duration_and_bitrate() {
        let stdout = json!({
            "streams": [
                { "codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080 },
                { "codec_type": "audio", "codec_name": "aac" }
            ],
            "format": { "duration": "48.021333", "bit_rate": "5234123" }
        });
        let metadata = parse_probe_output(stdout.to_string().as_bytes()).unwrap();
        assert_eq!(metadata.width, 1920);
        assert_eq!(metadata.height, 1080);
        assert_eq!(metadata.bitrate, 5_234_123);
        assert!((metadata.duration_seconds - 48.021333).abs() < 1e-9);
        assert!(metadata.has_audio);
        assert!(!metadata.dimensions_assumed);
    }

    #[test]
    fn missing_dimensions_fall_back_and_are_flagged() {
        let stdout = json!({
            "streams": [{ "codec_type": "video" }],
            "format": { "duration": "3.5" }
        });
        let metadata = parse_probe_output(stdout.to_string().as_bytes()).unwrap();
        assert_eq!((metadata.width, metadata.height), FALLBACK_DIMENSIONS);
        assert!(metadata.dimensions_assumed);
        assert!(!metadata.has_audio);
        assert_eq!(metadata.bitrate, 0);
    }

    #[test]
    fn audio_only_source_is_rejected() {
        let stdout = json!({
            "streams": [
                { "codec_type": "audio" },
                { "codec_type": "video", "width": 600, "height": 600,
                  "disposition": { "attached_pic": 1 } }
            ],
            "format": { "duration": "200.0" }
        });
        let err = parse_probe_output(stdout.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, ProbeError::NoVideoStream));
    }

    #[test]
    fn stream_duration_is_used_when_format_has_none() {
        let stdout = json!({
            "streams": [{ "codec_type": "video", "width": 640, "height": 360, "duration": "2.0" }],
            "format": {}
        });
        let metadata = parse_probe_output(stdout.to_string().as_bytes()).unwrap();
        assert_eq!(metadata.duration_seconds, 2.0);
    }

    #[test]
    fn zero_duration_is_rejected() {
        let stdout = json!({
            "streams": [{ "codec_type": "video", "width": 640, "height": 360 }],
            "format": { "duration": "N/A" }
        });
        let err = parse_probe_output(stdout.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, ProbeError::MissingDuration));
    }

    #[test]
    fn quarter_turn_rotation_swaps_dimensions() {
        let stdout = json!({
            "streams": [{
                "codec_type": "video", "width": 1920, "height": 1080,
                "side_data_list": [{ "side_data_type": "Display Matrix", "rotation": -90 }]
            }],
            "format": { "duration": "12.0" }
        });
        let metadata = parse_probe_output(stdout.to_string().as_bytes()).unwrap();
        assert_eq!((metadata.width, metadata.height), (1080, 1920));

        let level = QualityLevel::by_name("720p").unwrap();
        assert_eq!(level.target_dimensions(metadata.width, metadata.height), (404, 720));
    }

    #[test]
    fn legacy_rotate_tag_is_honoured() {
        let rotated = json!({
            "streams": [{ "codec_type": "video", "width": 1280, "height": 720, "tags": { "rotate": "270" } }],
            "format": { "duration": "12.0" }
        });
        let metadata = parse_probe_output(rotated.to_string().as_bytes()).unwrap();
        assert_eq!((metadata.width, metadata.height), (720, 1280));

        let upside_down = json!({
            "streams": [{ "codec_type": "video", "width": 1280, "height": 720, "tags": { "rotate": "180" } }],
            "format": { "duration": "12.0" }
        });
        let metadata = parse_probe_output(upside_down.to_string().as_bytes()).unwrap();
        assert_eq!((metadata.width, metadata.height), (1280, 720));
    }

    #[test]
    fn sub_two_pixel_sources_are_rejected() {
        let stdout = json!({
            "streams": [{ "codec_type": "video", "width": 1, "height": 480 }],
            "format": { "duration": "12.0" }
        });
        let err = parse_probe_output(stdout.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, ProbeError::InvalidDimensions { width: 1, height: 480 }));
    }

    #[test]
    fn garbage_output_is_a_parse_error() {
        let err = parse_probe_output(b"not json").unwrap_err();
        assert!(matches!(err, ProbeError::Parse(_)));
    }

    #[tokio::test]
    async fn probe_runs_ffprobe_with_json_output() {
        let mut runner = MockMediaCommandRunner::new();
        runner
            .expect_run()
            .withf(|program, args| {
                program == "ffprobe"
                    && args.iter().any(|a| a == "json")
                    && args.last().map(|a| a == "/data/in.mp4").unwrap_or(false)
            })
            .times(1)
            .returning(|_, _| {
                Ok(ok(json!({
                    "streams": [{ "codec_type": "video", "width": 1280, "height": 720 }],
                    "format": { "duration": "10.0", "bit_rate": "900000" }
                })))
            });

        let metadata = probe(&runner, "ffprobe", Path::new("/data/in.mp4"))
            .await
            .unwrap();
        assert_eq!(metadata.height, 720);
    }

    #[tokio::test]
    async fn corrupt_file_is_a_probe_failure() {
        let mut runner = MockMediaCommandRunner::new();
        runner.expect_run().returning(|_, _| {
            Ok(CommandOutput {
                code: Some(1),
                stdout: Vec::new(),
                stderr: b"moov atom not found\nInvalid data found when processing input".to_vec(),
            })
        });

        let err = probe(&runner, "ffprobe", Path::new("broken.mp4"))
            .await
            .unwrap_err();
        match err {
            ProbeError::Failed { code, stderr } => {
                assert_eq!(code, Some(1));
                assert!(stderr.contains("Invalid data"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let mut runner = MockMediaCommandRunner::new();
        runner.expect_run().returning(|_, _| {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "ffprobe"))
        });
        let err = probe(&runner, "ffprobe", Path::new("x.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Spawn(_)));
    }
}
