use std::ffi::OsString;
use std::path::Path;
use tracing::info;

use crate::domain::media::MediaMetadata;
use crate::error::EncodeError;
use crate::ports::media::MediaCommandRunner;

const PREFERRED_OFFSET_SECONDS: f64 = 2.0;

/// Seek position for the poster frame; halfway through sources shorter than the preferred offset.
pub fn thumbnail_offset(duration_seconds: f64) -> f64 {
    if duration_seconds > PREFERRED_OFFSET_SECONDS {
        PREFERRED_OFFSET_SECONDS
    } else {
        (duration_seconds / 2.0).max(0.0)
    }
}

pub fn thumbnail_args(source: &Path, output: &Path, offset_seconds: f64) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-hide_banner", "-nostdin", "-y", "-ss"]
        .iter()
        .map(OsString::from)
        .collect();
    args.push(format!("{:.3}", offset_seconds).into());
    args.push("-i".into());
    args.push(source.as_os_str().to_owned());
    for arg in [
        "-frames:v",
        "1",
        "-vf",
        "scale=trunc(iw/2)*2:trunc(ih/2)*2",
        "-q:v",
        "2",
    ] {
        args.push(arg.into());
    }
    args.push(output.as_os_str().to_owned());
    args
}

/// Extract a single JPEG poster frame from `source`.
pub async fn generate_thumbnail<R>(
    runner: &R,
    ffmpeg: &str,
    source: &Path,
    output: &Path,
    metadata: &MediaMetadata,
) -> Result<(), EncodeError>
where
    R: MediaCommandRunner + ?Sized,
{
    let offset = thumbnail_offset(metadata.duration_seconds);
    let result = runner
        .run(ffmpeg, &thumbnail_args(source, output, offset))
        .await
        .map_err(|e| EncodeError::Thumbnail {
            reason: format!("could not run ffmpeg: {}", e),
        })?;

    if !result.success() {
        return Err(EncodeError::Thumbnail {
            reason: format!("ffmpeg exited with {:?}: {}", result.code, result.stderr_tail()),
        });
    }

    match tokio::fs::metadata(output).await {
        Ok(meta) if meta.len() > 0 => {
            info!(path = %output.display(), offset, "Saved thumbnail");
            Ok(())
        }
        _ => Err(EncodeError::Thumbnail {
            reason: format!("{} was not written", output.display()),
        }),
    }
}
