//! HLS playlist models: per-rendition media playlists and the master playlist.

use std::fmt::Write as _;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use super::quality::QualityLevel;

pub const MASTER_PLAYLIST_NAME: &str = "master.m3u8";
pub const MEDIA_PLAYLIST_NAME: &str = "playlist.m3u8";
pub const THUMBNAIL_NAME: &str = "thumbnail.jpg";
/// ffmpeg pattern for `-hls_segment_filename`; must agree with [`segment_file_name`].
pub const SEGMENT_PATTERN: &str = "segment_%03d.ts";

pub fn segment_file_name(index: usize) -> String {
    format!("segment_{:03}.ts", index)
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaSegment {
    pub duration: f64,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    pub version: u8,
    pub target_duration: u64,
    pub media_sequence: u64,
    pub segments: Vec<MediaSegment>,
    pub end_list: bool,
    pub playlist_type: Option<String>,
    pub independent_segments: bool,
}

impl MediaPlaylist {
    pub fn new(target_duration: u64) -> Self {
        Self {
            version: 3,
            target_duration,
            media_sequence: 0,
            segments: Vec::new(),
            end_list: true,
            playlist_type: None,
            independent_segments: false,
        }
    }

    pub fn add_segment(&mut self, duration: f64, uri: String) {
        self.segments.push(MediaSegment { duration, uri });
    }

    pub fn total_duration(&self) -> f64 {
        self.segments.iter().map(|segment| segment.duration).sum()
    }

    /// Text form accepted by [`MediaPlaylist::parse`]. ffmpeg writes the real
    /// sub-playlists; this is for fakes standing in for it.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("#EXTM3U\n");
        let _ = writeln!(out, "#EXT-X-VERSION:{}", self.version);
        let _ = writeln!(out, "#EXT-X-TARGETDURATION:{}", self.target_duration);
        let _ = writeln!(out, "#EXT-X-MEDIA-SEQUENCE:{}", self.media_sequence);
        if let Some(pt) = &self.playlist_type {
            let _ = writeln!(out, "#EXT-X-PLAYLIST-TYPE:{}", pt);
        }
        if self.independent_segments {
            out.push_str("#EXT-X-INDEPENDENT-SEGMENTS\n");
        }
        for segment in &self.segments {
            let _ = writeln!(out, "#EXTINF:{:.6},", segment.duration);
            out.push_str(&segment.uri);
            out.push('\n');
        }
        if self.end_list {
            out.push_str("#EXT-X-ENDLIST\n");
        }
        out
    }

    /// Parse a VOD media playlist as written by ffmpeg's hls muxer.
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut lines = text.lines().map(str::trim).filter(|line| !line.is_empty());
        if lines.next() != Some("#EXTM3U") {
            return Err("missing #EXTM3U header".to_string());
        }

        let mut playlist = MediaPlaylist::new(0);
        playlist.end_list = false;
        let mut pending: Option<f64> = None;

        for line in lines {
            if let Some(value) = line.strip_prefix("#EXT-X-VERSION:") {
                playlist.version = value
                    .parse()
                    .map_err(|_| format!("bad version {:?}", value))?;
            } else if let Some(value) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
                playlist.target_duration = value
                    .parse()
                    .map_err(|_| format!("bad target duration {:?}", value))?;
            } else if let Some(value) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
                playlist.media_sequence = value
                    .parse()
                    .map_err(|_| format!("bad media sequence {:?}", value))?;
            } else if let Some(value) = line.strip_prefix("#EXT-X-PLAYLIST-TYPE:") {
                playlist.playlist_type = Some(value.to_string());
            } else if line == "#EXT-X-INDEPENDENT-SEGMENTS" {
                playlist.independent_segments = true;
            } else if line == "#EXT-X-ENDLIST" {
                playlist.end_list = true;
            } else if let Some(value) = line.strip_prefix("#EXTINF:") {
                let duration = value.split(',').next().unwrap_or_default();
                pending = Some(
                    duration
                        .parse()
                        .map_err(|_| format!("bad segment duration {:?}", duration))?,
                );
            } else if line.starts_with('#') {
                continue;
            } else {
                let duration = pending
                    .take()
                    .ok_or_else(|| format!("segment {:?} has no #EXTINF", line))?;
                playlist.add_segment(duration, line.to_string());
            }
        }

        Ok(playlist)
    }

    /// Segments must be `segment_000.ts`, `segment_001.ts`, ... with no gaps.
    pub fn check_contiguous(&self) -> Result<(), String> {
        for (index, segment) in self.segments.iter().enumerate() {
            let expected = segment_file_name(index);
            if segment.uri != expected {
                return Err(format!(
                    "segment {} is {:?}, expected {:?}",
                    index, segment.uri, expected
                ));
            }
        }
        Ok(())
    }
}

/// One encoded quality level on local disk.
#[derive(Debug, Clone, PartialEq)]
pub struct RenditionOutput {
    pub level: QualityLevel,
    /// Actual encoded dimensions.
    pub width: u32,
    pub height: u32,
    /// Sub-playlist path relative to the output root, e.g. `720p/playlist.m3u8`.
    pub playlist_uri: String,
    pub segments: Vec<MediaSegment>,
}

impl RenditionOutput {
    pub fn bandwidth(&self) -> u64 {
        self.level.bandwidth()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInf {
    pub bandwidth: u64,
    pub width: u32,
    pub height: u32,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterPlaylist {
    pub version: u8,
    pub variants: Vec<StreamInf>,
}

impl MasterPlaylist {
    /// One variant per rendition, ascending bandwidth.
    pub fn compose(renditions: &[RenditionOutput]) -> Self {
        let mut variants: Vec<StreamInf> = renditions
            .iter()
            .map(|rendition| StreamInf {
                bandwidth: rendition.bandwidth(),
                width: rendition.width,
                height: rendition.height,
                uri: rendition.playlist_uri.clone(),
            })
            .collect();
        variants.sort_by_key(|variant| variant.bandwidth);

        Self {
            version: 3,
            variants,
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::from("#EXTM3U\n");
        let _ = writeln!(out, "#EXT-X-VERSION:{}", self.version);
        for variant in &self.variants {
            let _ = writeln!(
                out,
                "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{}",
                variant.bandwidth, variant.width, variant.height
            );
            out.push_str(&variant.uri);
            out.push('\n');
        }
        out
    }

    pub async fn write_to(&self, path: &Path) -> Result<(), std::io::Error> {
        let mut file = File::create(path).await?;
        file.write_all(self.render().as_bytes()).await?;
        file.flush().await
    }

    pub fn parse(text: &str) -> Result<Self, String> {
        let mut lines = text.lines().map(str::trim).filter(|line| !line.is_empty());
        if lines.next() != Some("#EXTM3U") {
            return Err("missing #EXTM3U header".to_string());
        }

        let mut master = MasterPlaylist {
            version: 1,
            variants: Vec::new(),
        };
        let mut pending: Option<(u64, u32, u32)> = None;

        for line in lines {
            if let Some(value) = line.strip_prefix("#EXT-X-VERSION:") {
                master.version = value
                    .parse()
                    .map_err(|_| format!("bad version {:?}", value))?;
            } else if let Some(attrs) = line.strip_prefix("#EXT-X-STREAM-INF:") {
                pending = Some(parse_stream_inf(attrs)?);
            } else if line.starts_with('#') {
                continue;
            } else {
                let (bandwidth, width, height) = pending
                    .take()
                    .ok_or_else(|| format!("variant {:?} has no #EXT-X-STREAM-INF", line))?;
                master.variants.push(StreamInf {
                    bandwidth,
                    width,
                    height,
                    uri: line.to_string(),
                });
            }
        }

        Ok(master)
    }
}

fn parse_stream_inf(attrs: &str) -> Result<(u64, u32, u32), String> {
    let mut bandwidth = None;
    let mut resolution = None;
    for attr in attrs.split(',') {
        match attr.split_once('=') {
            Some(("BANDWIDTH", value)) => {
                bandwidth = Some(
                    value
                        .parse::<u64>()
                        .map_err(|_| format!("bad bandwidth {:?}", value))?,
                )
            }
            Some(("RESOLUTION", value)) => {
                let (w, h) = value
                    .split_once('x')
                    .ok_or_else(|| format!("bad resolution {:?}", value))?;
                let w = w.parse().map_err(|_| format!("bad width {:?}", w))?;
                let h = h.parse().map_err(|_| format!("bad height {:?}", h))?;
                resolution = Some((w, h));
            }
            _ => {}
        }
    }
    let bandwidth = bandwidth.ok_or("stream without BANDWIDTH")?;
    let (width, height) = resolution.ok_or("stream without RESOLUTION")?;
    Ok((bandwidth, width, height))
}
