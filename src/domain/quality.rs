//! Rendition ladder and quality ceiling selection.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// A named rendition profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QualityLevel {
    pub name: &'static str,
    pub width: u32,
    pub height: u32,
    /// Video bitrate in kbit/s.
    pub video_kbps: u32,
    /// Audio bitrate in kbit/s.
    pub audio_kbps: u32,
    /// H.264 level passed to `-level`.
    pub h264_level: &'static str,
}

/// Static ladder, ascending by height. The first entry is the guaranteed fallback.
pub const LADDER: [QualityLevel; 4] = [
    QualityLevel {
        name: "360p",
        width: 640,
        height: 360,
        video_kbps: 800,
        audio_kbps: 128,
        h264_level: "3.0",
    },
    QualityLevel {
        name: "480p",
        width: 854,
        height: 480,
        video_kbps: 1400,
        audio_kbps: 128,
        h264_level: "3.0",
    },
    QualityLevel {
        name: "720p",
        width: 1280,
        height: 720,
        video_kbps: 2800,
        audio_kbps: 128,
        h264_level: "3.1",
    },
    QualityLevel {
        name: "1080p",
        width: 1920,
        height: 1080,
        video_kbps: 5000,
        audio_kbps: 128,
        h264_level: "4.0",
    },
];

impl QualityLevel {
    pub fn lowest() -> &'static QualityLevel {
        &LADDER[0]
    }

    pub fn by_name(name: &str) -> Option<&'static QualityLevel> {
        LADDER.iter().find(|level| level.name.eq_ignore_ascii_case(name))
    }

    /// Advertised bandwidth in bits per second (video + audio).
    pub fn bandwidth(&self) -> u64 {
        (u64::from(self.video_kbps) + u64::from(self.audio_kbps)) * 1000
    }

    /// Output size for a source of `src_width`x`src_height`.
    ///
    /// Fits inside the level's box keeping the aspect ratio, never upscales,
    /// and rounds both sides down to even numbers for 4:2:0 chroma.
    /// Sources narrower than 2 pixels are rejected when probed; the clamp to 2
    /// here only keeps the arithmetic total.
    pub fn target_dimensions(&self, src_width: u32, src_height: u32) -> (u32, u32) {
        let (sw, sh) = (u64::from(src_width.max(2)), u64::from(src_height.max(2)));
        let (bw, bh) = (u64::from(self.width), u64::from(self.height));

        let (w, h) = if sw <= bw && sh <= bh {
            (sw, sh)
        } else if sw * bh > sh * bw {
            // wider than the box: width is the binding side
            (bw, sh * bw / sw)
        } else {
            (sw * bh / sh, bh)
        };

        (even_floor(w), even_floor(h))
    }
}

fn even_floor(value: u64) -> u32 {
    let even = (value & !1).max(2);
    u32::try_from(even).unwrap_or(u32::MAX & !1)
}

impl fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Maximum rendition height a job may produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityCeiling {
    height: u32,
}

impl QualityCeiling {
    pub const UHD: QualityCeiling = QualityCeiling { height: 2160 };

    pub fn from_level(level: &QualityLevel) -> Self {
        Self {
            height: level.height,
        }
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Every ladder level at or below the ceiling, always including the lowest.
    pub fn enabled_levels(&self) -> Vec<QualityLevel> {
        let lowest = QualityLevel::lowest();
        LADDER
            .iter()
            .filter(|level| level.height <= self.height || level.name == lowest.name)
            .copied()
            .collect()
    }
}

impl Default for QualityCeiling {
    fn default() -> Self {
        Self::from_level(&LADDER[LADDER.len() - 1])
    }
}

impl FromStr for QualityCeiling {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("4k") || value.eq_ignore_ascii_case("2160p") {
            return Ok(Self::UHD);
        }
        QualityLevel::by_name(value)
            .map(Self::from_level)
            .ok_or_else(|| format!("unknown quality ceiling {:?}", value))
    }
}
