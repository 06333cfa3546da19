//! Encoding progress from ffmpeg's `-progress pipe:1` key=value stream.

use serde::Serialize;

/// One progress report for a rendition being encoded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenditionProgress {
    pub level: &'static str,
    /// 0.0 to 100.0 of the source duration.
    pub percent: f64,
    pub fps: Option<f64>,
    /// Encoded position as `HH:MM:SS.micros`.
    pub timemark: String,
}

/// Accumulates key=value lines until ffmpeg closes a block with `progress=`.
#[derive(Debug)]
pub struct ProgressParser {
    level: &'static str,
    duration_seconds: f64,
    fps: Option<f64>,
    out_time_us: Option<u64>,
    timemark: String,
}

impl ProgressParser {
    pub fn new(level: &'static str, duration_seconds: f64) -> Self {
        Self {
            level,
            duration_seconds,
            fps: None,
            out_time_us: None,
            timemark: String::from("00:00:00.000000"),
        }
    }

    /// Feed one stdout line; returns a report at the end of each block.
    pub fn feed(&mut self, line: &str) -> Option<RenditionProgress> {
        let (key, value) = line.trim().split_once('=')?;
        let value = value.trim();
        match key {
            "fps" => self.fps = value.parse().ok().filter(|fps: &f64| fps.is_finite()),
            // out_time_ms is microseconds too, despite the name
            "out_time_us" | "out_time_ms" => {
                if let Ok(us) = value.parse() {
                    self.out_time_us = Some(us);
                }
            }
            "out_time" if value != "N/A" => self.timemark = value.to_string(),
            "progress" => return Some(self.report(value == "end")),
            _ => {}
        }
        None
    }

    fn report(&self, finished: bool) -> RenditionProgress {
        let percent = if finished {
            100.0
        } else {
            match self.out_time_us {
                Some(us) if self.duration_seconds > 0.0 => {
                    (us as f64 / 1_000_000.0 / self.duration_seconds * 100.0).clamp(0.0, 100.0)
                }
                _ => 0.0,
            }
        };
        RenditionProgress {
            level: self.level,
            percent,
            fps: self.fps,
            timemark: self.timemark.clone(),
        }
    }
}
