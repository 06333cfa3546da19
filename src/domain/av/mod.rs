//! Audio/Video domain modules, driven through external ffprobe/ffmpeg processes.

pub mod probe;
pub mod progress;
pub mod rendition;
pub mod thumbnails;
