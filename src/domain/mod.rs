//! Domain layer - Pure business logic and the media tools it drives.

pub mod av;
pub mod hls;
pub mod jobs;
pub mod media;
pub mod quality;
