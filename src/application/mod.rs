//! Application layer - Generic services that use ports.

pub mod orchestrator;
pub mod publisher;

pub use orchestrator::{IngestPipeline, WorkDir};
pub use publisher::{artifact_entries, ArtifactPublisher, PublishedArtifact, UploadEntry};
