//! Ports - Trait definitions for the pipeline's external collaborators.

pub mod media;
pub mod storage;
