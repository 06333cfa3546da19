//! AWS S3 (and S3-compatible) adapters.

pub mod s3;
