//! Adapters - Concrete implementations of ports.

#[cfg(feature = "s3")]
pub mod aws;

pub mod local;
pub mod memory;
