//! Local adapters for single-host deployment.

pub mod fs;
pub mod process;

pub use fs::FsAdapter;
pub use process::ProcessRunner;
