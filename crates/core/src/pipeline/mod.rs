//! Upload pipeline: download, hash, title check, chunked stash upload,
//! then publish or merge into a duplicate.

mod config;
mod error;
mod runner;
mod temp;

pub use config::PipelineConfig;
pub use error::PipelineError;
pub use runner::UploadPipeline;
pub use temp::TempFileGuard;
